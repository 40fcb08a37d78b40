pub mod chat;
pub mod claim;
pub mod clock;
pub mod constants;
pub mod engine;
pub mod events;
pub mod grid;
pub mod match_control;
pub mod players;
pub mod protocol;
pub mod store;
pub mod types;
