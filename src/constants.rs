pub const GRID_WIDTH: i32 = 100;
pub const GRID_HEIGHT: i32 = 100;

pub const MAX_ACTIONS: i32 = 5;
pub const REFILL_INTERVAL_MS: u64 = 12 * 60 * 1000;

pub const MATCH_DURATION_MS: u64 = 72 * 60 * 60 * 1000;

pub const CHAT_MAX_LEN: usize = 200;
pub const CHAT_RETAINED: usize = 100;

pub const NAME_MAX_LEN: usize = 16;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub fn normalize_duration_ms(minutes: Option<i64>) -> Option<u64> {
    minutes.map(|value| value.clamp(1, 72 * 60) as u64 * 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_duration_clamps_minutes() {
        assert_eq!(normalize_duration_ms(None), None);
        assert_eq!(normalize_duration_ms(Some(-5)), Some(60_000));
        assert_eq!(
            normalize_duration_ms(Some(1_000_000)),
            Some(72 * 60 * 60_000)
        );
    }
}
