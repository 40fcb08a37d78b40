use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use team_wars_server::clock::ManualClock;
use team_wars_server::constants::{GRID_HEIGHT, GRID_WIDTH, MAX_ACTIONS};
use team_wars_server::engine::{GameEngine, GameEngineOptions};
use team_wars_server::store::MemoryStore;
use team_wars_server::types::Team;

/// Headless match runner: scripted bots claim random tiles on a simulated
/// clock while every engine invariant is checked along the way.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, default_value_t = 10)]
    bots: usize,
    #[arg(long, default_value_t = 60)]
    minutes: i64,
    #[arg(long, default_value_t = 30_000)]
    step_ms: u64,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(now_ms);
    let bots = cli.bots.max(2);
    let duration_ms = cli.minutes.clamp(1, 72 * 60) as u64 * 60_000;

    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(MemoryStore::new());
    let engine = GameEngine::new(
        clock.clone(),
        store,
        GameEngineOptions {
            start_ms_override: Some(1_000),
            duration_ms_override: Some(duration_ms),
        },
    )
    .expect("memory store never fails to open");

    let mut names = Vec::new();
    for index in 0..bots {
        let name = format!("bot-{:02}", index + 1);
        let team = if index % 2 == 0 { Team::Blue } else { Team::Pink };
        engine
            .join(&name, team)
            .expect("bot names are unique per run");
        names.push(name.to_lowercase());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut claims_ok = 0u64;
    let mut rejections: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut anomalies: Vec<String> = Vec::new();
    let mut steps = 0u64;

    while engine.poll_end().is_none() {
        clock.advance(cli.step_ms);
        steps += 1;

        for name in &names {
            let x = rng.random_range(0..GRID_WIDTH);
            let y = rng.random_range(0..GRID_HEIGHT);
            match engine.claim_tile(name, x, y) {
                Ok(_) => claims_ok += 1,
                Err(error) => {
                    *rejections.entry(error.code()).or_insert(0) += 1;
                }
            }
        }

        check_invariants(&engine, steps, &mut anomalies);
    }

    let snapshot = engine.snapshot();
    let final_score = engine.final_score().expect("match ended");
    let summary = json!({
        "seed": seed,
        "bots": bots,
        "steps": steps,
        "claimsOk": claims_ok,
        "rejections": rejections,
        "finalScore": final_score,
        "winner": final_score.leader(),
        "ownedTiles": snapshot.tiles.len(),
        "anomalies": anomalies,
    });
    println!("{summary}");

    if !anomalies.is_empty() {
        std::process::exit(1);
    }
}

fn check_invariants(engine: &GameEngine, step: u64, anomalies: &mut Vec<String>) {
    let snapshot = engine.snapshot();

    let mut owned_blue = 0u32;
    let mut owned_pink = 0u32;
    for tile in &snapshot.tiles {
        match tile.owner {
            Some(Team::Blue) => owned_blue += 1,
            Some(Team::Pink) => owned_pink += 1,
            None => anomalies.push(format!(
                "step {step}: snapshot lists unowned tile ({},{})",
                tile.x, tile.y
            )),
        }
    }
    if owned_blue != snapshot.scores.blue || owned_pink != snapshot.scores.pink {
        anomalies.push(format!(
            "step {step}: scores {:?} disagree with owned tiles ({owned_blue},{owned_pink})",
            snapshot.scores
        ));
    }

    for player in &snapshot.players {
        if player.actions_remaining < 0 || player.actions_remaining > MAX_ACTIONS {
            anomalies.push(format!(
                "step {step}: player {} budget out of range: {}",
                player.id, player.actions_remaining
            ));
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
