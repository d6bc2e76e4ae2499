use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::NaiveDate;

use hoops_edge::ability_fit::{AttackConstraint, DefenseConstraint, FitConfig, fit};
use hoops_edge::results::{GameResult, WindowIndex};
use hoops_edge::scoreline::win_probs;

fn synthetic_season(teams: usize, rounds: usize) -> Vec<GameResult> {
    let start: NaiveDate = "2024-10-01".parse().unwrap();
    let mut games = Vec::new();
    let mut game_id = 0u64;
    for round in 0..rounds {
        for i in 0..teams {
            for j in 0..teams {
                if i == j {
                    continue;
                }
                game_id += 1;
                // Deterministic score wobble so fits have real structure.
                let home_pts = 100 + ((i * 7 + round * 3) % 21) as u32;
                let away_pts = 96 + ((j * 11 + round * 5) % 21) as u32;
                games.push(GameResult {
                    game_id,
                    season: "2024-25".to_string(),
                    date: start + chrono::Duration::days((round * 7 + (i + j) % 7) as i64),
                    home_team: format!("TEAM{i:02}"),
                    away_team: format!("TEAM{j:02}"),
                    home_pts,
                    away_pts,
                    finished: true,
                });
            }
        }
    }
    games
}

fn bench_win_probs(c: &mut Criterion) {
    c.bench_function("scoreline_win_probs", |b| {
        b.iter(|| {
            let probs = win_probs(black_box(112.3), black_box(104.8)).unwrap();
            black_box(probs.home + probs.away);
        })
    });
}

fn bench_ability_fit_small(c: &mut Criterion) {
    let index = WindowIndex::new(synthetic_season(8, 2));
    let config = FitConfig::default();
    let date: NaiveDate = "2025-01-01".parse().unwrap();

    c.bench_function("ability_fit_8_teams", |b| {
        b.iter(|| {
            let snap = fit(black_box(&config), black_box(&index), black_box(date)).unwrap();
            black_box(snap.nll);
        })
    });
}

fn bench_ability_fit_league(c: &mut Criterion) {
    let index = WindowIndex::new(synthetic_season(30, 2));
    let config = FitConfig {
        attack_constraint: AttackConstraint::Rolling,
        defense_constraint: DefenseConstraint::Fixed(1.0),
        ..FitConfig::default()
    };
    let date: NaiveDate = "2025-01-01".parse().unwrap();

    c.bench_function("ability_fit_30_teams", |b| {
        b.iter(|| {
            let snap = fit(black_box(&config), black_box(&index), black_box(date)).unwrap();
            black_box(snap.iterations);
        })
    });
}

criterion_group!(
    perf,
    bench_win_probs,
    bench_ability_fit_small,
    bench_ability_fit_league
);
criterion_main!(perf);
