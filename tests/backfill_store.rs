use chrono::NaiveDate;

use hoops_edge::ability_fit::FitConfig;
use hoops_edge::backfill::{missing_dates, run_player_backfill, run_team_backfill};
use hoops_edge::player_fit::PlayerFitConfig;
use hoops_edge::results::{GameResult, PlayerGameLine, WindowIndex};
use hoops_edge::store::RatingStore;

fn game(id: u64, date: &str, home: &str, away: &str, hp: u32, ap: u32) -> GameResult {
    GameResult {
        game_id: id,
        season: "2024-25".to_string(),
        date: date.parse().unwrap(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_pts: hp,
        away_pts: ap,
        finished: true,
    }
}

fn d(raw: &str) -> NaiveDate {
    raw.parse().unwrap()
}

fn three_date_index() -> WindowIndex<GameResult> {
    WindowIndex::new(vec![
        game(1, "2025-01-01", "A", "B", 110, 100),
        game(2, "2025-01-01", "C", "D", 105, 99),
        game(3, "2025-01-05", "B", "C", 98, 108),
        game(4, "2025-01-09", "D", "A", 102, 115),
    ])
}

#[test]
fn backfill_fits_every_game_date_plus_today() {
    let store = RatingStore::open_in_memory().unwrap();
    let config = FitConfig::default();
    let index = three_date_index();
    let today = d("2025-01-12");

    let report = run_team_backfill(&store, &config, &index, today).unwrap();
    assert_eq!(
        report.fitted,
        vec![d("2025-01-01"), d("2025-01-05"), d("2025-01-09"), today]
    );
    assert!(report.skipped.is_empty());
    assert_eq!(store.count(&config.key()).unwrap(), 4);
    assert_eq!(
        store.snapshot_dates(&config.key()).unwrap(),
        vec![d("2025-01-01"), d("2025-01-05"), d("2025-01-09"), today]
    );
}

#[test]
fn rerun_is_a_no_op_until_new_dates_appear() {
    let store = RatingStore::open_in_memory().unwrap();
    let config = FitConfig::default();
    let index = three_date_index();

    run_team_backfill(&store, &config, &index, d("2025-01-09")).unwrap();
    let again = run_team_backfill(&store, &config, &index, d("2025-01-09")).unwrap();
    assert!(again.fitted.is_empty());

    // A later run heals exactly the gap: the new "today" and nothing else.
    let later = run_team_backfill(&store, &config, &index, d("2025-01-12")).unwrap();
    assert_eq!(later.fitted, vec![d("2025-01-12")]);
    assert_eq!(store.count(&config.key()).unwrap(), 4);
}

#[test]
fn missing_dates_respect_what_is_already_stored() {
    let store = RatingStore::open_in_memory().unwrap();
    let config = FitConfig::default();
    let index = three_date_index();
    let today = d("2025-01-09");

    run_team_backfill(&store, &config, &index, d("2025-01-01")).unwrap();
    let missing = missing_dates(&store, &config.key(), &index, today).unwrap();
    assert_eq!(missing, vec![d("2025-01-05"), d("2025-01-09")]);
}

#[test]
fn empty_game_history_is_an_error_not_a_silent_no_op() {
    let store = RatingStore::open_in_memory().unwrap();
    let index: WindowIndex<GameResult> = WindowIndex::new(Vec::new());
    let err = run_team_backfill(&store, &FitConfig::default(), &index, d("2025-01-01"))
        .unwrap_err();
    assert!(err.to_string().contains("abilities don't exist"));
}

#[test]
fn distinct_config_keys_keep_separate_snapshot_families() {
    let store = RatingStore::open_in_memory().unwrap();
    let index = three_date_index();
    let today = d("2025-01-09");

    let default_config = FitConfig::default();
    let heavy_decay = FitConfig {
        decay: 0.5,
        ..FitConfig::default()
    };
    assert_ne!(default_config.key(), heavy_decay.key());

    run_team_backfill(&store, &default_config, &index, today).unwrap();
    run_team_backfill(&store, &heavy_decay, &index, today).unwrap();
    assert_eq!(store.count(&default_config.key()).unwrap(), 3);
    assert_eq!(store.count(&heavy_decay.key()).unwrap(), 3);
}

#[test]
fn player_backfill_stores_abilities_per_date() {
    let line = |id: u64, date: &str, player: &str, pts: u32| PlayerGameLine {
        game_id: id,
        date: date.parse().unwrap(),
        player: player.to_string(),
        team: "A".to_string(),
        player_pts: pts,
        team_pts: 100,
    };
    let index = WindowIndex::new(vec![
        line(1, "2025-01-01", "Star", 30),
        line(1, "2025-01-01", "Role", 8),
        line(2, "2025-01-05", "Star", 27),
        line(2, "2025-01-05", "Role", 11),
    ]);

    let store = RatingStore::open_in_memory().unwrap();
    let config = PlayerFitConfig::default();
    let today = d("2025-01-06");

    let report = run_player_backfill(&store, &config, &index, today).unwrap();
    assert_eq!(report.fitted, vec![d("2025-01-01"), d("2025-01-05"), today]);

    let abilities = store
        .find_players_for_date(&config.key(), d("2025-01-05"))
        .unwrap();
    assert_eq!(abilities.len(), 2);
    let star = abilities.iter().find(|p| p.player == "Star").unwrap();
    let role = abilities.iter().find(|p| p.player == "Role").unwrap();
    assert!(star.expected_share() > role.expected_share());

    // Second run finds nothing to do.
    let again = run_player_backfill(&store, &config, &index, today).unwrap();
    assert!(again.fitted.is_empty());
}
