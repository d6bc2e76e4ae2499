use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use hoops_edge::ability_fit::{AbilitySnapshot, AttackConstraint, DefenseConstraint, FitConfig};
use hoops_edge::betting::{
    BetBand, MarketOdds, RValueMode, SimConfig, band_grid_search, simulate_season,
};
use hoops_edge::export;
use hoops_edge::predict::{Fixture, predict_fixtures};
use hoops_edge::results;
use hoops_edge::store::RatingStore;

const DEFAULT_SWEEP_LOW: f64 = 1.0;
const DEFAULT_SWEEP_HIGH: f64 = 3.0;
const DEFAULT_SWEEP_STEP: f64 = 0.05;
const SWEEP_PRINTED: usize = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let games_db = parse_path_arg("--db").context("--db <games sqlite path> is required")?;
    let ratings_db =
        parse_path_arg("--ratings-db").context("--ratings-db <ratings sqlite path> is required")?;
    let odds_path =
        parse_path_arg("--odds").context("--odds <market odds json path> is required")?;

    // The fit-config args name the snapshot family to read back; they must
    // match whatever fit_abilities was run with.
    let fit_config = FitConfig {
        decay: parse_f64_arg("--decay").unwrap_or(fit_defaults().decay),
        day_span_days: parse_u32_arg("--span-days").unwrap_or(fit_defaults().day_span_days),
        window_days: parse_u32_arg("--window-days").unwrap_or(fit_defaults().window_days),
        attack_constraint: parse_attack_arg()?,
        defense_constraint: parse_defense_arg()?,
        ..fit_defaults()
    };

    let base = SimConfig {
        band: BetBand {
            low: parse_f64_arg("--band-low").unwrap_or(SimConfig::default().band.low),
            high: parse_f64_arg("--band-high").unwrap_or(SimConfig::default().band.high),
        },
        mode: parse_mode_arg()?,
        stake_fraction: parse_f64_arg("--stake").unwrap_or(SimConfig::default().stake_fraction),
        starting_bankroll: parse_f64_arg("--bankroll")
            .unwrap_or(SimConfig::default().starting_bankroll),
        games_per_matchup: parse_u32_arg("--games-per-matchup")
            .unwrap_or(SimConfig::default().games_per_matchup),
    };
    base.validate()?;

    let season = parse_str_arg("--season");

    let conn = results::open_db(&games_db)?;
    let fixtures: Vec<Fixture> = results::load_finished_games(&conn)?
        .into_iter()
        .filter(|g| season.as_deref().is_none_or(|s| g.season == s))
        .map(|g| Fixture {
            game_id: g.game_id,
            date: g.date,
            home_team: g.home_team,
            away_team: g.away_team,
            home_pts: Some(g.home_pts),
            away_pts: Some(g.away_pts),
        })
        .collect();
    if fixtures.is_empty() {
        return Err(anyhow!("no finished games to backtest"));
    }

    let store = RatingStore::open(&ratings_db)?;
    let snapshots: BTreeMap<NaiveDate, AbilitySnapshot> = store
        .find(&fit_config.key())?
        .into_iter()
        .map(|s| (s.as_of, s))
        .collect();
    if snapshots.is_empty() {
        return Err(anyhow!(
            "no snapshots stored for {}; run fit_abilities --backfill first",
            fit_config.key()
        ));
    }

    let raw = std::fs::read_to_string(&odds_path)
        .with_context(|| format!("read odds file {}", odds_path.display()))?;
    let odds: Vec<MarketOdds> = serde_json::from_str(&raw).context("parse odds json")?;
    let odds_by_game: HashMap<u64, MarketOdds> =
        odds.into_iter().map(|o| (o.game_id, o)).collect();

    let rows: Vec<_> = predict_fixtures(&fixtures, &snapshots, None)
        .into_iter()
        .filter_map(|row| {
            let odds = odds_by_game.get(&row.fixture.game_id)?.clone();
            Some((row, odds))
        })
        .collect();
    println!(
        "backtest {} | {} fixtures with snapshot + odds",
        fit_config.key(),
        rows.len()
    );

    let sweep = if has_flag("--sweep") {
        let results = band_grid_search(
            &rows,
            &base,
            parse_f64_arg("--sweep-low").unwrap_or(DEFAULT_SWEEP_LOW),
            parse_f64_arg("--sweep-high").unwrap_or(DEFAULT_SWEEP_HIGH),
            parse_f64_arg("--sweep-step").unwrap_or(DEFAULT_SWEEP_STEP),
        )?;
        println!("band sweep, best {SWEEP_PRINTED} by profit:");
        for r in results.iter().take(SWEEP_PRINTED) {
            println!(
                "  [{:.2}, {:.2})  {:>4} bets  profit {:>9.2}  roi {:>7.4}",
                r.band.low, r.band.high, r.bets, r.profit, r.roi
            );
        }
        Some(results)
    } else {
        None
    };

    let pnl = simulate_season(&rows, &base)?;
    println!(
        "band [{:.2}, {:.2}) | {} bets, {} wins | bankroll {:.2} -> {:.2} | roi {:.4}",
        base.band.low,
        base.band.high,
        pnl.bets.len(),
        pnl.wins,
        pnl.starting_bankroll,
        pnl.final_bankroll,
        pnl.roi()
    );

    if let Some(path) = parse_path_arg("--xlsx") {
        export::export_season_xlsx(&path, &pnl, sweep.as_deref())?;
        println!("wrote {}", path.display());
    }
    if let Some(path) = parse_path_arg("--csv") {
        export::export_bets_csv(&path, &pnl)?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn fit_defaults() -> FitConfig {
    FitConfig::default()
}

fn parse_mode_arg() -> Result<RValueMode> {
    match parse_str_arg("--mode").as_deref() {
        None | Some("prob") => Ok(RValueMode::ProbabilityRatio),
        Some("odds") => Ok(RValueMode::OddsRatio),
        Some(other) => Err(anyhow!("--mode must be prob|odds (got '{other}')")),
    }
}

fn parse_attack_arg() -> Result<AttackConstraint> {
    let Some(raw) = parse_str_arg("--attack") else {
        return Ok(AttackConstraint::Fixed(100.0));
    };
    match raw.as_str() {
        "free" => Ok(AttackConstraint::Free),
        "rolling" => Ok(AttackConstraint::Rolling),
        "rolling-low" => Ok(AttackConstraint::RollingLow),
        other => other
            .parse::<f64>()
            .map(AttackConstraint::Fixed)
            .map_err(|_| anyhow!("--attack must be free|rolling|rolling-low|<number> (got '{other}')")),
    }
}

fn parse_defense_arg() -> Result<DefenseConstraint> {
    let Some(raw) = parse_str_arg("--defense") else {
        return Ok(DefenseConstraint::Fixed(1.0));
    };
    match raw.as_str() {
        "free" => Ok(DefenseConstraint::Free),
        other => other
            .parse::<f64>()
            .map(DefenseConstraint::Fixed)
            .map_err(|_| anyhow!("--defense must be free|<number> (got '{other}')")),
    }
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_str_arg(name).map(PathBuf::from)
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_str_arg(name).and_then(|raw| raw.parse::<f64>().ok())
}

fn parse_u32_arg(name: &str) -> Option<u32> {
    parse_str_arg(name).and_then(|raw| raw.parse::<u32>().ok())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
