use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};

use hoops_edge::ability_fit::{DEFAULT_DAY_SPAN_DAYS, DEFAULT_DECAY, DEFAULT_WINDOW_DAYS};
use hoops_edge::backfill;
use hoops_edge::player_fit::{PlayerFitConfig, fit_players};
use hoops_edge::results::{self, WindowIndex};
use hoops_edge::store::RatingStore;

const DEFAULT_MAX_ITERS: usize = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const TOP_PRINTED: usize = 25;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let games_db = parse_path_arg("--db").context("--db <games sqlite path> is required")?;
    let ratings_db =
        parse_path_arg("--ratings-db").context("--ratings-db <ratings sqlite path> is required")?;

    let config = PlayerFitConfig {
        decay: parse_f64_arg("--decay").unwrap_or(DEFAULT_DECAY),
        day_span_days: parse_u32_arg("--span-days").unwrap_or(DEFAULT_DAY_SPAN_DAYS),
        window_days: parse_u32_arg("--window-days").unwrap_or(DEFAULT_WINDOW_DAYS),
        max_iters: parse_f64_arg("--max-iters")
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_ITERS),
        timeout: Duration::from_secs(
            parse_f64_arg("--timeout-secs")
                .map(|v| v as u64)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
    };
    config.validate()?;

    let as_of = match parse_str_arg("--date") {
        Some(raw) => raw
            .parse::<NaiveDate>()
            .with_context(|| format!("bad --date '{raw}'"))?,
        None => Utc::now().date_naive(),
    };

    let conn = results::open_db(&games_db)?;
    let lines = results::load_player_lines(&conn)?;
    let index = WindowIndex::new(lines);
    let store = RatingStore::open(&ratings_db)?;

    if has_flag("--backfill") {
        let report = backfill::run_player_backfill(&store, &config, &index, as_of)?;
        println!(
            "player backfill {} | fitted {} date(s), skipped {}",
            config.key(),
            report.fitted.len(),
            report.skipped.len()
        );
        return Ok(());
    }

    let Some(_guard) = store.begin_fit(&config.key(), as_of) else {
        return Err(anyhow!("a fit for {} @ {as_of} is already running", config.key()));
    };
    let mut abilities = fit_players(&config, &index, as_of)?;
    store.replace_players(&config.key(), as_of, &abilities)?;

    abilities.sort_by(|x, y| {
        y.expected_share()
            .partial_cmp(&x.expected_share())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    println!("fit {} @ {as_of} | {} players", config.key(), abilities.len());
    for p in abilities.iter().take(TOP_PRINTED) {
        println!(
            "  {:<28} {:<24} share {:.3}  ({} games{})",
            p.player,
            p.team,
            p.expected_share(),
            p.games,
            if p.converged { "" } else { ", NOT CONVERGED" },
        );
    }
    Ok(())
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
