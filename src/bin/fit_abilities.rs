use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};

use hoops_edge::ability_fit::{
    AttackConstraint, DEFAULT_DAY_SPAN_DAYS, DEFAULT_DECAY, DEFAULT_WINDOW_DAYS, DefenseConstraint,
    FitConfig, fit,
};
use hoops_edge::backfill;
use hoops_edge::results::{self, WindowIndex};
use hoops_edge::store::RatingStore;

const DEFAULT_MAX_ITERS: usize = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let games_db = parse_path_arg("--db").context("--db <games sqlite path> is required")?;
    let ratings_db =
        parse_path_arg("--ratings-db").context("--ratings-db <ratings sqlite path> is required")?;

    let config = FitConfig {
        decay: parse_f64_arg("--decay").unwrap_or(DEFAULT_DECAY),
        day_span_days: parse_u32_arg("--span-days").unwrap_or(DEFAULT_DAY_SPAN_DAYS),
        window_days: parse_u32_arg("--window-days").unwrap_or(DEFAULT_WINDOW_DAYS),
        attack_constraint: parse_attack_arg()?,
        defense_constraint: parse_defense_arg()?,
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
    let games = results::load_finished_games(&conn)?;
    let index = WindowIndex::new(games);
    let store = RatingStore::open(&ratings_db)?;

    if has_flag("--backfill") {
        let report = backfill::run_team_backfill(&store, &config, &index, as_of)?;
        println!(
            "backfill {} | fitted {} date(s), skipped {}",
            config.key(),
            report.fitted.len(),
            report.skipped.len()
        );
        for (date, reason) in &report.skipped {
            println!("  skipped {date}: {reason}");
        }
        return Ok(());
    }

    let Some(_guard) = store.begin_fit(&config.key(), as_of) else {
        return Err(anyhow!("a fit for {} @ {as_of} is already running", config.key()));
    };
    let snapshot = fit(&config, &index, as_of)?;
    store.replace(&snapshot)?;

    println!(
        "fit {} @ {as_of} | {} teams, home_adv {:.4}, nll {:.2}, {} iters{}",
        snapshot.config_key,
        snapshot.teams.len(),
        snapshot.home_adv,
        snapshot.nll,
        snapshot.iterations,
        if snapshot.converged { "" } else { " (NOT CONVERGED)" },
    );
    let mut by_attack: Vec<_> = snapshot.teams.iter().collect();
    by_attack.sort_by(|a, b| b.1.attack.partial_cmp(&a.1.attack).unwrap_or(std::cmp::Ordering::Equal));
    for (team, ability) in by_attack {
        println!("  {team:<24} att {:>7.2}  def {:>6.3}", ability.attack, ability.defense);
    }
    Ok(())
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
