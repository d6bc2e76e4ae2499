use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::ability_fit::{self, FitConfig};
use crate::error::ModelError;
use crate::player_fit::{self, PlayerFitConfig};
use crate::results::{GameResult, PlayerGameLine, WindowIndex};
use crate::store::RatingStore;

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub fitted: Vec<NaiveDate>,
    pub skipped: Vec<(NaiveDate, String)>,
}

/// Every distinct game date (up to and including today) that has no stored
/// snapshot, plus today itself — today is not guaranteed to appear in the
/// historical game set, so it is always fitted explicitly.
pub fn missing_dates(
    store: &RatingStore,
    config_key: &str,
    index: &WindowIndex<GameResult>,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    let have: HashSet<NaiveDate> = store.snapshot_dates(config_key)?.into_iter().collect();
    let mut out: Vec<NaiveDate> = index
        .distinct_dates(today)
        .into_iter()
        .filter(|d| !have.contains(d))
        .collect();
    if !have.contains(&today) && out.last() != Some(&today) {
        out.push(today);
    }
    Ok(out)
}

/// Fit every missing date for a team-ability configuration. Distinct dates
/// are independent, so the fits run on the rayon pool; the resulting
/// snapshots are then stored in chronological order. A per-date failure is
/// logged and skipped rather than aborting the run.
pub fn run_team_backfill(
    store: &RatingStore,
    config: &FitConfig,
    index: &WindowIndex<GameResult>,
    today: NaiveDate,
) -> Result<BackfillReport> {
    config.validate()?;
    if index.is_empty() {
        return Err(ModelError::AbilitiesMissing(config.key()).into());
    }

    let config_key = config.key();
    let dates = missing_dates(store, &config_key, index, today)?;
    info!(config = %config_key, missing = dates.len(), "team ability backfill");

    let mut fits: Vec<(NaiveDate, Result<ability_fit::AbilitySnapshot, ModelError>)> = dates
        .par_iter()
        .map(|&date| (date, ability_fit::fit(config, index, date)))
        .collect();
    fits.sort_by_key(|(date, _)| *date);

    let mut report = BackfillReport::default();
    for (date, outcome) in fits {
        let Some(_guard) = store.begin_fit(&config_key, date) else {
            warn!(%date, config = %config_key, "fit already in flight; skipping");
            report.skipped.push((date, "fit in flight".to_string()));
            continue;
        };
        match outcome {
            Ok(snapshot) => {
                store.replace(&snapshot)?;
                report.fitted.push(date);
            }
            Err(err) => {
                warn!(%date, config = %config_key, %err, "per-date fit failed; continuing");
                report.skipped.push((date, err.to_string()));
            }
        }
    }
    Ok(report)
}

/// Player-share analogue of `run_team_backfill`, keyed by the player
/// configuration and driven by the player-line dates.
pub fn run_player_backfill(
    store: &RatingStore,
    config: &PlayerFitConfig,
    index: &WindowIndex<PlayerGameLine>,
    today: NaiveDate,
) -> Result<BackfillReport> {
    config.validate()?;
    if index.is_empty() {
        return Err(ModelError::AbilitiesMissing(config.key()).into());
    }

    let config_key = config.key();
    let mut dates: Vec<NaiveDate> = index.distinct_dates(today);
    if dates.last() != Some(&today) {
        dates.push(today);
    }
    let mut pending = Vec::new();
    for date in dates {
        if store.count_players_for_date(&config_key, date)? == 0 {
            pending.push(date);
        }
    }
    info!(config = %config_key, missing = pending.len(), "player ability backfill");

    let mut fits: Vec<(NaiveDate, Result<Vec<_>, ModelError>)> = pending
        .par_iter()
        .map(|&date| (date, player_fit::fit_players(config, index, date)))
        .collect();
    fits.sort_by_key(|(date, _)| *date);

    let mut report = BackfillReport::default();
    for (date, outcome) in fits {
        let Some(_guard) = store.begin_fit(&config_key, date) else {
            report.skipped.push((date, "fit in flight".to_string()));
            continue;
        };
        match outcome {
            Ok(abilities) => {
                store.replace_players(&config_key, date, &abilities)?;
                report.fitted.push(date);
            }
            Err(err) => {
                warn!(%date, config = %config_key, %err, "per-date player fit failed");
                report.skipped.push((date, err.to_string()));
            }
        }
    }
    Ok(report)
}
