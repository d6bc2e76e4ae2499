use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ability_fit::AbilitySnapshot;
use crate::error::ModelError;
use crate::player_fit::PlayerAbility;
use crate::scoreline;

/// A game to predict, historical (scores present) or upcoming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub game_id: u64,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_pts: Option<u32>,
    pub away_pts: Option<u32>,
}

/// One fixture joined with its snapshot: derived means and unit-sum
/// win probabilities. Computed on demand, never persisted.
#[derive(Debug, Clone)]
pub struct PredictionRow {
    pub fixture: Fixture,
    pub home_mean: f64,
    pub away_mean: f64,
    pub home_win_prob: f64,
    pub away_win_prob: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PenaltyConfig {
    /// How many of a team's top scorers (by expected share) are checked.
    pub top_n: usize,
    /// Scales each missing player's share into a mean multiplier.
    pub penalty_factor: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            penalty_factor: 1.0,
        }
    }
}

impl PenaltyConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.top_n == 0 {
            return Err(ModelError::config("penalty top_n must be >= 1"));
        }
        if !self.penalty_factor.is_finite() || !(0.0..=1.0).contains(&self.penalty_factor) {
            return Err(ModelError::config(format!(
                "penalty_factor must be in [0, 1] (got {})",
                self.penalty_factor
            )));
        }
        Ok(())
    }
}

/// Player abilities plus the expected/actual lineups, for injury penalties.
pub struct PenaltyContext<'a> {
    pub abilities: &'a [PlayerAbility],
    /// team -> players known to be available.
    pub lineups: &'a HashMap<String, HashSet<String>>,
    pub config: PenaltyConfig,
}

/// Predict one fixture against the snapshot for its date.
pub fn predict_fixture(
    fixture: &Fixture,
    snapshots: &BTreeMap<NaiveDate, AbilitySnapshot>,
    penalties: Option<&PenaltyContext<'_>>,
) -> Result<PredictionRow, ModelError> {
    let snapshot = snapshots.get(&fixture.date).ok_or_else(|| ModelError::DataGap {
        what: "ability snapshot".to_string(),
        date: fixture.date,
    })?;
    let (mut home_mean, mut away_mean) = snapshot
        .means(&fixture.home_team, &fixture.away_team)
        .ok_or_else(|| ModelError::DataGap {
            what: format!("{} vs {}", fixture.home_team, fixture.away_team),
            date: fixture.date,
        })?;

    if let Some(ctx) = penalties {
        ctx.config.validate()?;
        home_mean *= injury_penalty(ctx, &fixture.home_team);
        away_mean *= injury_penalty(ctx, &fixture.away_team);
    }

    let probs = scoreline::win_probs(home_mean, away_mean)?;
    let (home_win_prob, away_win_prob) = probs.rescaled(home_mean, away_mean)?;

    Ok(PredictionRow {
        fixture: fixture.clone(),
        home_mean,
        away_mean,
        home_win_prob,
        away_win_prob,
    })
}

/// Predict a slate. Each fixture is an independent unit of failure: a bad
/// one is logged and skipped, the rest of the slate still comes back.
pub fn predict_fixtures(
    fixtures: &[Fixture],
    snapshots: &BTreeMap<NaiveDate, AbilitySnapshot>,
    penalties: Option<&PenaltyContext<'_>>,
) -> Vec<PredictionRow> {
    let mut out = Vec::with_capacity(fixtures.len());
    for fixture in fixtures {
        match predict_fixture(fixture, snapshots, penalties) {
            Ok(row) => out.push(row),
            Err(err) => {
                warn!(game_id = fixture.game_id, date = %fixture.date, %err, "skipping fixture");
            }
        }
    }
    out
}

/// Multiplicative mean penalty for a team's missing top scorers.
///
/// The team's players are ranked by expected share descending (ties broken
/// by name so the ranking is total); each of the top N absent from the
/// lineup contributes a `1 - share * factor` multiplier, compounding, and
/// the smallest running product is what gets applied. A player with no
/// fitted ability never appears in the ranking — a silent no-op. A team
/// with no lineup information is left unpenalized.
fn injury_penalty(ctx: &PenaltyContext<'_>, team: &str) -> f64 {
    let Some(lineup) = ctx.lineups.get(team) else {
        return 1.0;
    };

    let mut roster: Vec<&PlayerAbility> = ctx
        .abilities
        .iter()
        .filter(|p| p.team == team)
        .collect();
    roster.sort_by(|x, y| {
        y.expected_share()
            .partial_cmp(&x.expected_share())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.player.cmp(&y.player))
    });
    roster.truncate(ctx.config.top_n);

    let mut product = 1.0_f64;
    let mut worst = 1.0_f64;
    for p in roster {
        if !lineup.contains(&p.player) {
            let share = p.expected_share().clamp(0.0, 1.0);
            product *= (1.0 - share * ctx.config.penalty_factor).max(0.0);
            worst = worst.min(product);
        }
    }
    worst
}
