use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};
use tracing::warn;

use crate::error::ModelError;
use crate::recency::bucket_weight;
use crate::results::{PlayerGameLine, WindowIndex};

/// Zero-point games are nudged here so the beta density stays defined at
/// the boundary. Shares are clamped away from 1.0 symmetrically.
pub const ZERO_POINT_EPS: f64 = 1e-3;

const MIN_SHAPE: f64 = 1e-6;
const MAX_SHAPE: f64 = 1e6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerFitConfig {
    pub decay: f64,
    pub day_span_days: u32,
    pub window_days: u32,
    pub max_iters: usize,
    pub timeout: Duration,
}

impl Default for PlayerFitConfig {
    fn default() -> Self {
        Self {
            decay: crate::ability_fit::DEFAULT_DECAY,
            day_span_days: crate::ability_fit::DEFAULT_DAY_SPAN_DAYS,
            window_days: crate::ability_fit::DEFAULT_WINDOW_DAYS,
            max_iters: 200,
            timeout: Duration::from_secs(5),
        }
    }
}

impl PlayerFitConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.decay.is_finite() || self.decay < 0.0 {
            return Err(ModelError::config(format!(
                "decay must be finite and >= 0 (got {})",
                self.decay
            )));
        }
        if self.day_span_days == 0 || self.window_days == 0 {
            return Err(ModelError::config(
                "day_span_days and window_days must be >= 1",
            ));
        }
        Ok(())
    }

    pub fn key(&self) -> String {
        format!(
            "player_mw{}_span{}_win{}",
            self.decay, self.day_span_days, self.window_days
        )
    }
}

/// Beta(a, b) over one player's share of their team's points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAbility {
    pub config_key: String,
    pub as_of: NaiveDate,
    pub player: String,
    /// Team label from the player's most recent game in the window.
    pub team: String,
    pub a: f64,
    pub b: f64,
    pub converged: bool,
    pub games: usize,
}

impl PlayerAbility {
    /// Expected scoring share, the ranking key for injury penalties.
    pub fn expected_share(&self) -> f64 {
        self.a / (self.a + self.b)
    }
}

/// Fit every player with at least one game in the trailing window.
pub fn fit_players(
    config: &PlayerFitConfig,
    index: &WindowIndex<PlayerGameLine>,
    date: NaiveDate,
) -> Result<Vec<PlayerAbility>, ModelError> {
    config.validate()?;
    let lines = index.within(date, config.window_days);

    let mut grouped: BTreeMap<&str, Vec<&PlayerGameLine>> = BTreeMap::new();
    for line in lines {
        grouped.entry(line.player.as_str()).or_default().push(line);
    }

    let mut out = Vec::with_capacity(grouped.len());
    for (player, games) in grouped {
        let shares: Vec<f64> = games.iter().map(|g| share(g)).collect();
        let weights: Vec<f64> = games
            .iter()
            .map(|g| bucket_weight(config.decay, config.day_span_days, (date - g.date).num_days()))
            .collect();
        let team = games
            .iter()
            .max_by_key(|g| g.date)
            .map(|g| g.team.clone())
            .unwrap_or_default();

        let (a, b, converged) = fit_beta(&shares, &weights, config);
        if !converged {
            warn!(player, %date, "beta share fit did not converge");
        }
        out.push(PlayerAbility {
            config_key: config.key(),
            as_of: date,
            player: player.to_string(),
            team,
            a,
            b,
            converged,
            games: games.len(),
        });
    }
    Ok(out)
}

fn share(line: &PlayerGameLine) -> f64 {
    let pts = f64::from(line.player_pts).max(ZERO_POINT_EPS);
    let total = f64::from(line.team_pts).max(1.0);
    (pts / total).clamp(ZERO_POINT_EPS, 1.0 - ZERO_POINT_EPS)
}

/// Weighted beta MLE: moment-matched init, then damped gradient descent
/// with backtracking. Shapes are held positive by clamping (the inequality
/// constraints a >= 0, b >= 0, tightened to a small epsilon).
fn fit_beta(shares: &[f64], weights: &[f64], config: &PlayerFitConfig) -> (f64, f64, bool) {
    let wsum: f64 = weights.iter().sum::<f64>().max(1e-12);
    let m = shares
        .iter()
        .zip(weights)
        .map(|(r, w)| r * w)
        .sum::<f64>()
        / wsum;
    let v = shares
        .iter()
        .zip(weights)
        .map(|(r, w)| w * (r - m).powi(2))
        .sum::<f64>()
        / wsum;

    let (mut a, mut b) = if v > 1e-9 && m > 0.0 && m < 1.0 {
        let c = (m * (1.0 - m) / v - 1.0).max(MIN_SHAPE);
        (
            (m * c).clamp(MIN_SHAPE, MAX_SHAPE),
            ((1.0 - m) * c).clamp(MIN_SHAPE, MAX_SHAPE),
        )
    } else {
        // Degenerate sample: mild prior strength around the observed mean.
        ((m * 10.0).max(MIN_SHAPE), ((1.0 - m) * 10.0).max(MIN_SHAPE))
    };

    let nll = |a: f64, b: f64| -> f64 {
        let ln_beta = ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b);
        let mut total = 0.0;
        for (r, w) in shares.iter().zip(weights) {
            total -= w * ((a - 1.0) * r.ln() + (b - 1.0) * (1.0 - r).ln() - ln_beta);
        }
        total
    };

    let started = Instant::now();
    let mut current = nll(a, b);
    let mut step = 0.5;
    let mut converged = false;

    for _ in 0..config.max_iters {
        if started.elapsed() > config.timeout {
            break;
        }
        let dig_ab = digamma(a + b);
        let mut ga = 0.0;
        let mut gb = 0.0;
        for (r, w) in shares.iter().zip(weights) {
            ga += w * (digamma(a) - dig_ab - r.ln());
            gb += w * (digamma(b) - dig_ab - (1.0 - r).ln());
        }

        let mut accepted = false;
        let mut local = step;
        for _ in 0..40 {
            let ca = (a - local * ga).clamp(MIN_SHAPE, MAX_SHAPE);
            let cb = (b - local * gb).clamp(MIN_SHAPE, MAX_SHAPE);
            let cand = nll(ca, cb);
            if cand.is_finite() && cand <= current {
                let improvement = current - cand;
                a = ca;
                b = cb;
                current = cand;
                accepted = true;
                step = (local * 2.0).min(4.0);
                if improvement < 1e-10 * (1.0 + current.abs()) {
                    converged = true;
                }
                break;
            }
            local *= 0.5;
        }
        if !accepted || converged {
            converged = converged || !accepted;
            break;
        }
    }

    (a, b, converged)
}
