use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::predict::PredictionRow;
use crate::results::Side;

/// Decimal odds for one game at one book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    pub game_id: u64,
    pub book: String,
    pub home_odds: f64,
    pub away_odds: f64,
}

impl MarketOdds {
    pub fn validate(&self) -> Result<(), ModelError> {
        for (label, odds) in [("home", self.home_odds), ("away", self.away_odds)] {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(ModelError::config(format!(
                    "{label} odds must be decimal odds > 1.0 (got {odds})"
                )));
            }
        }
        Ok(())
    }
}

/// How the R value is formed from model probability and market price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RValueMode {
    /// model probability / overround-stripped implied probability.
    ProbabilityRatio,
    /// market odds / model fair odds (= market odds * model probability).
    OddsRatio,
}

/// Half-open value band: a side is a candidate when `low <= R < high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetBand {
    pub low: f64,
    pub high: f64,
}

impl BetBand {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.low.is_finite() || !self.high.is_finite() || self.low <= 0.0 {
            return Err(ModelError::config(format!(
                "band bounds must be finite and positive (got [{}, {}))",
                self.low, self.high
            )));
        }
        if self.low >= self.high {
            return Err(ModelError::config(format!(
                "band low must be below high (got [{}, {}))",
                self.low, self.high
            )));
        }
        Ok(())
    }

    pub fn contains(&self, r: f64) -> bool {
        r >= self.low && r < self.high
    }
}

/// R values for both sides, floored to 2 decimal places.
pub fn r_values(
    row: &PredictionRow,
    odds: &MarketOdds,
    mode: RValueMode,
) -> Result<(f64, f64), ModelError> {
    odds.validate()?;
    let (raw_home, raw_away) = match mode {
        RValueMode::ProbabilityRatio => {
            let implied_home = 1.0 / odds.home_odds;
            let implied_away = 1.0 / odds.away_odds;
            // Strip the bookmaker's overround before comparing.
            let overround = implied_home + implied_away;
            (
                row.home_win_prob / (implied_home / overround),
                row.away_win_prob / (implied_away / overround),
            )
        }
        RValueMode::OddsRatio => (
            odds.home_odds * row.home_win_prob,
            odds.away_odds * row.away_win_prob,
        ),
    };
    Ok((floor_2dp(raw_home), floor_2dp(raw_away)))
}

/// Floor to hundredths, absorbing float representation error first so a
/// value that is an exact hundredth in real arithmetic (e.g. 0.6 / (5/9) =
/// 1.08, which f64 carries as 1.0799999...) keeps its hundredth instead of
/// dropping a cent.
fn floor_2dp(v: f64) -> f64 {
    (v * 100.0 + 1e-9).floor() / 100.0
}

#[derive(Debug, Clone)]
pub struct SettledBet {
    pub game_id: u64,
    pub date: chrono::NaiveDate,
    pub side: Side,
    pub team: String,
    pub r_value: f64,
    pub odds: f64,
    pub stake: f64,
    pub profit: f64,
    pub won: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SeasonPnl {
    pub bets: Vec<SettledBet>,
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
    pub wins: usize,
}

impl SeasonPnl {
    pub fn profit(&self) -> f64 {
        self.final_bankroll - self.starting_bankroll
    }

    pub fn roi(&self) -> f64 {
        let staked: f64 = self.bets.iter().map(|b| b.stake).sum();
        if staked <= 0.0 {
            0.0
        } else {
            self.profit() / staked
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub band: BetBand,
    pub mode: RValueMode,
    pub stake_fraction: f64,
    pub starting_bankroll: f64,
    /// Schedule parameter for full-season volume projections; a matchup is
    /// played this many times, split evenly between the two venues, so an
    /// odd value is a caller error.
    pub games_per_matchup: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            band: BetBand {
                low: 1.55,
                high: 2.05,
            },
            mode: RValueMode::ProbabilityRatio,
            stake_fraction: 0.02,
            starting_bankroll: 1000.0,
            games_per_matchup: 4,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        self.band.validate()?;
        if !self.stake_fraction.is_finite()
            || self.stake_fraction <= 0.0
            || self.stake_fraction > 1.0
        {
            return Err(ModelError::config(format!(
                "stake_fraction must be in (0, 1] (got {})",
                self.stake_fraction
            )));
        }
        if !self.starting_bankroll.is_finite() || self.starting_bankroll <= 0.0 {
            return Err(ModelError::config("starting_bankroll must be positive"));
        }
        if self.games_per_matchup == 0 || self.games_per_matchup % 2 != 0 {
            return Err(ModelError::config(format!(
                "games_per_matchup must be a positive even number (got {})",
                self.games_per_matchup
            )));
        }
        Ok(())
    }

    /// Round-robin season size implied by the schedule parameter.
    pub fn projected_season_games(&self, team_count: usize) -> usize {
        team_count * team_count.saturating_sub(1) / 2 * self.games_per_matchup as usize
    }
}

/// Chronological bankroll simulation over settled games. Unsettled fixtures
/// (no final score) are skipped. A tied final score refunds the stake.
pub fn simulate_season(
    rows: &[(PredictionRow, MarketOdds)],
    config: &SimConfig,
) -> Result<SeasonPnl, ModelError> {
    config.validate()?;

    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| (rows[i].0.fixture.date, rows[i].0.fixture.game_id));

    let mut bankroll = config.starting_bankroll;
    let mut pnl = SeasonPnl {
        starting_bankroll: config.starting_bankroll,
        ..SeasonPnl::default()
    };

    for i in order {
        let (row, odds) = &rows[i];
        let (Some(home_pts), Some(away_pts)) = (row.fixture.home_pts, row.fixture.away_pts) else {
            continue;
        };
        let (r_home, r_away) = r_values(row, odds, config.mode)?;

        let sides = [
            (Side::Home, r_home, odds.home_odds, &row.fixture.home_team),
            (Side::Away, r_away, odds.away_odds, &row.fixture.away_team),
        ];
        for (side, r, side_odds, team) in sides {
            if !config.band.contains(r) || bankroll <= 0.0 {
                continue;
            }
            let stake = bankroll * config.stake_fraction;
            let won = match side {
                Side::Home => home_pts > away_pts,
                Side::Away => away_pts > home_pts,
            };
            let profit = if home_pts == away_pts {
                0.0
            } else if won {
                stake * (side_odds - 1.0)
            } else {
                -stake
            };
            bankroll += profit;
            if won {
                pnl.wins += 1;
            }
            pnl.bets.push(SettledBet {
                game_id: row.fixture.game_id,
                date: row.fixture.date,
                side,
                team: team.clone(),
                r_value: r,
                odds: side_odds,
                stake,
                profit,
                won,
            });
        }
    }

    pnl.final_bankroll = bankroll;
    Ok(pnl)
}

#[derive(Debug, Clone)]
pub struct BandSearchResult {
    pub band: BetBand,
    pub profit: f64,
    pub roi: f64,
    pub bets: usize,
}

/// Exhaustive sweep of (low, high) bands at `step` granularity over
/// `[range_low, range_high]`, best profit first. Pure enumeration; each
/// band is an independent simulation, so the sweep runs on the rayon pool.
pub fn band_grid_search(
    rows: &[(PredictionRow, MarketOdds)],
    base: &SimConfig,
    range_low: f64,
    range_high: f64,
    step: f64,
) -> Result<Vec<BandSearchResult>, ModelError> {
    if !(step.is_finite() && step > 0.0) || range_low >= range_high {
        return Err(ModelError::config(format!(
            "bad band sweep range [{range_low}, {range_high}] step {step}"
        )));
    }

    let n = ((range_high - range_low) / step).round() as usize;
    let mut bands = Vec::new();
    for i in 0..n {
        for j in (i + 1)..=n {
            bands.push(BetBand {
                low: range_low + step * i as f64,
                high: range_low + step * j as f64,
            });
        }
    }

    let mut results: Vec<BandSearchResult> = bands
        .par_iter()
        .map(|band| {
            let config = SimConfig {
                band: *band,
                ..base.clone()
            };
            simulate_season(rows, &config).map(|pnl| BandSearchResult {
                band: *band,
                profit: pnl.profit(),
                roi: pnl.roi(),
                bets: pnl.bets.len(),
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    results.sort_by(|a, b| b.profit.partial_cmp(&a.profit).unwrap_or(std::cmp::Ordering::Equal));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::Fixture;

    fn row(
        game_id: u64,
        date: &str,
        home_prob: f64,
        scores: Option<(u32, u32)>,
    ) -> PredictionRow {
        PredictionRow {
            fixture: Fixture {
                game_id,
                date: date.parse().unwrap(),
                home_team: "HOME".to_string(),
                away_team: "AWAY".to_string(),
                home_pts: scores.map(|(h, _)| h),
                away_pts: scores.map(|(_, a)| a),
            },
            home_mean: 100.0,
            away_mean: 100.0,
            home_win_prob: home_prob,
            away_win_prob: 1.0 - home_prob,
        }
    }

    fn odds(game_id: u64, home: f64, away: f64) -> MarketOdds {
        MarketOdds {
            game_id,
            book: "book".to_string(),
            home_odds: home,
            away_odds: away,
        }
    }

    #[test]
    fn scenario_d_r_values_and_band_flags() {
        // home_prob=0.6 @ 2.0, away_prob=0.4 @ 2.5, overround removed.
        let r = row(1, "2025-01-01", 0.6, None);
        let o = odds(1, 2.0, 2.5);
        let (rh, ra) = r_values(&r, &o, RValueMode::ProbabilityRatio).unwrap();
        // implied: 0.5 / 0.4 -> normalized 5/9 and 4/9. The home ratio is
        // exactly 1.08 in real arithmetic even though the f64 chain lands a
        // hair below it; flooring must not shave the cent off.
        assert_eq!(rh, 1.08, "rh={rh}");
        assert_eq!(ra, 0.90, "ra={ra}");

        let band = BetBand {
            low: 1.55,
            high: 2.05,
        };
        assert!(!band.contains(rh));
        assert!(!band.contains(ra));
    }

    #[test]
    fn odds_ratio_mode_multiplies_probability_by_market_odds() {
        let r = row(1, "2025-01-01", 0.6, None);
        let o = odds(1, 2.0, 2.5);
        let (rh, ra) = r_values(&r, &o, RValueMode::OddsRatio).unwrap();
        assert!((rh - 1.20).abs() < 1e-9);
        assert!((ra - 1.00).abs() < 1e-9);
    }

    #[test]
    fn band_is_half_open_at_the_high_end() {
        let band = BetBand {
            low: 1.00,
            high: 1.20,
        };
        assert!(band.contains(1.00));
        assert!(band.contains(1.19));
        assert!(!band.contains(1.20));
    }

    #[test]
    fn exact_hundredth_r_lands_on_its_band_boundary() {
        // 0.6 * 1.80 is 1.08 in real arithmetic but a shade under in f64;
        // a band opening at exactly 1.08 must still flag it.
        let r = row(1, "2025-01-01", 0.6, None);
        let o = odds(1, 1.80, 2.5);
        let (rh, _) = r_values(&r, &o, RValueMode::OddsRatio).unwrap();
        assert_eq!(rh, 1.08);
        let band = BetBand {
            low: 1.08,
            high: 1.55,
        };
        assert!(band.contains(rh));
    }

    #[test]
    fn r_values_are_floored_to_two_decimals() {
        let r = row(1, "2025-01-01", 0.5555, None);
        let o = odds(1, 2.0, 2.0);
        let (rh, _) = r_values(&r, &o, RValueMode::ProbabilityRatio).unwrap();
        assert_eq!(rh, 1.11); // 1.111 floors, never rounds up
    }

    #[test]
    fn simulation_tracks_bankroll_through_wins_and_losses() {
        let rows = vec![
            // Home flagged (r = 1.20 in odds-ratio mode) and home wins.
            (row(1, "2025-01-01", 0.6, Some((110, 100))), odds(1, 2.0, 2.5)),
            // Home flagged again but loses this time.
            (row(2, "2025-01-02", 0.6, Some((95, 100))), odds(2, 2.0, 2.5)),
        ];
        let config = SimConfig {
            band: BetBand {
                low: 1.15,
                high: 1.30,
            },
            mode: RValueMode::OddsRatio,
            stake_fraction: 0.10,
            starting_bankroll: 100.0,
            games_per_matchup: 2,
        };
        let pnl = simulate_season(&rows, &config).unwrap();
        assert_eq!(pnl.bets.len(), 2);
        assert_eq!(pnl.wins, 1);
        // 100 -> +10 (win at 2.0) -> stake 11 lost -> 99.
        assert!((pnl.final_bankroll - 99.0).abs() < 1e-9);
        assert!(pnl.profit() < 0.0);
    }

    #[test]
    fn unsettled_games_are_skipped() {
        let rows = vec![(row(1, "2025-01-01", 0.6, None), odds(1, 2.0, 2.5))];
        let pnl = simulate_season(&rows, &SimConfig::default()).unwrap();
        assert!(pnl.bets.is_empty());
        assert_eq!(pnl.final_bankroll, pnl.starting_bankroll);
    }

    #[test]
    fn odd_games_per_matchup_fails_fast() {
        let config = SimConfig {
            games_per_matchup: 3,
            ..SimConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn grid_search_orders_bands_by_profit() {
        let rows = vec![
            (row(1, "2025-01-01", 0.6, Some((110, 100))), odds(1, 2.0, 2.5)),
            (row(2, "2025-01-02", 0.6, Some((112, 101))), odds(2, 2.0, 2.5)),
        ];
        let base = SimConfig {
            mode: RValueMode::OddsRatio,
            ..SimConfig::default()
        };
        let results = band_grid_search(&rows, &base, 0.80, 1.60, 0.05).unwrap();
        assert!(!results.is_empty());
        // Best band must capture the two winning home bets at r = 1.20.
        let best = &results[0];
        assert!(best.band.low <= 1.20 && best.band.high > 1.20);
        assert!(best.profit > 0.0);
        for pair in results.windows(2) {
            assert!(pair[0].profit >= pair[1].profit);
        }
    }

    #[test]
    fn projected_season_volume_uses_the_matchup_parameter() {
        let config = SimConfig::default();
        // 4 teams, 6 matchups, 4 games each.
        assert_eq!(config.projected_season_games(4), 24);
    }
}
