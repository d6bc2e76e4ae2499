use crate::error::ModelError;

/// Final scores are summed over 0..=MAX_POINTS per side. NBA-scale scoring
/// means the Poisson mass above 199 is negligible for any sane mean.
pub const MAX_POINTS: usize = 199;

/// Unnormalized win probabilities from two independent Poisson margins.
/// Ties are excluded from both sides, so the pair does not sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct WinProbs {
    pub home: f64,
    pub away: f64,
}

impl WinProbs {
    /// Rescale the pair to sum to exactly 1.0.
    pub fn rescaled(self, home_mean: f64, away_mean: f64) -> Result<(f64, f64), ModelError> {
        let sum = self.home + self.away;
        if sum <= 0.0 {
            return Err(ModelError::DegenerateProbability {
                home_mean,
                away_mean,
            });
        }
        Ok((self.home / sum, self.away / sum))
    }
}

/// P(home scores strictly more) and P(away scores strictly more) over final
/// scores 0..=199, each side an independent Poisson with the given mean.
pub fn win_probs(home_mean: f64, away_mean: f64) -> Result<WinProbs, ModelError> {
    if !home_mean.is_finite() || !away_mean.is_finite() || home_mean < 0.0 || away_mean < 0.0 {
        return Err(ModelError::config(format!(
            "poisson means must be finite and non-negative (home={home_mean}, away={away_mean})"
        )));
    }

    let pmf_home = poisson_pmf(home_mean, MAX_POINTS);
    let pmf_away = poisson_pmf(away_mean, MAX_POINTS);

    // cdf_below[k] = P(side < k).
    let cdf_below_home = cdf_below(&pmf_home);
    let cdf_below_away = cdf_below(&pmf_away);

    let mut home = 0.0;
    let mut away = 0.0;
    for k in 0..=MAX_POINTS {
        home += pmf_home[k] * cdf_below_away[k];
        away += pmf_away[k] * cdf_below_home[k];
    }

    Ok(WinProbs { home, away })
}

fn poisson_pmf(mean: f64, max_k: usize) -> Vec<f64> {
    let mut out = vec![0.0; max_k + 1];
    out[0] = (-mean).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * mean / k as f64;
    }
    out
}

fn cdf_below(pmf: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; pmf.len()];
    let mut acc = 0.0;
    for (k, p) in pmf.iter().enumerate() {
        out[k] = acc;
        acc += p;
    }
    out
}
