use serde::{Deserialize, Serialize};

/// Calibrated outputs never reach 0 or 1.
pub const PROB_FLOOR: f64 = 0.005;
pub const PROB_CEIL: f64 = 0.995;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Monotone non-decreasing piecewise-linear map from raw to calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicMap {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Default for IsotonicMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl IsotonicMap {
    pub fn identity() -> Self {
        Self {
            xs: vec![0.0, 1.0],
            ys: vec![0.0, 1.0],
        }
    }

    /// Pool-adjacent-violators over raw probabilities sorted ascending. Tied raw values
    /// are merged first so the map stays a function. Falls back to identity when
    /// there is nothing to fit.
    pub fn fit(raw: &[f64], outcomes: &[u8]) -> Self {
        if raw.is_empty() || raw.len() != outcomes.len() {
            return Self::identity();
        }
        let mut pairs: Vec<(f64, f64)> = raw
            .iter()
            .zip(outcomes)
            .map(|(p, y)| (p.clamp(0.0, 1.0), f64::from(*y)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (x, weighted y sum, weight)
        let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs.len());
        for (x, y) in pairs {
            if let Some(last) = blocks.last_mut()
                && last.0 == x
            {
                last.1 += y;
                last.2 += 1.0;
                continue;
            }
            blocks.push((x, y, 1.0));
        }

        // Pooled blocks keep the weighted mean x and y.
        let mut pooled: Vec<(f64, f64, f64)> = Vec::with_capacity(blocks.len());
        for (x, ysum, w) in blocks {
            let mut cur = (x * w, ysum, w);
            while let Some(&(px, py, pw)) = pooled.last() {
                if py / pw <= cur.1 / cur.2 {
                    break;
                }
                pooled.pop();
                cur = (cur.0 + px, cur.1 + py, cur.2 + pw);
            }
            pooled.push(cur);
        }

        let xs: Vec<f64> = pooled.iter().map(|(xw, _, w)| xw / w).collect();
        let ys: Vec<f64> = pooled
            .iter()
            .map(|(_, y, w)| (y / w).clamp(PROB_FLOOR, PROB_CEIL))
            .collect();
        Self { xs, ys }
    }

    /// Linear interpolation between knots, flat beyond the ends. NaN maps to a toss-up.
    pub fn apply(&self, raw: f64) -> f64 {
        let raw = if raw.is_nan() { 0.5 } else { raw };
        let (Some(&first_x), Some(&last_x)) = (self.xs.first(), self.xs.last()) else {
            return raw.clamp(PROB_FLOOR, PROB_CEIL);
        };
        let out = if raw <= first_x {
            self.ys[0]
        } else if raw >= last_x {
            self.ys[self.ys.len() - 1]
        } else {
            let hi = self.xs.partition_point(|x| *x <= raw).max(1);
            let lo = hi - 1;
            let span = self.xs[hi] - self.xs[lo];
            if span <= 0.0 {
                self.ys[hi]
            } else {
                let t = (raw - self.xs[lo]) / span;
                self.ys[lo] + t * (self.ys[hi] - self.ys[lo])
            }
        };
        out.clamp(PROB_FLOOR, PROB_CEIL)
    }

    pub fn is_monotonic(&self) -> bool {
        self.xs.len() == self.ys.len()
            && self.xs.windows(2).all(|w| w[0] <= w[1])
            && self.ys.windows(2).all(|w| w[0] <= w[1])
    }
}

pub fn calibration_bins(predictions: &[f64], outcomes: &[u8], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        actual_sum[idx] += f64::from(*outcome);
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Count-weighted gap between predicted and observed rates.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum::<f64>()
        / total as f64
}
