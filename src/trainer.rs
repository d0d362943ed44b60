use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{ChronologicalSplit, MatchupRecord};
use crate::error::PipelineError;
use crate::evaluation::{Metrics, evaluate_probs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Inverse regularization strengths to sweep (larger = weaker penalty).
    pub c_grid: Vec<f64>,
    /// Used when the validation season is too small to select from the grid.
    pub default_c: f64,
    pub min_validation_rows: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Validation log-loss differences below this count as ties.
    pub selection_resolution: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            c_grid: vec![0.001, 0.01, 0.1, 1.0, 10.0],
            default_c: 1.0,
            min_validation_rows: 50,
            max_iterations: 50,
            tolerance: 1e-8,
            selection_resolution: 1e-4,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.c_grid.is_empty() {
            return Err("c_grid is empty".to_string());
        }
        if let Some(bad) = self
            .c_grid
            .iter()
            .chain(std::iter::once(&self.default_c))
            .find(|c| !(c.is_finite() && **c > 0.0))
        {
            return Err(format!("regularization strength {bad} must be positive"));
        }
        if self.selection_resolution <= 0.0 {
            return Err("selection_resolution must be positive".to_string());
        }
        Ok(())
    }
}

/// L2-regularized logistic regression over standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LogisticModel {
    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    pub fn decision(&self, x: &[f64]) -> f64 {
        let mut z = self.intercept;
        for (j, v) in x.iter().enumerate().take(self.weights.len()) {
            z += self.weights[j] * (v - self.means[j]) / self.scales[j];
        }
        z
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.decision(x))
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// Damped Newton on `mean log-loss + ||w||^2 / (2 C n)`; the intercept is not penalized.
pub fn fit_logistic(
    x: &[&[f64]],
    y: &[u8],
    c: f64,
    max_iterations: usize,
    tolerance: f64,
) -> LogisticModel {
    let n = x.len();
    let d = x.first().map(|r| r.len()).unwrap_or(0);
    let mut means = vec![0.0; d];
    let mut scales = vec![1.0; d];
    if n == 0 {
        return LogisticModel {
            means,
            scales,
            weights: vec![0.0; d],
            intercept: 0.0,
            iterations: 0,
            converged: false,
        };
    }

    for row in x {
        for (j, v) in row.iter().enumerate() {
            means[j] += v;
        }
    }
    for m in &mut means {
        *m /= n as f64;
    }
    let mut var = vec![0.0; d];
    for row in x {
        for (j, v) in row.iter().enumerate() {
            var[j] += (v - means[j]).powi(2);
        }
    }
    for (s, v) in scales.iter_mut().zip(&var) {
        let sd = (v / n as f64).sqrt();
        *s = if sd > 1e-12 { sd } else { 1.0 };
    }

    // Design rows with a leading 1 for the intercept.
    let dim = d + 1;
    let z: Vec<Vec<f64>> = x
        .iter()
        .map(|row| {
            let mut out = Vec::with_capacity(dim);
            out.push(1.0);
            out.extend(row.iter().enumerate().map(|(j, v)| (v - means[j]) / scales[j]));
            out
        })
        .collect();
    let targets: Vec<f64> = y.iter().map(|&v| f64::from(v)).collect();
    let lambda = 1.0 / (c * n as f64);

    let objective = |beta: &[f64]| -> f64 {
        let mut loss = 0.0;
        for (row, t) in z.iter().zip(&targets) {
            let eta = dot(row, beta);
            loss += softplus(eta) - t * eta;
        }
        let penalty: f64 = beta[1..].iter().map(|b| b * b).sum();
        loss / n as f64 + 0.5 * lambda * penalty
    };

    let mut beta = vec![0.0; dim];
    let mut current = objective(&beta);
    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        let mut grad = vec![0.0; dim];
        let mut hess = vec![0.0; dim * dim];
        for (row, t) in z.iter().zip(&targets) {
            let p = sigmoid(dot(row, &beta));
            let r = p - t;
            let w = p * (1.0 - p);
            for j in 0..dim {
                grad[j] += r * row[j];
                let a = w * row[j];
                if a == 0.0 {
                    continue;
                }
                let hrow = &mut hess[j * dim..(j + 1) * dim];
                for k in j..dim {
                    hrow[k] += a * row[k];
                }
            }
        }
        for j in 0..dim {
            grad[j] /= n as f64;
            for k in j..dim {
                hess[j * dim + k] /= n as f64;
            }
            hess[j * dim + j] += 1e-10;
            if j > 0 {
                grad[j] += lambda * beta[j];
                hess[j * dim + j] += lambda;
            }
        }
        for j in 0..dim {
            for k in 0..j {
                hess[j * dim + k] = hess[k * dim + j];
            }
        }

        let direction = solve_spd(&mut hess, &grad, dim).unwrap_or_else(|| grad.clone());

        let mut step = 1.0;
        let mut accepted = None;
        while step > 1e-6 {
            let candidate: Vec<f64> = beta
                .iter()
                .zip(&direction)
                .map(|(b, dir)| b - step * dir)
                .collect();
            let value = objective(&candidate);
            if value.is_finite() && value <= current {
                accepted = Some((candidate, value));
                break;
            }
            step *= 0.5;
        }
        let Some((next, value)) = accepted else {
            converged = true;
            break;
        };

        let max_move = direction
            .iter()
            .map(|v| (v * step).abs())
            .fold(0.0_f64, f64::max);
        let improvement = current - value;
        beta = next;
        current = value;
        if max_move < tolerance || improvement < tolerance * tolerance {
            converged = true;
            break;
        }
    }

    LogisticModel {
        means,
        scales,
        weights: beta[1..].to_vec(),
        intercept: beta[0],
        iterations,
        converged,
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cholesky solve of `a x = b`; `a` is overwritten. `None` when `a` is not positive definite.
fn solve_spd(a: &mut [f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    for j in 0..n {
        let mut diag = a[j * n + j];
        for k in 0..j {
            diag -= a[j * n + k] * a[j * n + k];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return None;
        }
        let diag = diag.sqrt();
        a[j * n + j] = diag;
        for i in (j + 1)..n {
            let mut v = a[i * n + j];
            for k in 0..j {
                v -= a[i * n + k] * a[j * n + k];
            }
            a[i * n + j] = v / diag;
        }
    }
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut v = b[i];
        for k in 0..i {
            v -= a[i * n + k] * y[k];
        }
        y[i] = v / a[i * n + i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = y[i];
        for k in (i + 1)..n {
            v -= a[k * n + i] * x[k];
        }
        x[i] = v / a[i * n + i];
    }
    Some(x)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub c: f64,
    pub validation: Metrics,
    pub iterations: usize,
    pub converged: bool,
}

/// Selection order: validation log-loss (quantized to `resolution`), then accuracy, then
/// ROC-AUC, then the smaller C. `Ordering::Less` means `a` is preferred.
pub fn compare_grid_points(a: &GridPoint, b: &GridPoint, resolution: f64) -> Ordering {
    let quantize = |v: f64| (v / resolution).round() as i64;
    quantize(a.validation.log_loss)
        .cmp(&quantize(b.validation.log_loss))
        .then_with(|| b.validation.accuracy.total_cmp(&a.validation.accuracy))
        .then_with(|| b.validation.roc_auc.total_cmp(&a.validation.roc_auc))
        .then_with(|| a.c.total_cmp(&b.c))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainingWarning {
    SmallValidation {
        rows: usize,
        minimum: usize,
        fallback_c: f64,
    },
    NotConverged {
        c: f64,
        iterations: usize,
    },
    SingleClassTraining {
        label: u8,
    },
}

impl fmt::Display for TrainingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingWarning::SmallValidation {
                rows,
                minimum,
                fallback_c,
            } => write!(
                f,
                "validation has {rows} rows (< {minimum}); using fallback C={fallback_c}"
            ),
            TrainingWarning::NotConverged { c, iterations } => {
                write!(f, "C={c} did not converge in {iterations} iterations")
            }
            TrainingWarning::SingleClassTraining { label } => {
                write!(f, "training window only contains label {label}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub grid: Vec<GridPoint>,
    pub selected_c: f64,
    pub warnings: Vec<TrainingWarning>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub classifier: LogisticModel,
    pub report: TrainingReport,
}

#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    cfg: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(cfg: TrainerConfig) -> Self {
        Self { cfg }
    }

    /// Fits on the training window and picks C on the validation season. The held-out
    /// season is never read here. `cancel` is checked between grid points; a cancelled
    /// sweep discards everything it fitted.
    pub fn fit(
        &self,
        split: &ChronologicalSplit<'_>,
        cancel: &AtomicBool,
    ) -> Result<TrainingOutcome, PipelineError> {
        self.cfg.validate().map_err(PipelineError::InvalidConfig)?;
        if split.train.is_empty() {
            return Err(PipelineError::EmptyPartition {
                partition: "training",
                held_out: split.window.held_out_season,
            });
        }

        let (train_x, train_y) = design(&split.train);
        let (val_x, val_y) = design(&split.validation);
        let mut warnings = Vec::new();

        let positives = train_y.iter().filter(|&&v| v == 1).count();
        if positives == 0 || positives == train_y.len() {
            warnings.push(TrainingWarning::SingleClassTraining {
                label: train_y[0],
            });
        }

        let fit_at = |c: f64| {
            fit_logistic(
                &train_x,
                &train_y,
                c,
                self.cfg.max_iterations,
                self.cfg.tolerance,
            )
        };

        let mut grid = Vec::new();
        let (classifier, selected_c) = if val_y.len() < self.cfg.min_validation_rows {
            let warning = TrainingWarning::SmallValidation {
                rows: val_y.len(),
                minimum: self.cfg.min_validation_rows,
                fallback_c: self.cfg.default_c,
            };
            warn!(%warning, "skipping hyperparameter sweep");
            warnings.push(warning);
            if cancel.load(AtomicOrdering::Relaxed) {
                return Err(PipelineError::Cancelled { completed: 0 });
            }
            (fit_at(self.cfg.default_c), self.cfg.default_c)
        } else {
            let mut fitted = Vec::with_capacity(self.cfg.c_grid.len());
            for &c in &self.cfg.c_grid {
                if cancel.load(AtomicOrdering::Relaxed) {
                    return Err(PipelineError::Cancelled {
                        completed: fitted.len(),
                    });
                }
                let model = fit_at(c);
                let probs: Vec<f64> = val_x.iter().map(|x| model.predict_proba(x)).collect();
                let point = GridPoint {
                    c,
                    validation: evaluate_probs(&probs, &val_y),
                    iterations: model.iterations,
                    converged: model.converged,
                };
                info!(
                    c,
                    log_loss = point.validation.log_loss,
                    accuracy = point.validation.accuracy,
                    roc_auc = point.validation.roc_auc,
                    "grid point"
                );
                grid.push(point);
                fitted.push(model);
            }
            let best = (0..grid.len())
                .min_by(|&a, &b| {
                    compare_grid_points(&grid[a], &grid[b], self.cfg.selection_resolution)
                })
                .unwrap_or(0);
            let c = grid[best].c;
            (fitted.swap_remove(best), c)
        };

        if !classifier.converged {
            warnings.push(TrainingWarning::NotConverged {
                c: selected_c,
                iterations: classifier.iterations,
            });
        }
        info!(
            selected_c,
            train_rows = train_y.len(),
            validation_rows = val_y.len(),
            "model selected"
        );

        Ok(TrainingOutcome {
            classifier,
            report: TrainingReport {
                train_rows: train_y.len(),
                validation_rows: val_y.len(),
                grid,
                selected_c,
                warnings,
            },
        })
    }
}

fn design<'a>(rows: &[&'a MatchupRecord]) -> (Vec<&'a [f64]>, Vec<u8>) {
    rows.iter()
        .filter_map(|r| r.label.map(|y| (r.values.as_slice(), y)))
        .unzip()
}
