use std::fmt;

use serde::{Deserialize, Serialize};

/// Absorbs float noise in threshold comparisons.
const EPSILON: f64 = 1e-12;

/// Early-stopping and regression policy for the primary metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    /// Consecutive non-improving evals before the run stops.
    pub patience: usize,
    /// Smallest gain over the best value that counts as an improvement.
    pub min_delta: f64,
    /// Drop from the previous eval that aborts the run.
    pub regression_threshold: f64,
    /// Stop as converged once the primary metric reaches this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_token_accuracy: Option<f64>,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        EarlyStoppingConfig {
            patience: 3,
            min_delta: 0.005,
            regression_threshold: 0.05,
            target_token_accuracy: None,
        }
    }
}

/// Lifecycle state of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    StoppedConverged,
    StoppedPatienceExhausted,
    AbortedRegression,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Running => "RUNNING",
            RunState::StoppedConverged => "STOPPED_CONVERGED",
            RunState::StoppedPatienceExhausted => "STOPPED_PATIENCE_EXHAUSTED",
            RunState::AbortedRegression => "ABORTED_REGRESSION",
        };
        f.write_str(s)
    }
}

/// Why a run left the `Running` state.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Regression {
        step: u64,
        previous_step: u64,
        previous: f64,
        current: f64,
        threshold: f64,
    },
    PatienceExhausted {
        step: u64,
        best_step: u64,
        best: f64,
        current: f64,
        stalled_evals: usize,
    },
    Converged {
        step: u64,
        value: f64,
        target: f64,
    },
    Finished {
        step: Option<u64>,
    },
}

impl StopReason {
    /// Run state this reason leads to.
    pub fn state(&self) -> RunState {
        match self {
            StopReason::Regression { .. } => RunState::AbortedRegression,
            StopReason::PatienceExhausted { .. } => RunState::StoppedPatienceExhausted,
            StopReason::Converged { .. } | StopReason::Finished { .. } => {
                RunState::StoppedConverged
            }
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Regression {
                step,
                previous_step,
                previous,
                current,
                threshold,
            } => write!(
                f,
                "token_accuracy regressed at step {step}: {current:.4} vs {previous:.4} at step {previous_step} (threshold {threshold})"
            ),
            StopReason::PatienceExhausted {
                step,
                best_step,
                best,
                current,
                stalled_evals,
            } => write!(
                f,
                "no improvement for {stalled_evals} evals at step {step}: token_accuracy {current:.4}, best {best:.4} at step {best_step}"
            ),
            StopReason::Converged {
                step,
                value,
                target,
            } => write!(
                f,
                "converged at step {step}: token_accuracy {value:.4} reached target {target}"
            ),
            StopReason::Finished { step: Some(step) } => {
                write!(f, "training finished at step {step}")
            }
            StopReason::Finished { step: None } => f.write_str("training finished before any step"),
        }
    }
}

/// Outcome of feeding one primary-metric value to the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Improved {
        previous_best: Option<f64>,
        converged: Option<StopReason>,
    },
    Stalled {
        count: usize,
        exhausted: Option<StopReason>,
    },
    Regressed(StopReason),
}

/// Tracks previous, best and stall count across evaluations.
#[derive(Debug, Clone)]
pub struct EvalPolicy {
    config: EarlyStoppingConfig,
    previous: Option<(u64, f64)>,
    best: Option<(u64, f64)>,
    stalled: usize,
}

impl EvalPolicy {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        EvalPolicy {
            config,
            previous: None,
            best: None,
            stalled: 0,
        }
    }

    pub fn config(&self) -> &EarlyStoppingConfig {
        &self.config
    }

    /// Best `(step, value)` seen so far.
    pub fn best(&self) -> Option<(u64, f64)> {
        self.best
    }

    pub fn previous(&self) -> Option<(u64, f64)> {
        self.previous
    }

    pub fn stalled(&self) -> usize {
        self.stalled
    }

    pub fn observe(&mut self, step: u64, value: f64) -> Verdict {
        let previous = self.previous.replace((step, value));
        if let Some((previous_step, prev)) = previous {
            if prev - value > self.config.regression_threshold + EPSILON {
                return Verdict::Regressed(StopReason::Regression {
                    step,
                    previous_step,
                    previous: prev,
                    current: value,
                    threshold: self.config.regression_threshold,
                });
            }
        }

        let improved = match self.best {
            None => true,
            Some((_, best)) => value - best + EPSILON >= self.config.min_delta,
        };
        if improved {
            let previous_best = self.best.map(|(_, v)| v);
            self.best = Some((step, value));
            self.stalled = 0;
            let converged = self
                .config
                .target_token_accuracy
                .filter(|target| value >= *target)
                .map(|target| StopReason::Converged {
                    step,
                    value,
                    target,
                });
            return Verdict::Improved {
                previous_best,
                converged,
            };
        }

        self.stalled += 1;
        let exhausted = (self.stalled >= self.config.patience).then(|| {
            let (best_step, best) = self.best.unwrap_or((step, value));
            StopReason::PatienceExhausted {
                step,
                best_step,
                best,
                current: value,
                stalled_evals: self.stalled,
            }
        });
        Verdict::Stalled {
            count: self.stalled,
            exhausted,
        }
    }
}
