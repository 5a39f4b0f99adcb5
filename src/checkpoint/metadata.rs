use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar metrics keyed by name. A `BTreeMap` keeps serialized key order
/// stable.
pub type Metrics = BTreeMap<String, f64>;

/// Name of the metric that drives improvement, stall and regression
/// decisions.
pub const PRIMARY_METRIC: &str = "token_accuracy";

/// Directory name for a checkpoint at `step`.
pub fn step_tag(step: u64) -> String {
    format!("step-{step:06}")
}

/// Step number encoded in a checkpoint directory name. Accepts the
/// `step-000500` form written by this crate and the `checkpoint-500` form
/// written by common trainer libraries.
pub fn parse_step_tag(tag: &str) -> Option<u64> {
    let digits = tag
        .strip_prefix("step-")
        .or_else(|| tag.strip_prefix("checkpoint-"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Primary metric value, accepting the `eval_`-prefixed spelling.
pub fn primary_metric(metrics: &Metrics) -> Option<f64> {
    metrics
        .get(PRIMARY_METRIC)
        .or_else(|| metrics.get(&format!("eval_{PRIMARY_METRIC}")))
        .copied()
        .filter(|v| v.is_finite())
}

/// Split `metrics` into its finite values and the names of the non-finite
/// ones. JSON has no NaN or infinity, so only the finite part is persisted.
pub fn finite_metrics(metrics: &Metrics) -> (Metrics, Vec<String>) {
    let mut dropped = Vec::new();
    let kept = metrics
        .iter()
        .filter(|(name, value)| {
            let keep = value.is_finite();
            if !keep {
                dropped.push(name.to_string());
            }
            keep
        })
        .map(|(name, value)| (name.clone(), *value))
        .collect();
    (kept, dropped)
}

/// One evaluation event as persisted to `metrics/eval-step-<step>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub step: u64,
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl EvalRecord {
    pub fn new(step: u64, metrics: Metrics) -> Self {
        EvalRecord { step, metrics }
    }

    pub fn primary(&self) -> Option<f64> {
        primary_metric(&self.metrics)
    }
}
