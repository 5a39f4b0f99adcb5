use crate::checkpoint::EvalRecord;

/// Position-wise match rate over whitespace tokens of zipped
/// prediction/label pairs.
pub fn token_accuracy<P, L>(predictions: &[P], labels: &[L]) -> f64
where
    P: AsRef<str>,
    L: AsRef<str>,
{
    let mut total = 0usize;
    let mut correct = 0usize;
    for (pred, label) in predictions.iter().zip(labels) {
        for (p, l) in pred
            .as_ref()
            .split_whitespace()
            .zip(label.as_ref().split_whitespace())
        {
            total += 1;
            if p == l {
                correct += 1;
            }
        }
    }
    if total == 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}

/// Fraction of prediction/label pairs that match exactly.
pub fn sequence_accuracy<P, L>(predictions: &[P], labels: &[L]) -> f64
where
    P: AsRef<str>,
    L: AsRef<str>,
{
    let pairs = predictions.len().min(labels.len());
    if pairs == 0 {
        return 0.0;
    }
    let matches = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p.as_ref() == l.as_ref())
        .count();
    matches as f64 / pairs as f64
}

/// Append-only record of evaluation events for one run.
#[derive(Debug, Clone, Default)]
pub struct EvalHistory {
    records: Vec<EvalRecord>,
}

impl EvalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EvalRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EvalRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvalRecord> {
        self.records.iter()
    }

    /// `(step, token_accuracy)` for every event that carried the metric.
    pub fn primary_series(&self) -> Vec<(u64, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.primary().map(|v| (r.step, v)))
            .collect()
    }
}
