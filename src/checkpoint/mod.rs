//! Checkpoint lifecycle: `latest` / `best` pointers, bounded retention,
//! regression abort and patience-based early stopping.

mod manager;
mod metadata;
mod metrics_store;
mod pointer;
mod policy;
mod retention;

pub use manager::{CheckpointLifecycle, CheckpointManagerConfig, Finalize, Registration};
pub use metadata::{
    finite_metrics, parse_step_tag, primary_metric, step_tag, EvalRecord, Metrics, PRIMARY_METRIC,
};
pub use metrics_store::MetricsStore;
pub use pointer::{read_pointer, resolve_pointer, update_pointer, Pointer};
pub use policy::{EarlyStoppingConfig, EvalPolicy, RunState, StopReason, Verdict};
pub use retention::{PruneReport, RetainedCheckpoint, RetentionWindow};
