use std::path::PathBuf;

use crate::checkpoint::{Metrics, StopReason};

/// Events a training loop reports to the checkpoint lifecycle, in step order.
#[derive(Debug, Clone)]
pub enum TrainingEvent {
    Eval { step: u64, metrics: Metrics },
    CheckpointSaved { step: u64, path: PathBuf },
    Log { step: u64, scalars: Metrics },
    Finished,
}

/// Whether the training loop keeps going.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Continue,
    Stop(StopReason),
    /// Stop immediately and do not save or promote the current weights.
    Abort(StopReason),
}

/// Instruction returned for every event.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Step the caller should materialize a checkpoint for, then report back
    /// with [`TrainingEvent::CheckpointSaved`].
    pub save_checkpoint: Option<u64>,
    pub control: Control,
}

impl Directive {
    pub fn proceed() -> Self {
        Directive {
            save_checkpoint: None,
            control: Control::Continue,
        }
    }

    pub fn save(step: u64) -> Self {
        Directive {
            save_checkpoint: Some(step),
            control: Control::Continue,
        }
    }

    pub fn stop(reason: StopReason) -> Self {
        Directive {
            save_checkpoint: None,
            control: Control::Stop(reason),
        }
    }

    pub fn abort(reason: StopReason) -> Self {
        Directive {
            save_checkpoint: None,
            control: Control::Abort(reason),
        }
    }

    pub fn should_stop(&self) -> bool {
        !matches!(self.control, Control::Continue)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.control, Control::Abort(_))
    }
}
