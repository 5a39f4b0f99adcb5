//! Training-loop facing types: the event/directive protocol used to drive the
//! checkpoint lifecycle, evaluation metrics and the eval history.

pub mod events;
pub mod metrics;

pub use events::{Control, Directive, TrainingEvent};
pub use metrics::{sequence_accuracy, token_accuracy, EvalHistory};
