//! Stable train/test partitioning of recordings.

mod assigner;
mod assignment;

pub use assigner::{
    assign, classify, cohort_cutoff, partition_key, partition_value, CohortAssignment, Recording,
};
pub use assignment::{Split, SplitAssignment};
