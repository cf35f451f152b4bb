//! Steps run while deprovisioning an instance.

mod avs_evaluations;

pub use avs_evaluations::AvsEvaluationRemovalStep;
