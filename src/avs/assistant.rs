use super::AvsConfig;
use crate::operation::Operation;

/// Flag set once the internal evaluation is gone
pub const INTERNAL_EVALUATION_DELETED: &str = "avs_internal_evaluation_deleted";

/// Flag set once the external evaluation is gone
pub const EXTERNAL_EVALUATION_DELETED: &str = "avs_external_evaluation_deleted";

/// Selects which evaluation a [`Delegator`](super::Delegator) acts on and
/// which flag guards it.
pub trait EvalAssistant: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Side-effect flag recording that the evaluation was deleted
    fn deleted_flag(&self) -> &'static str;

    /// Evaluation id recorded on the operation, if one was ever created
    fn evaluation_id(&self, operation: &Operation) -> Option<i64>;

    /// Parent evaluation the evaluation is referenced from
    fn parent_id(&self) -> i64;

    fn is_already_deleted(&self, operation: &Operation) -> bool {
        operation.side_effect_flags.is_set(self.deleted_flag())
    }

    fn set_deleted(&self, operation: &mut Operation) {
        operation.side_effect_flags.set(self.deleted_flag());
    }
}

#[derive(Debug, Clone)]
pub struct InternalEvalAssistant {
    parent_id: i64,
}

impl InternalEvalAssistant {
    pub fn new(config: &AvsConfig) -> Self {
        Self {
            parent_id: config.internal_tester_parent_id,
        }
    }
}

impl EvalAssistant for InternalEvalAssistant {
    fn name(&self) -> &str {
        "internal"
    }

    fn deleted_flag(&self) -> &'static str {
        INTERNAL_EVALUATION_DELETED
    }

    fn evaluation_id(&self, operation: &Operation) -> Option<i64> {
        operation.avs.internal_evaluation_id
    }

    fn parent_id(&self) -> i64 {
        self.parent_id
    }
}

#[derive(Debug, Clone)]
pub struct ExternalEvalAssistant {
    parent_id: i64,
}

impl ExternalEvalAssistant {
    pub fn new(config: &AvsConfig) -> Self {
        Self {
            parent_id: config.external_tester_parent_id,
        }
    }
}

impl EvalAssistant for ExternalEvalAssistant {
    fn name(&self) -> &str {
        "external"
    }

    fn deleted_flag(&self) -> &'static str {
        EXTERNAL_EVALUATION_DELETED
    }

    fn evaluation_id(&self, operation: &Operation) -> Option<i64> {
        operation.avs.external_evaluation_id
    }

    fn parent_id(&self) -> i64 {
        self.parent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use chrono::Utc;

    #[test]
    fn test_assistants_use_separate_flags() {
        let config = AvsConfig {
            internal_tester_parent_id: 1,
            external_tester_parent_id: 2,
            ..AvsConfig::default()
        };
        let internal = InternalEvalAssistant::new(&config);
        let external = ExternalEvalAssistant::new(&config);

        let mut op = Operation::new(OperationKind::Deprovision, "i", "{}", Utc::now());
        op.avs.internal_evaluation_id = Some(10);
        op.avs.external_evaluation_id = Some(20);

        assert_eq!(internal.evaluation_id(&op), Some(10));
        assert_eq!(external.evaluation_id(&op), Some(20));
        assert_eq!(internal.parent_id(), 1);
        assert_eq!(external.parent_id(), 2);

        internal.set_deleted(&mut op);
        assert!(internal.is_already_deleted(&op));
        assert!(!external.is_already_deleted(&op));
    }
}
