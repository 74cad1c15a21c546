use super::types::{Failure, FailureContext, FailureType};

/// Classifies raw execution faults into the closed failure taxonomy.
pub struct FailureDetector;

impl FailureDetector {
    /// Builds a [`Failure`] from the raw error and context. Classification
    /// matches explicit markers only; anything ambiguous falls through to
    /// `ExecutionFailed` so downstream analysis decides, rather than a guess
    /// here steering recovery wrong.
    pub fn detect(action: &str, error: &str, context: FailureContext) -> Failure {
        let failure_type = Self::classify(error, &context);
        Failure::new(failure_type, action, error, context)
    }

    pub fn classify(error: &str, context: &FailureContext) -> FailureType {
        let msg = error.to_lowercase();

        if msg.contains("precondition") || msg.contains("prerequisite") {
            return FailureType::PreconditionFailed;
        }
        if msg.contains("timed out")
            || msg.contains("timeout")
            || msg.contains("deadline exceeded")
        {
            return FailureType::TimeoutExceeded;
        }
        if msg.contains("quality gate")
            || msg.contains("lint")
            || msg.contains("test failed")
            || msg.contains("verification failed")
        {
            return FailureType::QualityGateFailed;
        }
        if msg.contains("resource")
            || msg.contains("capacity")
            || msg.contains("unavailable")
            || msg.contains("exhausted")
            || msg.contains("no workers")
        {
            return FailureType::ResourceUnavailable;
        }
        if msg.contains("dependency")
            || msg.contains("blocked")
            || !context.incomplete_dependencies().is_empty()
        {
            return FailureType::DependencyBlocked;
        }

        FailureType::ExecutionFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: &str) -> FailureType {
        FailureDetector::classify(error, &FailureContext::new())
    }

    #[test]
    fn test_precondition_markers() {
        assert_eq!(
            classify("precondition 'artifact_built' not satisfied"),
            FailureType::PreconditionFailed
        );
    }

    #[test]
    fn test_timeout_markers() {
        assert_eq!(classify("operation timed out after 30s"), FailureType::TimeoutExceeded);
        assert_eq!(classify("deadline exceeded"), FailureType::TimeoutExceeded);
    }

    #[test]
    fn test_resource_markers() {
        assert_eq!(classify("no workers with free capacity"), FailureType::ResourceUnavailable);
        assert_eq!(classify("resource pool exhausted"), FailureType::ResourceUnavailable);
    }

    #[test]
    fn test_quality_markers() {
        assert_eq!(classify("quality gate rejected the change"), FailureType::QualityGateFailed);
        assert_eq!(classify("test failed: 3 assertions"), FailureType::QualityGateFailed);
    }

    #[test]
    fn test_dependency_from_context() {
        let context = FailureContext::new().with_dependency("schema-migration", false);
        assert_eq!(
            FailureDetector::classify("upstream not ready", &context),
            FailureType::DependencyBlocked
        );
    }

    #[test]
    fn test_default_is_execution_failed() {
        assert_eq!(classify("segfault in step 3"), FailureType::ExecutionFailed);
        assert_eq!(classify(""), FailureType::ExecutionFailed);
    }

    #[test]
    fn test_detect_captures_context() {
        let failure = FailureDetector::detect(
            "deploy",
            "capacity limit reached",
            FailureContext::new().with_worker("w1"),
        );
        assert_eq!(failure.failure_type, FailureType::ResourceUnavailable);
        assert_eq!(failure.action, "deploy");
        assert_eq!(failure.context.worker_id.as_deref(), Some("w1"));
    }
}
