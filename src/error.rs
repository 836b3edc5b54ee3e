use std::time::Duration;

// ============================================================================
// Pipeline Error Taxonomy
// ============================================================================
//
// - PublishError: outcomes of a single publish attempt. The publisher never
//   retries; retry ownership lives in the coordinator.
// - ProcessingError: business-handler failures, split into transient
//   (retryable with backoff) and permanent (straight to dead-letter).
// - DeadLetterFailure: the dead-letter publish itself failed. Fatal, never
//   retried, surfaced as a top-severity alert.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Transport rejected or failed the send. Retryable by the coordinator.
    #[error("publish failed: {0}")]
    Failed(String),

    /// Requested partition is outside the topic's range. Not retryable.
    #[error("partition {requested} out of range (topic has {available} partitions)")]
    InvalidPartition { requested: i32, available: i32 },

    /// The caller stopped waiting. Says nothing about the in-flight publish,
    /// which may still complete; the caller must not re-send.
    #[error("timed out waiting for delivery after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// Transient business failure, worth re-attempting after backoff.
    #[error("transient processing failure: {0}")]
    Transient(String),

    /// Permanent failure (e.g. malformed payload). Skips retry entirely.
    #[error("permanent processing failure: {0}")]
    Permanent(String),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }
}

/// The dead-letter send failed after retry exhaustion. The message is not
/// re-queued; external intervention is required.
#[derive(Debug, thiserror::Error)]
#[error(
    "dead-letter publish failed for {}: {source}",
    .order_id.as_deref().map(|id| format!("order {id}")).unwrap_or_else(|| "unparseable record".to_string())
)]
pub struct DeadLetterFailure {
    /// Absent when the payload never deserialized into an order, so no id
    /// exists to report.
    pub order_id: Option<String>,
    #[source]
    pub source: PublishError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProcessingError::Transient("inventory service 503".into()).is_retryable());
        assert!(!ProcessingError::Permanent("unparseable payload".into()).is_retryable());
    }

    #[test]
    fn test_dead_letter_failure_names_order_or_unparseable_record() {
        let with_id = DeadLetterFailure {
            order_id: Some("ord-7".to_string()),
            source: PublishError::Failed("broker down".to_string()),
        };
        assert_eq!(
            with_id.to_string(),
            "dead-letter publish failed for order ord-7: publish failed: broker down"
        );

        let without_id = DeadLetterFailure {
            order_id: None,
            source: PublishError::Failed("broker down".to_string()),
        };
        assert_eq!(
            without_id.to_string(),
            "dead-letter publish failed for unparseable record: publish failed: broker down"
        );
    }

    #[test]
    fn test_invalid_partition_message() {
        let err = PublishError::InvalidPartition {
            requested: 99,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "partition 99 out of range (topic has 3 partitions)"
        );
    }
}
