use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::coordinator::{OrderHandler, Outcome, RetryCoordinator};
use crate::models::Order;
use crate::transport::{KafkaRecordStream, RecordStream};

// ============================================================================
// Consumption Loop
// ============================================================================
//
// Each worker pulls records from the main topic, drives them through the
// coordinator, and commits the consumption position only once the record
// reaches a terminal state (succeeded, dead-lettered, or fatal dead-letter
// failure). Never on an intermediate retry: a crash mid-retry redelivers
// rather than loses.
//
// Workers are independent tokio tasks. A backoff inside one worker's record
// suspends only that worker; the others keep pulling.
//
// ============================================================================

/// Drive one worker over a record stream until the stream ends.
pub async fn run_worker<S: RecordStream>(
    worker_id: usize,
    mut stream: S,
    coordinator: Arc<RetryCoordinator>,
    handler: Arc<dyn OrderHandler>,
) {
    tracing::info!(worker_id = worker_id, "Consumption worker started");

    while let Some(record) = stream.next_record().await {
        let outcome = match serde_json::from_slice::<Order>(&record.payload) {
            Ok(order) => coordinator.process(order, handler.as_ref()).await,
            Err(e) => {
                coordinator
                    .quarantine(record.payload.clone(), &e.to_string())
                    .await
            }
        };

        tracing::debug!(
            worker_id = worker_id,
            partition = record.token.partition,
            offset = record.token.offset,
            outcome = outcome_label(&outcome),
            "Record reached terminal state"
        );

        // Terminal either way (a failed dead-letter send is not re-queued),
        // so the position advances.
        if let Err(e) = stream.commit(&record.token).await {
            tracing::warn!(
                worker_id = worker_id,
                partition = record.token.partition,
                offset = record.token.offset,
                error = %e,
                "Failed to commit offset (record may be redelivered)"
            );
        }
    }

    tracing::info!(worker_id = worker_id, "Consumption worker stopped");
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Succeeded { .. } => "succeeded",
        Outcome::DeadLettered => "dead_lettered",
        Outcome::DeadLetterFailed(_) => "dead_letter_failed",
    }
}

/// Spawn a pool of Kafka-backed workers sharing one consumer group, so the
/// broker spreads partitions across them.
pub fn spawn_workers(
    brokers: &str,
    group_id: &str,
    topic: &str,
    worker_count: usize,
    coordinator: Arc<RetryCoordinator>,
    handler: Arc<dyn OrderHandler>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let stream = KafkaRecordStream::new(brokers, group_id, topic)?;
        let coordinator = coordinator.clone();
        let handler = handler.clone();
        handles.push(tokio::spawn(async move {
            run_worker(worker_id, stream, coordinator, handler).await;
        }));
    }

    tracing::info!(
        topic = %topic,
        group_id = %group_id,
        workers = worker_count,
        "Consumption worker pool started"
    );

    Ok(handles)
}

// ============================================================================
// Unit Tests
// ============================================================================
