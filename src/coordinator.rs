use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rand::Rng;
use tokio::time::sleep;

use crate::aggregator::RunningAverage;
use crate::error::{DeadLetterFailure, ProcessingError, PublishError};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::publisher::OrderProducer;
use crate::transport::Delivery;

// ============================================================================
// Retry / Dead-Letter Coordinator
// ============================================================================
//
// Per-message state machine:
//
//   Processing(attempt) -> Succeeded
//                       -> Failed(attempt) -> Processing(attempt + 1)   while attempt + 1 < max_retries
//                                          -> DeadLettered              when attempt reaches max_retries
//
// Transient failures re-enter processing after an exponential backoff with
// optional jitter. Permanent failures (e.g. malformed payloads) skip retry
// and go straight to the dead-letter topic with the attempt reported as 0.
//
// A failed dead-letter publish is fatal: the message is not re-queued and
// the condition is surfaced as a top-severity alert for external
// intervention. No second fallback path exists.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total processing attempts before dead-lettering.
    pub max_retries: u32,
    /// Delay before the first re-attempt; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
    /// Apply up to +-20% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before re-attempt number `attempt + 1`: `base * 2^attempt`,
    /// jittered, then capped at `max_delay`. Capping after the jitter keeps
    /// every delay bounded by `max_delay`; doubling outpaces the +-20% band,
    /// so delays stay non-decreasing in `attempt` until the cap flattens
    /// them.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Large attempt indices overflow to f64 infinity; the cap must be
        // applied in float space, since `Duration::from_secs_f64` panics on
        // values outside its range.
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(1024) as i32);
        let jittered = if self.jitter {
            exp * rand::thread_rng().gen_range(0.8..=1.2)
        } else {
            exp
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Per-message retry bookkeeping. Owned exclusively by the worker handling
/// the message; created on first failure, dropped at a terminal state.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    last_error: ProcessingError,
}

/// Terminal outcome of processing one record. The consumption position may
/// only advance once one of these is reached.
#[derive(Debug)]
pub enum Outcome {
    /// Processed and recorded in the aggregator.
    Succeeded { average: f64 },
    /// Retries exhausted (or failure permanent); order published to the
    /// dead-letter topic.
    DeadLettered,
    /// The dead-letter publish itself failed. Fatal; requires external
    /// intervention.
    DeadLetterFailed(DeadLetterFailure),
}

/// Business processing seam. Implementations decide success, transient
/// failure, or permanent failure per order.
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle(&self, order: &Order) -> Result<(), ProcessingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("order {0} not found in the dead-letter index")]
    NotFound(String),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

pub struct RetryCoordinator {
    config: RetryConfig,
    main_producer: Arc<OrderProducer>,
    dlq_producer: Arc<OrderProducer>,
    aggregator: Arc<RunningAverage>,
    metrics: Arc<Metrics>,
    /// Non-persistent index of dead-lettered orders, kept so an operator can
    /// replay by id. Lost on restart by design (the DLQ topic is the record
    /// of truth).
    dead_lettered: Mutex<HashMap<String, Order>>,
}

impl RetryCoordinator {
    pub fn new(
        config: RetryConfig,
        main_producer: Arc<OrderProducer>,
        dlq_producer: Arc<OrderProducer>,
        aggregator: Arc<RunningAverage>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            main_producer,
            dlq_producer,
            aggregator,
            metrics,
            dead_lettered: Mutex::new(HashMap::new()),
        }
    }

    pub fn aggregator(&self) -> &RunningAverage {
        &self.aggregator
    }

    /// Drive one order through the state machine until terminal. The backoff
    /// between attempts suspends only this call, never the whole loop.
    pub async fn process(&self, order: Order, handler: &dyn OrderHandler) -> Outcome {
        let mut state: Option<RetryState> = None;

        loop {
            let attempt = state.as_ref().map_or(0, |s| s.attempt);
            self.metrics.record_processing_attempt(attempt + 1);

            match &state {
                None => tracing::debug!(
                    order_id = %order.order_id,
                    max_retries = self.config.max_retries,
                    "Processing order"
                ),
                Some(s) => tracing::debug!(
                    order_id = %order.order_id,
                    attempt = s.attempt + 1,
                    max_retries = self.config.max_retries,
                    last_error = %s.last_error,
                    "Re-processing order after failure"
                ),
            }

            match handler.handle(&order).await {
                Ok(()) => {
                    let average = self.aggregator.record(order.price);
                    self.metrics.record_outcome("succeeded");
                    tracing::info!(
                        order_id = %order.order_id,
                        product = %order.product,
                        price = order.price,
                        attempts = attempt + 1,
                        running_average = average,
                        "Order processed successfully"
                    );
                    return Outcome::Succeeded { average };
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!(
                        order_id = %order.order_id,
                        error = %error,
                        "Permanent failure, skipping retry"
                    );
                    // Reported attempt count is 0: no retry was ever run.
                    return self
                        .route_to_dead_letter(&order, &error, 0, "permanent_failure")
                        .await;
                }
                Err(error) => {
                    let failures = attempt + 1;
                    if failures < self.config.max_retries {
                        let delay = self.config.delay_for_attempt(attempt);
                        tracing::warn!(
                            order_id = %order.order_id,
                            attempt = failures,
                            max_retries = self.config.max_retries,
                            error = %error,
                            delay_ms = delay.as_millis(),
                            "Processing failed, retrying after backoff"
                        );
                        self.metrics.record_backoff();
                        sleep(delay).await;
                        state = Some(RetryState {
                            attempt: failures,
                            last_error: error,
                        });
                    } else {
                        return self
                            .route_to_dead_letter(&order, &error, failures, "retries_exhausted")
                            .await;
                    }
                }
            }
        }
    }

    /// Dead-letter a payload that never deserialized into an order. No retry
    /// is run, the reported attempt count is 0, and the bytes are forwarded
    /// to the dead-letter topic unmodified.
    pub async fn quarantine(&self, payload: Vec<u8>, parse_error: &str) -> Outcome {
        tracing::error!(
            error = %parse_error,
            payload_len = payload.len(),
            retry_count = 0,
            "Unparseable record, routing straight to DLQ"
        );

        match self.dlq_producer.send_raw("malformed", payload).await {
            Ok(_) => {
                self.metrics.record_dlq_routed("malformed_payload");
                self.metrics.record_outcome("dead_lettered");
                Outcome::DeadLettered
            }
            Err(e) => {
                self.metrics.record_dlq_send_failure();
                self.metrics.record_outcome("dead_letter_failed");
                tracing::error!(
                    alert = "dlq_send_failed",
                    severity = "fatal",
                    error = %e,
                    "CRITICAL: dead-letter publish failed for malformed record"
                );
                Outcome::DeadLetterFailed(DeadLetterFailure {
                    order_id: None,
                    source: e,
                })
            }
        }
    }

    /// Re-inject a dead-lettered order into the main topic. Operator-only;
    /// the replayed order starts over at attempt 0.
    pub async fn replay(&self, order_id: &str) -> Result<Delivery, ReplayError> {
        let order = self
            .dead_lettered
            .lock()
            .unwrap()
            .remove(order_id)
            .ok_or_else(|| ReplayError::NotFound(order_id.to_string()))?;

        tracing::info!(
            order_id = %order.order_id,
            product = %order.product,
            "Replaying dead-lettered order to main topic"
        );

        match self.main_producer.send(&order).await {
            Ok(delivery) => {
                self.metrics.record_replay();
                Ok(delivery)
            }
            Err(e) => {
                // Keep the order replayable if the re-injection failed.
                self.dead_lettered
                    .lock()
                    .unwrap()
                    .insert(order.order_id.clone(), order);
                Err(e.into())
            }
        }
    }

    async fn route_to_dead_letter(
        &self,
        order: &Order,
        final_error: &ProcessingError,
        retry_count: u32,
        reason: &str,
    ) -> Outcome {
        tracing::error!(
            order_id = %order.order_id,
            retry_count = retry_count,
            final_error = %final_error,
            "Sending order to DLQ"
        );

        match self.dlq_producer.send(order).await {
            Ok(delivery) => {
                self.dead_lettered
                    .lock()
                    .unwrap()
                    .insert(order.order_id.clone(), order.clone());
                self.metrics.record_dlq_routed(reason);
                self.metrics.record_outcome("dead_lettered");
                self.emit_dlq_alert(order, final_error, retry_count, delivery);
                Outcome::DeadLettered
            }
            Err(e) => {
                self.metrics.record_dlq_send_failure();
                self.metrics.record_outcome("dead_letter_failed");
                tracing::error!(
                    alert = "dlq_send_failed",
                    severity = "fatal",
                    order_id = %order.order_id,
                    error = %e,
                    "CRITICAL: dead-letter publish failed; order requires external intervention"
                );
                Outcome::DeadLetterFailed(DeadLetterFailure {
                    order_id: Some(order.order_id.clone()),
                    source: e,
                })
            }
        }
    }

    /// Critical alert, distinct from ordinary retry logs. In production this
    /// event stream feeds the paging/alerting pipeline.
    fn emit_dlq_alert(
        &self,
        order: &Order,
        final_error: &ProcessingError,
        retry_count: u32,
        delivery: Delivery,
    ) {
        let created_at = Utc
            .timestamp_millis_opt(order.timestamp)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| order.timestamp.to_string());

        tracing::error!(
            alert = "dlq",
            order_id = %order.order_id,
            product = %order.product,
            price = order.price,
            retry_count = retry_count,
            final_error = %final_error,
            created_at = %created_at,
            dlq_partition = delivery.partition,
            dlq_offset = delivery.offset,
            "DLQ ALERT: order failed all processing attempts"
        );
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
