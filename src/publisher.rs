use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PublishError;
use crate::metrics::Metrics;
use crate::models::Order;
use crate::transport::{Delivery, Transport};

// ============================================================================
// Order Producer
// ============================================================================
//
// Sends order records to a named topic. Routing is keyed by order id, so all
// sends for one order land on the same partition in send order. The producer
// never retries; retry ownership lives entirely in the coordinator.
//
// Every attempt emits a structured success/failure log event and a metric.
//
// ============================================================================

pub struct OrderProducer {
    transport: Arc<dyn Transport>,
    topic: String,
    sync_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl OrderProducer {
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        sync_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            sync_timeout,
            metrics,
        }
    }

    /// Asynchronous send, routed by the order's key.
    pub async fn send(&self, order: &Order) -> Result<Delivery, PublishError> {
        self.publish(order, None).await
    }

    /// Send directly to a partition, bypassing key routing. Fails fast with
    /// `InvalidPartition` before any transport call when the index is out of
    /// range for the topic.
    pub async fn send_to_partition(
        &self,
        order: &Order,
        partition: i32,
    ) -> Result<Delivery, PublishError> {
        let available = self.transport.partition_count(&self.topic).await?;
        if partition < 0 || partition >= available {
            tracing::error!(
                order_id = %order.order_id,
                partition = partition,
                available = available,
                "Rejected send to out-of-range partition"
            );
            return Err(PublishError::InvalidPartition {
                requested: partition,
                available,
            });
        }

        self.publish(order, Some(partition)).await
    }

    /// Blocking variant: waits for the delivery outcome up to the configured
    /// timeout. A timeout abandons the wait only; the in-flight publish may
    /// still complete, so the caller must not re-send on `Timeout`.
    pub async fn send_sync(&self, order: &Order) -> Result<Delivery, PublishError> {
        match tokio::time::timeout(self.sync_timeout, self.send(order)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    order_id = %order.order_id,
                    timeout_ms = self.sync_timeout.as_millis(),
                    "Gave up waiting for delivery outcome"
                );
                Err(PublishError::Timeout(self.sync_timeout))
            }
        }
    }

    /// Forward an already-encoded payload unmodified. Used by the
    /// dead-letter path for records that never deserialized into an order.
    pub(crate) async fn send_raw(
        &self,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, PublishError> {
        let started = Instant::now();
        let result = self.transport.publish(&self.topic, key, None, payload).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(delivery) => {
                self.metrics.record_publish(&self.topic, true, elapsed);
                tracing::info!(
                    key = %key,
                    topic = %self.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Raw payload forwarded"
                );
            }
            Err(e) => {
                self.metrics.record_publish(&self.topic, false, elapsed);
                tracing::error!(
                    key = %key,
                    topic = %self.topic,
                    error = %e,
                    "Failed to forward raw payload"
                );
            }
        }

        result
    }

    async fn publish(
        &self,
        order: &Order,
        partition: Option<i32>,
    ) -> Result<Delivery, PublishError> {
        let payload = serde_json::to_vec(order)
            .map_err(|e| PublishError::Failed(format!("serialization failed: {e}")))?;

        tracing::debug!(
            order_id = %order.order_id,
            product = %order.product,
            price = order.price,
            topic = %self.topic,
            "Sending order"
        );

        let started = Instant::now();
        let result = self
            .transport
            .publish(&self.topic, order.routing_key(), partition, payload)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(delivery) => {
                self.metrics.record_publish(&self.topic, true, elapsed);
                tracing::info!(
                    order_id = %order.order_id,
                    topic = %self.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Order sent successfully"
                );
            }
            Err(e) => {
                self.metrics.record_publish(&self.topic, false, elapsed);
                tracing::error!(
                    order_id = %order.order_id,
                    topic = %self.topic,
                    error = %e,
                    "Failed to send order"
                );
            }
        }

        result
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    fn producer_over(transport: Arc<MemoryTransport>) -> OrderProducer {
        OrderProducer::new(
            transport,
            "orders",
            Duration::from_secs(1),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_send_routes_by_order_id() {
        let transport = Arc::new(MemoryTransport::new(3));
        let producer = producer_over(transport.clone());
        let order = Order::new("laptop", 999.99);

        let delivery = producer.send(&order).await.unwrap();

        let records = transport.records("orders");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, order.order_id);
        assert_eq!(records[0].partition, delivery.partition);

        let parsed: Order = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(parsed, order);
    }

    #[tokio::test]
    async fn test_same_order_id_preserves_send_order() {
        let transport = Arc::new(MemoryTransport::new(4));
        let producer = producer_over(transport.clone());
        let order = Order::new("ssd", 120.0);

        let first = producer.send(&order).await.unwrap();
        let second = producer.send(&order).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn test_send_to_partition_pins_delivery() {
        let transport = Arc::new(MemoryTransport::new(3));
        let producer = producer_over(transport.clone());
        let order = Order::new("gpu", 1500.0);

        let delivery = producer.send_to_partition(&order, 2).await.unwrap();
        assert_eq!(delivery.partition, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_partition_fails_without_transport_call() {
        let transport = Arc::new(MemoryTransport::new(3));
        let producer = producer_over(transport.clone());
        let order = Order::new("ram", 80.0);

        let result = producer.send_to_partition(&order, 99).await;
        assert!(matches!(
            result,
            Err(PublishError::InvalidPartition {
                requested: 99,
                available: 3
            })
        ));
        assert!(transport.records("orders").is_empty());
    }

    #[tokio::test]
    async fn test_negative_partition_is_invalid() {
        let transport = Arc::new(MemoryTransport::new(3));
        let producer = producer_over(transport.clone());
        let order = Order::new("psu", 60.0);

        assert!(matches!(
            producer.send_to_partition(&order, -1).await,
            Err(PublishError::InvalidPartition { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_sync_resolves_before_timeout() {
        let transport = Arc::new(MemoryTransport::new(1));
        let producer = producer_over(transport.clone());
        let order = Order::new("case", 90.0);

        let delivery = producer.send_sync(&order).await.unwrap();
        assert_eq!(delivery.partition, 0);
        assert_eq!(transport.records("orders").len(), 1);
    }

    #[tokio::test]
    async fn test_send_sync_times_out_without_aborting_the_publish() {
        use async_trait::async_trait;
        use crate::transport::Transport;

        // Never resolves within the sync timeout.
        struct StallingTransport;

        #[async_trait]
        impl Transport for StallingTransport {
            async fn publish(
                &self,
                _topic: &str,
                _key: &str,
                _partition: Option<i32>,
                _payload: Vec<u8>,
            ) -> Result<Delivery, PublishError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Delivery {
                    partition: 0,
                    offset: 0,
                })
            }

            async fn partition_count(&self, _topic: &str) -> Result<i32, PublishError> {
                Ok(1)
            }
        }

        let producer = OrderProducer::new(
            Arc::new(StallingTransport),
            "orders",
            Duration::from_millis(50),
            Arc::new(Metrics::new().unwrap()),
        );
        let order = Order::new("slow", 10.0);

        let result = producer.send_sync(&order).await;
        assert!(matches!(result, Err(PublishError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_publish_failure() {
        let transport = Arc::new(MemoryTransport::new(1));
        transport.fail_topic("orders");
        let producer = producer_over(transport);
        let order = Order::new("fan", 15.0);

        assert!(matches!(
            producer.send(&order).await,
            Err(PublishError::Failed(_))
        ));
    }
}
