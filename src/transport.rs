use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord, Producer},
    Message, Offset, TopicPartitionList,
};

use crate::error::PublishError;

// ============================================================================
// Transport Boundary
// ============================================================================
//
// The broker is treated as an opaque ordered, partitioned, at-least-once log
// behind two narrow seams:
//
// - Transport: publish a keyed payload (optionally pinned to a partition)
//   and expose topic metadata.
// - RecordStream: pull records one at a time and commit a consumption
//   position only when told to.
//
// KafkaTransport / KafkaRecordStream are the real implementations; the
// `memory` module provides in-process doubles for tests.
//
// ============================================================================

/// Result of a successful publish: where the record landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload. With `partition == None` the transport routes by
    /// key, so equal keys land on the same partition in send order.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        partition: Option<i32>,
        payload: Vec<u8>,
    ) -> Result<Delivery, PublishError>;

    /// Number of partitions for a topic, from live transport metadata.
    async fn partition_count(&self, topic: &str) -> Result<i32, PublishError>;
}

/// An inbound record plus the token needed to commit past it.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub payload: Vec<u8>,
    pub token: CommitToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitToken {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait RecordStream: Send {
    /// Next available record. Blocks until one arrives; `None` means the
    /// stream has ended.
    async fn next_record(&mut self) -> Option<InboundRecord>;

    /// Advance the consumption position past the given record. Only called
    /// once the record has reached a terminal processing state.
    async fn commit(&mut self, token: &CommitToken) -> anyhow::Result<()>;
}

// ============================================================================
// Kafka implementations
// ============================================================================

pub struct KafkaTransport {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaTransport {
    pub fn new(brokers: &str, send_timeout: Duration) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        partition: Option<i32>,
        payload: Vec<u8>,
    ) -> Result<Delivery, PublishError> {
        let mut record = FutureRecord::to(topic).key(key).payload(&payload);
        if let Some(partition) = partition {
            record = record.partition(partition);
        }

        let (partition, offset) = self
            .producer
            .send(record, rdkafka::util::Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| PublishError::Failed(e.to_string()))?;

        Ok(Delivery { partition, offset })
    }

    async fn partition_count(&self, topic: &str) -> Result<i32, PublishError> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(Some(topic), self.send_timeout)
            .map_err(|e| PublishError::Failed(format!("metadata fetch failed: {e}")))?;

        metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len() as i32)
            .ok_or_else(|| PublishError::Failed(format!("unknown topic {topic}")))
    }
}

pub struct KafkaRecordStream {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaRecordStream {
    /// Create a consumer with manual commits, so the position advances only
    /// after a record reaches a terminal state. A crash mid-retry therefore
    /// redelivers rather than loses.
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[topic])?;

        tracing::info!(
            topic = %topic,
            group_id = %group_id,
            manual_commit = true,
            "Subscribed to topic"
        );

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl RecordStream for KafkaRecordStream {
    async fn next_record(&mut self) -> Option<InboundRecord> {
        use futures_util::StreamExt;

        let mut stream = self.consumer.stream();
        loop {
            match stream.next().await? {
                Ok(message) => {
                    let Some(payload) = message.payload() else {
                        tracing::warn!(
                            topic = %self.topic,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Skipping record with empty payload"
                        );
                        continue;
                    };

                    return Some(InboundRecord {
                        payload: payload.to_vec(),
                        token: CommitToken {
                            partition: message.partition(),
                            offset: message.offset(),
                        },
                    });
                }
                Err(e) => {
                    // Transport hiccup. Keep pulling; the broker redelivers.
                    tracing::warn!(
                        topic = %self.topic,
                        error = %e,
                        "Error receiving record, continuing"
                    );
                }
            }
        }
    }

    async fn commit(&mut self, token: &CommitToken) -> anyhow::Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, token.partition, Offset::Offset(token.offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

// ============================================================================
// In-memory doubles (tests only)
// ============================================================================

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::{HashMap, HashSet};
    use std::hash::{Hash, Hasher};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct StoredRecord {
        pub key: String,
        pub partition: i32,
        pub offset: i64,
        pub payload: Vec<u8>,
    }

    /// In-process transport with key-hashed routing and per-topic failure
    /// injection.
    pub struct MemoryTransport {
        partitions: i32,
        topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
        failing_topics: Mutex<HashSet<String>>,
    }

    impl MemoryTransport {
        pub fn new(partitions: i32) -> Self {
            Self {
                partitions,
                topics: Mutex::new(HashMap::new()),
                failing_topics: Mutex::new(HashSet::new()),
            }
        }

        /// Make every publish to `topic` fail with a transport error.
        pub fn fail_topic(&self, topic: &str) {
            self.failing_topics.lock().unwrap().insert(topic.to_string());
        }

        pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
            let topics = self.topics.lock().unwrap();
            topics
                .get(topic)
                .map(|parts| {
                    let mut all: Vec<StoredRecord> =
                        parts.iter().flatten().cloned().collect();
                    all.sort_by_key(|r| (r.partition, r.offset));
                    all
                })
                .unwrap_or_default()
        }

        fn route(&self, key: &str) -> i32 {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % self.partitions as u64) as i32
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            partition: Option<i32>,
            payload: Vec<u8>,
        ) -> Result<Delivery, PublishError> {
            if self.failing_topics.lock().unwrap().contains(topic) {
                return Err(PublishError::Failed(format!(
                    "injected failure for topic {topic}"
                )));
            }

            let partition = partition.unwrap_or_else(|| self.route(key));
            let mut topics = self.topics.lock().unwrap();
            let parts = topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);

            let log = &mut parts[partition as usize];
            let offset = log.len() as i64;
            log.push(StoredRecord {
                key: key.to_string(),
                partition,
                offset,
                payload,
            });

            Ok(Delivery { partition, offset })
        }

        async fn partition_count(&self, _topic: &str) -> Result<i32, PublishError> {
            Ok(self.partitions)
        }
    }

    /// Scripted record source. Commits are pushed into a shared handle so a
    /// test can observe the consumption position while the worker runs.
    pub struct MemoryRecordStream {
        pending: std::collections::VecDeque<InboundRecord>,
        committed: std::sync::Arc<Mutex<Vec<CommitToken>>>,
    }

    impl MemoryRecordStream {
        pub fn new(payloads: Vec<Vec<u8>>) -> Self {
            let pending = payloads
                .into_iter()
                .enumerate()
                .map(|(i, payload)| InboundRecord {
                    payload,
                    token: CommitToken {
                        partition: 0,
                        offset: i as i64,
                    },
                })
                .collect();

            Self {
                pending,
                committed: std::sync::Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn committed_handle(&self) -> std::sync::Arc<Mutex<Vec<CommitToken>>> {
            self.committed.clone()
        }
    }

    #[async_trait]
    impl RecordStream for MemoryRecordStream {
        async fn next_record(&mut self) -> Option<InboundRecord> {
            self.pending.pop_front()
        }

        async fn commit(&mut self, token: &CommitToken) -> anyhow::Result<()> {
            self.committed.lock().unwrap().push(token.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_equal_keys_route_to_the_same_partition() {
        let transport = MemoryTransport::new(3);

        let a = transport
            .publish("orders", "order-1", None, b"a".to_vec())
            .await
            .unwrap();
        let b = transport
            .publish("orders", "order-1", None, b"b".to_vec())
            .await
            .unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
    }

    #[tokio::test]
    async fn test_failure_injection_is_per_topic() {
        let transport = MemoryTransport::new(1);
        transport.fail_topic("orders-dlq");

        assert!(transport
            .publish("orders", "k", None, b"x".to_vec())
            .await
            .is_ok());
        assert!(matches!(
            transport
                .publish("orders-dlq", "k", None, b"x".to_vec())
                .await,
            Err(PublishError::Failed(_))
        ));
    }
}
