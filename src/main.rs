use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod admin;
mod aggregator;
mod config;
mod consumer;
mod coordinator;
mod error;
mod metrics;
mod models;
mod publisher;
mod transport;

use aggregator::RunningAverage;
use config::PipelineConfig;
use coordinator::{OrderHandler, RetryCoordinator};
use error::ProcessingError;
use models::Order;
use publisher::OrderProducer;
use transport::KafkaTransport;

/// Demo business handler: rejects negative prices outright and simulates a
/// flaky downstream so the retry and dead-letter paths get exercised.
struct DemoOrderHandler {
    transient_failure_rate: f64,
}

#[async_trait]
impl OrderHandler for DemoOrderHandler {
    async fn handle(&self, order: &Order) -> Result<(), ProcessingError> {
        if order.price < 0.0 {
            return Err(ProcessingError::Permanent(format!(
                "negative price {} on order {}",
                order.price, order.order_id
            )));
        }

        if rand::thread_rng().gen_bool(self.transient_failure_rate) {
            return Err(ProcessingError::Transient(
                "simulated downstream outage".to_string(),
            ));
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering.
    // Override with RUST_LOG, e.g. RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_pipeline=debug")),
        )
        .init();

    let config = PipelineConfig::from_env();
    tracing::info!(?config, "Starting order pipeline");

    // === 1. Metrics registry ===
    let metrics = Arc::new(metrics::Metrics::new()?);

    // === 2. Transport and producers ===
    let transport = Arc::new(KafkaTransport::new(&config.brokers, config.send_timeout)?);
    let main_producer = Arc::new(OrderProducer::new(
        transport.clone(),
        config.orders_topic.clone(),
        config.send_timeout,
        metrics.clone(),
    ));
    let dlq_producer = Arc::new(OrderProducer::new(
        transport.clone(),
        config.dlq_topic.clone(),
        config.send_timeout,
        metrics.clone(),
    ));

    // === 3. Aggregator and coordinator ===
    let aggregator = Arc::new(RunningAverage::new());
    let coordinator = Arc::new(RetryCoordinator::new(
        config.retry(),
        main_producer.clone(),
        dlq_producer,
        aggregator.clone(),
        metrics.clone(),
    ));

    // === 4. Admin server on its own thread/runtime ===
    let admin_aggregator = aggregator.clone();
    let admin_coordinator = coordinator.clone();
    let admin_registry = Arc::new(metrics.registry().clone());
    let admin_port = config.admin_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("admin runtime");
        rt.block_on(async {
            if let Err(e) = admin::start_admin_server(
                admin_aggregator,
                admin_coordinator,
                admin_registry,
                admin_port,
            )
            .await
            {
                tracing::error!(error = %e, "Admin server error");
            }
        });
    });

    // === 5. Consumption worker pool ===
    let handler: Arc<dyn OrderHandler> = Arc::new(DemoOrderHandler {
        transient_failure_rate: 0.2,
    });
    let _workers = consumer::spawn_workers(
        &config.brokers,
        &config.group_id,
        &config.orders_topic,
        config.workers,
        coordinator.clone(),
        handler,
    )?;

    // === 6. Demo traffic ===
    tracing::info!("Publishing demo orders");

    for (product, price) in [
        ("laptop", 999.99),
        ("mouse", 25.50),
        ("keyboard", 79.00),
        ("monitor", 349.95),
        ("headset", 129.99),
    ] {
        let order = Order::new(product, price);
        main_producer.send(&order).await?;
    }

    // Blocking variant with a delivery-outcome wait.
    let order = Order::new("ssd", 119.00);
    let delivery = main_producer.send_sync(&order).await?;
    tracing::info!(
        order_id = %order.order_id,
        partition = delivery.partition,
        offset = delivery.offset,
        "Synchronous send confirmed"
    );

    // Partition-pinned send; an out-of-range index fails fast without a
    // transport call.
    let pinned = Order::new("gpu", 1499.00);
    main_producer.send_to_partition(&pinned, 0).await?;
    if let Err(e) = main_producer
        .send_to_partition(&Order::new("ram", 89.00), 99)
        .await
    {
        tracing::warn!(error = %e, "Expected rejection of out-of-range partition");
    }

    tracing::info!("Waiting for the pipeline to drain...");
    tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;

    tracing::info!("{}", aggregator.summary());
    Ok(())
}
