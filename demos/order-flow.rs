//! An order service consumes `orders`, rejects big orders to `orders.error`
//! and reports a timeout itself. The test side only uses the harness.
//!
//! cargo run --example order-flow

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use wiretap::{
    Config, FailureDetail, Headers, Message, Payload, PublishOptions, Result, TYPE_HEADER,
    TopicSelection, Wiretap,
    broker::{Broker, MemoryBroker, OutgoingRecord, Subscription},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
struct OrderCreated {
    id: u64,
    quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(tag = "shipping.OrderShipped")]
struct OrderShipped {
    order_id: u64,
}

/// The system under test. Has its own consumer group.
async fn order_service(broker: MemoryBroker, tap_interceptor: Arc<wiretap::Interceptor>) -> Result {
    let mut orders = broker
        .subscribe("order-service", &TopicSelection::Topics(vec!["orders".into()]))
        .await?;
    while let Some(record) = orders.next().await {
        let record = record?;
        let order: OrderCreated = serde_json::from_slice(&record.payload)?;
        let headers = record.headers.clone();

        if order.quantity > 100 {
            broker.append(OutgoingRecord {
                topic: Arc::from("orders.error"),
                key: record.key.clone(),
                payload: record.payload.clone(),
                headers: headers.with("failure-reason", "quantity above limit"),
            })?;
        } else if order.id == 13 {
            // Failures that never reach a topic are reported through the hooks.
            tap_interceptor.on_failed(
                OrderCreated::type_tag(),
                Payload::new(order.clone()),
                FailureDetail::new("warehouse timed out"),
                headers,
            );
        } else {
            let shipped = OrderShipped { order_id: order.id };
            broker.append(OutgoingRecord {
                topic: Arc::from("shipments"),
                key: record.key.clone(),
                payload: serde_json::to_vec(&shipped)?,
                headers: Headers::new()
                    .with(TYPE_HEADER, OrderShipped::type_tag().as_str())
                    .with("x-correlation-id", format!("order-{}", order.id)),
            })?;
        }
        orders.commit(&record.position()).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let broker = MemoryBroker::new("demo");
    let config = Config::default()
        .with_default_timeout(Duration::from_secs(2))
        .with_exposed_configuration(|exposed| {
            vec![format!("orders.kafka.servers={}", exposed.bootstrap_servers)]
        });
    let mut tap = Wiretap::start(broker.clone(), config).await?;

    for line in tap.configuration() {
        println!("{line}");
    }

    let service = tokio::spawn(order_service(broker.clone(), tap.interceptor().clone()));

    tap.publish_with(
        "orders",
        &OrderCreated { id: 1, quantity: 3 },
        PublishOptions::new()
            .with_key("order-1")
            .with_test_case("small order is shipped"),
    )
    .await?
    .should_be_consumed(None, &OrderCreated { id: 1, quantity: 3 })
    .await?
    .should_be_consumed_on_condition(None, |s: &OrderShipped| s.order_id == 1)
    .await?;

    tap.publish("orders", &OrderCreated { id: 2, quantity: 500 })
        .await?
        .should_be_failed(None, &OrderCreated { id: 2, quantity: 500 }, "quantity above limit")
        .await?;

    tap.publish("orders", &OrderCreated { id: 13, quantity: 1 })
        .await?
        .should_be_failed_on_condition(None, |o: &OrderCreated, e: &FailureDetail| {
            o.id == 13 && e.reason().contains("timed out")
        })
        .await?;

    match tap
        .should_be_consumed_on_condition(Duration::from_millis(300), |s: &OrderShipped| {
            s.order_id == 2
        })
        .await
    {
        Err(e) => println!("as expected: {e}"),
        Ok(_) => println!("order 2 should not have shipped"),
    }

    println!("captured {} events", tap.events().len());
    tap.stop().await?;
    service.abort();
    Ok(())
}
