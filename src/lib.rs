//! Wiretap - observe broker traffic from integration tests
//!
//! A test-side observer for broker-backed systems. Every message published by
//! the test, consumed from a topic, or routed to an error/retry topic is
//! captured into a type-partitioned event log, and assertions wait (with a
//! deadline) until a matching event shows up, whether it arrived before or
//! after the assertion was issued.
//!
//! ```ignore
//! let tap = Wiretap::start(broker, Config::default()).await?;
//!
//! tap.publish("orders", &OrderCreated { id: 42 }).await?;
//! tap.should_be_published(Duration::from_secs(5), &OrderCreated { id: 42 })
//!     .await?
//!     .should_be_consumed(Duration::from_secs(5), &OrderCreated { id: 42 })
//!     .await?;
//! ```
//!
//! See `demos/order-flow.rs`.

mod captured_event;
mod codec;
mod config;
mod error;
mod failure;
mod headers;
mod interceptor;
mod message;
mod outcome;
mod publish_options;
mod system;
mod topic_classifier;
mod type_tag;
mod wait_engine;

pub mod broker;
pub mod event_log;

mod internal;

pub use captured_event::{CapturedEvent, Delivery, EventId};
pub use codec::{Codec, JsonCodec};
pub use config::{Config, ExposedConfiguration, TopicSelection};
pub use error::{CaptureFailure, Error, TimeoutFailure};
pub use event_log::EventLog;
pub use failure::FailureDetail;
pub use headers::{Headers, TEST_CASE_HEADER, TYPE_HEADER, TraceContext};
pub use interceptor::Interceptor;
pub use message::{Message, Payload};
pub use outcome::Outcome;
pub use publish_options::PublishOptions;
pub use system::Wiretap;
pub use topic_classifier::TopicClassifier;
pub use type_tag::TypeTag;
pub use wait_engine::WaitEngine;

#[cfg(feature = "macros")]
pub use wiretap_macros::Message;

pub type Result<T = ()> = std::result::Result<T, Error>;
