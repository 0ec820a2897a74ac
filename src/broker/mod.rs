//! Interfaces to the broker client, plus an in-process implementation.
//!
//! The harness does not talk to a broker itself. A client library plugs in by
//! implementing [`Broker`], [`Producer`] and [`Subscription`]. [`MemoryBroker`]
//! implements all three in memory and is what the crate's own tests run on.
//!
//! Although the trait methods return futures, implementations can use
//! `async fn`. No `#[async_trait]` is required.

mod memory;

use std::{future::Future, sync::Arc};

use futures_util::Stream;

pub use memory::{MemoryBroker, MemoryProducer, MemorySubscription};

use crate::{Headers, Result, TopicSelection, config::Config};

/// A record to be written to a topic.
#[derive(Debug, Clone)]
pub struct OutgoingRecord {
    pub topic: Arc<str>,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

/// Broker confirmation that a record was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub topic: Arc<str>,
    pub offset: u64,
}

/// A record read from a subscription.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: Arc<str>,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl Record {
    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.topic.clone(),
            offset: self.offset,
        }
    }
}

/// Topic and offset of a record, used to commit the read position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub topic: Arc<str>,
    pub offset: u64,
}

/// Producing side of a broker client.
pub trait Producer: Send + Sync + 'static {
    /// Send a record and wait for the broker to acknowledge it.
    fn send(&self, record: OutgoingRecord) -> impl Future<Output = Result<Acknowledgment>> + Send;

    /// Flush and release the client. Called once on shutdown.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// A consumer-group subscription with manual offset control.
///
/// The stream is lazy, unbounded and cannot be restarted. Items are yielded in
/// order within each topic. After a record is handled, its position is passed
/// to [`commit`](Subscription::commit); a new subscription of the same group
/// resumes after the last committed record.
pub trait Subscription: Stream<Item = Result<Record>> + Unpin + Send + 'static {
    fn commit(&mut self, position: &RecordPosition) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Entry point of a broker client.
///
/// Connection problems must be reported as [`Error::Connection`](crate::Error::Connection).
pub trait Broker: Send + Sync + 'static {
    type Producer: Producer;
    type Subscription: Subscription;

    /// Resolved connection endpoint, exposed to the application under test.
    fn bootstrap_servers(&self) -> String;

    /// Connect a producer.
    ///
    /// A [`Config::bootstrap_servers`] that names another endpoint than this
    /// broker's must be refused.
    fn connect_producer(
        &self,
        config: &Config,
    ) -> impl Future<Output = Result<Self::Producer>> + Send;

    fn subscribe(
        &self,
        group_id: &str,
        topics: &TopicSelection,
    ) -> impl Future<Output = Result<Self::Subscription>> + Send;
}
