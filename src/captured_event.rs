use std::sync::Arc;

use tokio::time::Instant;
use uuid::Uuid;

use crate::{FailureDetail, Headers, Message, Outcome, Payload, TraceContext, TypeTag};

pub type EventId = u128;

/// Where a captured message travelled through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: Arc<str>,
    pub key: Option<String>,
    pub offset: Option<u64>,
}

impl Delivery {
    pub fn new(topic: impl Into<Arc<str>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            offset: None,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A message observed by the [`Interceptor`](crate::Interceptor).
///
/// Immutable once recorded. The `sequence` and `timestamp` are assigned by the
/// [`EventLog`](crate::EventLog) when the event is appended, so both are
/// non-decreasing within one `(outcome, type tag)` partition.
///
/// `error` is present if and only if the outcome is [`Outcome::Failed`].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    id: EventId,
    sequence: u64,
    timestamp: Instant,
    outcome: Outcome,
    type_tag: TypeTag,
    payload: Payload,
    headers: Headers,
    context: TraceContext,
    delivery: Option<Delivery>,
    error: Option<FailureDetail>,
}

impl CapturedEvent {
    /// Returns the unique ID of this event.
    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Log-wide append position.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Monotonic capture time.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[inline]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    #[inline]
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the payload as `T`, or `None` if it is another type.
    #[inline]
    pub fn message<T: Message>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Propagated context extracted from the headers.
    #[inline]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    #[inline]
    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    #[inline]
    pub fn topic(&self) -> Option<&str> {
        self.delivery.as_ref().map(|d| d.topic.as_ref())
    }

    #[inline]
    pub fn error(&self) -> Option<&FailureDetail> {
        self.error.as_ref()
    }
}

/// An event that has not been stamped by the log yet.
#[derive(Debug, Clone)]
pub(crate) struct Capture {
    pub outcome: Outcome,
    pub type_tag: TypeTag,
    pub payload: Payload,
    pub headers: Headers,
    pub context: TraceContext,
    pub delivery: Option<Delivery>,
    pub error: Option<FailureDetail>,
}

impl Capture {
    pub fn new(outcome: Outcome, type_tag: TypeTag, payload: Payload, headers: Headers) -> Self {
        Self {
            outcome,
            type_tag,
            payload,
            headers,
            context: TraceContext::default(),
            delivery: None,
            error: None,
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_error(mut self, error: FailureDetail) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_context(mut self, context: TraceContext) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn stamp(self, sequence: u64) -> CapturedEvent {
        CapturedEvent {
            id: Uuid::new_v4().as_u128(),
            sequence,
            timestamp: Instant::now(),
            outcome: self.outcome,
            type_tag: self.type_tag,
            payload: self.payload,
            headers: self.headers,
            context: self.context,
            delivery: self.delivery,
            error: self.error,
        }
    }
}
