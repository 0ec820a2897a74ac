use std::sync::Arc;

use crate::{
    CapturedEvent, EventLog, FailureDetail, Headers, Outcome, Payload, TraceContext, TypeTag,
    captured_event::Capture,
};

/// Capture side of the harness: one hook per observation point.
///
/// Every hook appends exactly one [`CapturedEvent`] to the [`EventLog`] and
/// returns. Hooks never wait on I/O or on a pending assertion, so they can be
/// called from a consumer loop, a producer callback, or an application error
/// handler while tests are blocked in [`WaitEngine::wait_for`](crate::WaitEngine::wait_for).
///
/// Headers matching the configured context prefix are extracted into the
/// event's [`TraceContext`].
#[derive(Debug)]
pub struct Interceptor {
    log: Arc<EventLog>,
    context_prefix: String,
}

impl Interceptor {
    pub fn new(log: Arc<EventLog>, context_prefix: impl Into<String>) -> Self {
        Self {
            log,
            context_prefix: context_prefix.into(),
        }
    }

    /// The broker accepted a message on the producing path.
    pub fn on_published(
        &self,
        type_tag: TypeTag,
        payload: Payload,
        headers: Headers,
    ) -> Arc<CapturedEvent> {
        self.record(Capture::new(Outcome::Published, type_tag, payload, headers))
    }

    /// A message was read from a regular topic.
    pub fn on_consumed(
        &self,
        type_tag: TypeTag,
        payload: Payload,
        headers: Headers,
    ) -> Arc<CapturedEvent> {
        self.record(Capture::new(Outcome::Consumed, type_tag, payload, headers))
    }

    /// A message was read from an error/retry topic, or its processing failed.
    pub fn on_failed(
        &self,
        type_tag: TypeTag,
        payload: Payload,
        error: impl Into<FailureDetail>,
        headers: Headers,
    ) -> Arc<CapturedEvent> {
        self.record(
            Capture::new(Outcome::Failed, type_tag, payload, headers).with_error(error.into()),
        )
    }

    pub(crate) fn record(&self, capture: Capture) -> Arc<CapturedEvent> {
        let context = TraceContext::from_headers(&capture.headers, &self.context_prefix);
        let event = self.log.append(capture.with_context(context));
        tracing::debug!(
            outcome = %event.outcome(),
            type_tag = %event.type_tag(),
            topic = event.topic().unwrap_or("-"),
            context = %event.context(),
            "message captured"
        );
        event
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{Delivery, Message};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }
    impl Message for OrderCreated {}

    fn interceptor() -> Interceptor {
        Interceptor::new(Arc::new(EventLog::new()), "x-")
    }

    #[test]
    fn each_hook_records_one_event_with_its_outcome() {
        let i = interceptor();
        let tag = OrderCreated::type_tag();
        i.on_published(tag.clone(), Payload::new(OrderCreated { id: 1 }), Headers::new());
        i.on_consumed(tag.clone(), Payload::new(OrderCreated { id: 1 }), Headers::new());
        let failed = i.on_failed(
            tag.clone(),
            Payload::new(OrderCreated { id: 1 }),
            "boom",
            Headers::new(),
        );

        assert_eq!(i.log().count(Outcome::Published, &tag), 1);
        assert_eq!(i.log().count(Outcome::Consumed, &tag), 1);
        assert_eq!(i.log().count(Outcome::Failed, &tag), 1);
        assert_eq!(failed.error().map(|e| e.reason()), Some("boom"));
    }

    #[test]
    fn only_failed_events_carry_an_error() {
        let i = interceptor();
        let event = i.on_consumed(
            OrderCreated::type_tag(),
            Payload::new(OrderCreated { id: 1 }),
            Headers::new(),
        );
        assert!(event.error().is_none());
    }

    #[test]
    fn prefixed_headers_become_context() {
        let i = interceptor();
        let headers = Headers::from([("X-Correlation-Id", "c-1"), ("content-type", "json")]);
        let event = i.on_consumed(
            OrderCreated::type_tag(),
            Payload::new(OrderCreated { id: 1 }),
            headers,
        );
        assert_eq!(event.context().get("x-correlation-id"), Some("c-1"));
        assert_eq!(event.context().get("content-type"), None);
        assert_eq!(event.headers().len(), 2);
    }

    #[test]
    fn delivery_is_kept() {
        let i = interceptor();
        let capture = Capture::new(
            Outcome::Consumed,
            OrderCreated::type_tag(),
            Payload::new(OrderCreated { id: 1 }),
            Headers::new(),
        )
        .with_delivery(Delivery::new("orders").with_offset(3));
        let event = i.record(capture);
        assert_eq!(event.topic(), Some("orders"));
        assert_eq!(event.delivery().and_then(|d| d.offset), Some(3));
    }
}
