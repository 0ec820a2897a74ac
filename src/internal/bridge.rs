use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::{Classified, Decoder};
use crate::{
    CaptureFailure, Codec, Delivery, FailureDetail, Headers, Result, TYPE_HEADER, TopicClassifier,
    TraceContext, TypeTag,
    broker::{Record, Subscription},
    config::Config,
};

/// Background consumer that feeds every observed record into the event log.
///
/// Runs until the cancel token fires or the subscription ends. A record is
/// committed once it has been captured, parked or rejected, so a restarted
/// harness with the same group does not see it again.
pub(crate) struct BridgeConsumer<S: Subscription, C: Codec> {
    subscription: S,
    decoder: Arc<Decoder<C>>,
    classifier: TopicClassifier,
    context_prefix: String,
    failure_header: String,
    poll_interval: Duration,
    cancel_token: Arc<CancellationToken>,
}

impl<S: Subscription, C: Codec> BridgeConsumer<S, C> {
    pub fn new(
        subscription: S,
        decoder: Arc<Decoder<C>>,
        config: &Config,
        cancel_token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            subscription,
            decoder,
            classifier: TopicClassifier::new(config.error_topic_suffixes.iter()),
            context_prefix: config.context_header_prefix.clone(),
            failure_header: config.failure_header.clone(),
            poll_interval: config.poll_interval,
            cancel_token,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::debug!("bridge consumer started");
        loop {
            select! {
                _ = self.cancel_token.cancelled() => {
                    break;
                }
                item = self.subscription.next() => match item {
                    Some(Ok(record)) => {
                        let position = record.position();
                        self.handle(record);
                        if let Err(e) = self.subscription.commit(&position).await {
                            tracing::warn!(error = %e, "bridge consumer couldn't commit");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "bridge consumer read failed, retrying");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    None => {
                        tracing::debug!("subscription ended");
                        break;
                    }
                },
            }
        }
        self.subscription.close().await;
        tracing::debug!("bridge consumer stopped");
        Ok(())
    }

    fn handle(&self, record: Record) {
        let headers = record.headers;
        let context = TraceContext::from_headers(&headers, &self.context_prefix);
        let span = tracing::debug_span!(
            "capture",
            topic = %record.topic,
            offset = record.offset,
            context = %context,
        );
        let _entered = span.enter();

        let Some(type_tag) = headers.get(TYPE_HEADER).map(TypeTag::from) else {
            let failure = CaptureFailure::MissingTypeTag {
                topic: record.topic,
                offset: record.offset,
            };
            tracing::warn!(%failure, "record skipped");
            return;
        };

        let outcome = self.classifier.classify(&record.topic);
        let error = outcome
            .is_failed()
            .then(|| self.failure_detail(&record.topic, &headers));
        let classified = Classified {
            outcome,
            type_tag,
            delivery: Delivery::new(record.topic)
                .with_key(record.key)
                .with_offset(record.offset),
            payload: record.payload,
            headers,
            error,
        };
        if let Err(failure) = self.decoder.capture(classified) {
            tracing::warn!(%failure, "record skipped");
        }
    }

    fn failure_detail(&self, topic: &str, headers: &Headers) -> FailureDetail {
        match headers.get(&self.failure_header) {
            Some(reason) => FailureDetail::new(reason),
            None => FailureDetail::new(format!("routed to error topic {topic}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    use futures_util::{Stream, stream::BoxStream};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        Error, EventLog, Interceptor, JsonCodec, Message, Outcome, TopicSelection,
        broker::{Broker, MemoryBroker, OutgoingRecord, RecordPosition},
    };

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }
    impl Message for OrderCreated {
        fn type_tag() -> TypeTag {
            TypeTag::from_static("OrderCreated")
        }
    }

    fn record(topic: &str, payload: &str, headers: Headers) -> OutgoingRecord {
        OutgoingRecord {
            topic: Arc::from(topic),
            key: None,
            payload: payload.as_bytes().to_vec(),
            headers,
        }
    }

    fn typed() -> Headers {
        Headers::new().with(TYPE_HEADER, "OrderCreated")
    }

    type Running = (
        Arc<EventLog>,
        Arc<CancellationToken>,
        tokio::task::JoinHandle<Result<()>>,
    );

    fn spawn<S: Subscription>(subscription: S) -> Running {
        let config = Config::default().with_poll_interval(Duration::from_millis(5));
        let log = Arc::new(EventLog::new());
        let interceptor = Arc::new(Interceptor::new(log.clone(), "x-"));
        let decoder = Arc::new(Decoder::new(JsonCodec, interceptor, 16));
        decoder.register::<OrderCreated>().unwrap();
        let token = Arc::new(CancellationToken::new());
        let bridge = BridgeConsumer::new(subscription, decoder, &config, token.clone());
        (log, token, tokio::spawn(bridge.run()))
    }

    async fn start(broker: &MemoryBroker) -> Running {
        let group_id = Config::default().group_id;
        spawn(broker.subscribe(&group_id, &TopicSelection::All).await.unwrap())
    }

    /// Replays a fixed list of items, then ends.
    struct Scripted {
        items: BoxStream<'static, Result<Record>>,
        commits: Arc<Mutex<Vec<RecordPosition>>>,
    }

    impl Stream for Scripted {
        type Item = Result<Record>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.items.poll_next_unpin(cx)
        }
    }

    impl Subscription for Scripted {
        async fn commit(&mut self, position: &RecordPosition) -> Result<()> {
            self.commits.lock().unwrap().push(position.clone());
            Ok(())
        }
    }

    async fn settle(log: &EventLog, expected: usize) {
        for _ in 0..200 {
            if log.len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn records_are_classified_by_topic() {
        let broker = MemoryBroker::new("bridge");
        broker.append(record("orders", r#"{"id":1}"#, typed())).unwrap();
        broker
            .append(record(
                "orders.error",
                r#"{"id":2}"#,
                typed().with("failure-reason", "invalid quantity"),
            ))
            .unwrap();
        broker.append(record("orders.retry", r#"{"id":3}"#, typed())).unwrap();

        let (log, token, handle) = start(&broker).await;
        settle(&log, 3).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let tag = OrderCreated::type_tag();
        assert_eq!(log.count(Outcome::Consumed, &tag), 1);
        let failed = log.scan(Outcome::Failed, &tag);
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].error().map(|e| e.reason()), Some("invalid quantity"));
        assert_eq!(
            failed[1].error().map(|e| e.reason()),
            Some("routed to error topic orders.retry")
        );
    }

    #[tokio::test]
    async fn poison_records_are_committed_and_skipped() {
        let broker = MemoryBroker::new("bridge");
        broker.append(record("orders", r#"{"id":1}"#, Headers::new())).unwrap();
        broker.append(record("orders", "not json", typed())).unwrap();
        broker.append(record("orders", r#"{"id":3}"#, typed())).unwrap();

        let (log, token, handle) = start(&broker).await;
        settle(&log, 1).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let consumed = log.scan(Outcome::Consumed, &OrderCreated::type_tag());
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].message::<OrderCreated>(), Some(&OrderCreated { id: 3 }));
        assert_eq!(broker.committed("wiretap-subscribe-to-all", "orders"), Some(3));
    }

    #[tokio::test]
    async fn context_headers_are_kept_on_the_event() {
        let broker = MemoryBroker::new("bridge");
        broker
            .append(record(
                "orders",
                r#"{"id":1}"#,
                typed().with("X-Correlation-Id", "c-1").with("other", "ignored"),
            ))
            .unwrap();

        let (log, token, handle) = start(&broker).await;
        settle(&log, 1).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let consumed = log.scan(Outcome::Consumed, &OrderCreated::type_tag());
        assert_eq!(consumed[0].context().get("x-correlation-id"), Some("c-1"));
        assert_eq!(consumed[0].context().get("other"), None);
        assert_eq!(consumed[0].delivery().and_then(|d| d.offset), Some(0));
    }

    #[tokio::test]
    async fn failed_commits_do_not_stop_capture() {
        let broker = MemoryBroker::new("bridge");
        broker.append(record("orders", r#"{"id":1}"#, typed())).unwrap();

        let (log, token, handle) = start(&broker).await;
        broker.set_reachable(false);
        settle(&log, 1).await;
        assert_eq!(log.len(), 1);
        assert_eq!(broker.committed("wiretap-subscribe-to-all", "orders"), None);

        broker.set_reachable(true);
        broker.append(record("orders", r#"{"id":2}"#, typed())).unwrap();
        settle(&log, 2).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(log.count(Outcome::Consumed, &OrderCreated::type_tag()), 2);
        assert_eq!(broker.committed("wiretap-subscribe-to-all", "orders"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_are_retried() {
        let order = Record {
            topic: Arc::from("orders"),
            offset: 7,
            key: None,
            payload: br#"{"id":7}"#.to_vec(),
            headers: typed(),
        };
        let commits = Arc::new(Mutex::new(Vec::new()));
        let scripted = Scripted {
            items: futures_util::stream::iter(vec![
                Err(Error::subscription("leader not available")),
                Ok(order),
            ])
            .boxed(),
            commits: commits.clone(),
        };

        let (log, _token, handle) = spawn(scripted);
        handle.await.unwrap().unwrap();

        let consumed = log.scan(Outcome::Consumed, &OrderCreated::type_tag());
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].message::<OrderCreated>(), Some(&OrderCreated { id: 7 }));
        assert_eq!(
            *commits.lock().unwrap(),
            vec![RecordPosition {
                topic: Arc::from("orders"),
                offset: 7
            }]
        );
    }
}
