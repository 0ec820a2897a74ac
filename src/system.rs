use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tokio_util::sync::CancellationToken;

use crate::{
    CapturedEvent, Codec, Config, Delivery, Error, EventLog, ExposedConfiguration, FailureDetail,
    Interceptor, JsonCodec, Message, Outcome, Payload, PublishOptions, Result, TYPE_HEADER,
    WaitEngine,
    broker::{Broker, OutgoingRecord, Producer},
    captured_event::Capture,
    internal::{BridgeConsumer, Decoder},
};

/// Test-side view of a broker-backed system.
///
/// Publishes messages on behalf of the test, observes every topic through a
/// dedicated consumer group, and answers assertions of the form "this message
/// was published / consumed / failed within this time window".
///
/// Assertions return `&Self` so they can be chained:
///
/// ```rust
/// # use std::time::Duration;
/// # use serde::{Deserialize, Serialize};
/// # use wiretap::{Config, Message, Wiretap, broker::MemoryBroker};
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
/// struct OrderCreated {
///     id: u64,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wiretap::Result {
/// let mut tap = Wiretap::start(MemoryBroker::new("docs"), Config::default()).await?;
/// let order = OrderCreated { id: 42 };
///
/// tap.publish("orders", &order)
///     .await?
///     .should_be_published(Duration::from_secs(1), &order)
///     .await?
///     .should_be_consumed(None, &order)
///     .await?;
///
/// tap.stop().await
/// # }
/// ```
pub struct Wiretap<B: Broker, C: Codec = JsonCodec> {
    broker: B,
    config: Config,
    producer: B::Producer,
    interceptor: Arc<Interceptor>,
    decoder: Arc<Decoder<C>>,
    waiter: WaitEngine,
    cancel_token: Arc<CancellationToken>,
    bridge: Option<JoinHandle<Result<()>>>,
}

impl<B: Broker> Wiretap<B, JsonCodec> {
    /// Connect to the broker with the JSON codec and start observing.
    pub async fn start(broker: B, config: Config) -> Result<Self> {
        Self::start_with_codec(broker, config, JsonCodec).await
    }
}

impl<B: Broker, C: Codec> Wiretap<B, C> {
    /// Connect the producer, subscribe the bridge consumer and spawn it.
    ///
    /// Fails with [`Error::Connection`] if the broker refuses the connection
    /// or does not answer within [`Config::connect_timeout`]. A producer that
    /// was already connected is closed again before returning the error.
    pub async fn start_with_codec(broker: B, config: Config, codec: C) -> Result<Self> {
        let start = Instant::now();
        let deadline = start
            .checked_add(config.connect_timeout)
            .unwrap_or_else(|| start + Duration::from_secs(60 * 60 * 24 * 365));
        let no_answer = || {
            Error::connection(format!(
                "no answer from {} within {:?}",
                broker.bootstrap_servers(),
                config.connect_timeout
            ))
        };

        let producer = timeout_at(deadline, broker.connect_producer(&config))
            .await
            .map_err(|_| no_answer())?
            .map_err(into_connection)?;
        let subscription = match timeout_at(
            deadline,
            broker.subscribe(&config.group_id, &config.topics),
        )
        .await
        {
            Ok(Ok(subscription)) => subscription,
            failed => {
                let error = match failed {
                    Ok(Err(e)) => into_connection(e),
                    _ => no_answer(),
                };
                tracing::warn!(%error, "subscription failed, closing producer");
                producer.close().await;
                return Err(error);
            }
        };

        let log = Arc::new(EventLog::new());
        let interceptor = Arc::new(Interceptor::new(
            log.clone(),
            config.context_header_prefix.clone(),
        ));
        let decoder = Arc::new(Decoder::new(
            codec,
            interceptor.clone(),
            config.max_parked_records,
        ));
        let cancel_token = Arc::new(CancellationToken::new());

        let bridge = BridgeConsumer::new(subscription, decoder.clone(), &config, cancel_token.clone());
        let bridge = tokio::spawn(async move {
            let result = bridge.run().await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "bridge consumer died");
            }
            result
        });

        let tap = Self {
            waiter: WaitEngine::new(log, config.poll_interval),
            broker,
            config,
            producer,
            interceptor,
            decoder,
            cancel_token,
            bridge: Some(bridge),
        };
        tracing::info!(
            bootstrap_servers = %tap.exposed_configuration().bootstrap_servers,
            group_id = %tap.config.group_id,
            "wiretap started"
        );
        Ok(tap)
    }

    /// Make records tagged for `T` decodable.
    ///
    /// Every method taking a `T` registers it, so calling this is only needed
    /// when records of `T` are inspected through [`events`](Self::events) alone.
    ///
    /// Fails with [`Error::TagConflict`] if another type already uses the tag
    /// of `T`, e.g. two types with the same name in different modules.
    pub fn register<T: Message>(&self) -> Result<&Self> {
        self.decoder.register::<T>()?;
        Ok(self)
    }

    /// Publish `message` to `topic` and record it as published.
    pub async fn publish<T: Message + Clone>(&self, topic: &str, message: &T) -> Result<&Self> {
        self.publish_with(topic, message, PublishOptions::default())
            .await
    }

    /// Publish with a key, extra headers or a test case name.
    ///
    /// The event is recorded only after the broker acknowledged the record.
    pub async fn publish_with<T: Message + Clone>(
        &self,
        topic: &str,
        message: &T,
        options: PublishOptions,
    ) -> Result<&Self> {
        self.decoder.register::<T>()?;
        let type_tag = T::type_tag();
        let mut headers = options.resolved_headers();
        headers.insert(TYPE_HEADER, type_tag.as_str());

        let record = OutgoingRecord {
            topic: Arc::from(topic),
            key: options.key.clone(),
            payload: self.decoder.codec().encode(message)?,
            headers: headers.clone(),
        };
        let ack = self.producer.send(record).await?;
        tracing::debug!(topic = %ack.topic, offset = ack.offset, %type_tag, "message published");

        self.interceptor.record(
            Capture::new(
                Outcome::Published,
                type_tag,
                Payload::new(message.clone()),
                headers,
            )
            .with_delivery(
                Delivery::new(ack.topic)
                    .with_key(options.key)
                    .with_offset(ack.offset),
            ),
        );
        Ok(self)
    }

    /// Wait until `message` has been published by this harness.
    pub async fn should_be_published<T: Message + PartialEq>(
        &self,
        timeout: impl Into<Option<Duration>>,
        message: &T,
    ) -> Result<&Self> {
        self.expect(Outcome::Published, timeout, |m: &T, _| m == message)
            .await
    }

    pub async fn should_be_published_on_condition<T, F>(
        &self,
        timeout: impl Into<Option<Duration>>,
        condition: F,
    ) -> Result<&Self>
    where
        T: Message,
        F: Fn(&T) -> bool,
    {
        self.expect(Outcome::Published, timeout, |m: &T, _| condition(m))
            .await
    }

    /// Wait until `message` has been read from a regular topic.
    pub async fn should_be_consumed<T: Message + PartialEq>(
        &self,
        timeout: impl Into<Option<Duration>>,
        message: &T,
    ) -> Result<&Self> {
        self.expect(Outcome::Consumed, timeout, |m: &T, _| m == message)
            .await
    }

    pub async fn should_be_consumed_on_condition<T, F>(
        &self,
        timeout: impl Into<Option<Duration>>,
        condition: F,
    ) -> Result<&Self>
    where
        T: Message,
        F: Fn(&T) -> bool,
    {
        self.expect(Outcome::Consumed, timeout, |m: &T, _| condition(m))
            .await
    }

    /// Wait until `message` has failed with `error`.
    ///
    /// Both the message and the failure reason must be equal.
    pub async fn should_be_failed<T: Message + PartialEq>(
        &self,
        timeout: impl Into<Option<Duration>>,
        message: &T,
        error: impl Into<FailureDetail>,
    ) -> Result<&Self> {
        let error = error.into();
        self.expect(Outcome::Failed, timeout, |m: &T, event| {
            m == message && event.error() == Some(&error)
        })
        .await
    }

    pub async fn should_be_failed_on_condition<T, F>(
        &self,
        timeout: impl Into<Option<Duration>>,
        condition: F,
    ) -> Result<&Self>
    where
        T: Message,
        F: Fn(&T, &FailureDetail) -> bool,
    {
        self.expect(Outcome::Failed, timeout, |m: &T, event| {
            event.error().is_some_and(|error| condition(m, error))
        })
        .await
    }

    async fn expect<T, F>(
        &self,
        outcome: Outcome,
        timeout: impl Into<Option<Duration>>,
        predicate: F,
    ) -> Result<&Self>
    where
        T: Message,
        F: Fn(&T, &CapturedEvent) -> bool,
    {
        self.decoder.register::<T>()?;
        let timeout = timeout.into().unwrap_or(self.config.default_timeout);
        self.waiter.wait_for(outcome, timeout, predicate).await?;
        Ok(self)
    }

    /// Capture hooks, for application code that reports its own outcomes.
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Everything captured so far.
    pub fn events(&self) -> &Arc<EventLog> {
        self.interceptor.log()
    }

    pub fn waiter(&self) -> &WaitEngine {
        &self.waiter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The configured endpoint, or the broker's own when none is set.
    pub fn exposed_configuration(&self) -> ExposedConfiguration {
        ExposedConfiguration {
            bootstrap_servers: self
                .config
                .bootstrap_servers
                .clone()
                .unwrap_or_else(|| self.broker.bootstrap_servers()),
        }
    }

    /// `key=value` lines that point the application under test at the broker.
    pub fn configuration(&self) -> Vec<String> {
        self.config.exposed_lines(&self.exposed_configuration())
    }

    /// Stop the bridge consumer, close the producer and discard captured events
    /// along with records still waiting for their type.
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(bridge) = self.bridge.take() else {
            return Ok(());
        };
        self.cancel_token.cancel();
        let result = bridge.await;
        self.producer.close().await;
        self.events().clear();
        self.decoder.discard_parked();
        tracing::info!("wiretap stopped");
        result??;
        Ok(())
    }
}

fn into_connection(error: Error) -> Error {
    match error {
        Error::Connection(_) => error,
        other => Error::connection(other),
    }
}

impl<B: Broker, C: Codec> fmt::Debug for Wiretap<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wiretap")
            .field("bootstrap_servers", &self.exposed_configuration().bootstrap_servers)
            .field("group_id", &self.config.group_id)
            .field("events", &self.events().len())
            .field("running", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}

impl<B: Broker, C: Codec> Drop for Wiretap<B, C> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
