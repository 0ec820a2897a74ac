use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};

use crate::{
    CapturedEvent, EventLog, Message, Outcome, TimeoutFailure, TypeTag, error::MAX_SAMPLES,
};

/// Query side of the harness: waits for a matching event with a deadline.
///
/// Each attempt scans a snapshot of the `(outcome, type tag)` partition of the
/// [`EventLog`]. Events recorded before the call match on the first scan, with
/// no initial delay. Otherwise the caller sleeps for at most the poll interval
/// and scans again, until the deadline passes.
///
/// Matching never consumes an event: any number of waiters, concurrent or
/// not, may match the same one.
#[derive(Debug, Clone)]
pub struct WaitEngine {
    log: Arc<EventLog>,
    poll_interval: Duration,
}

enum Scan {
    Found(Arc<CapturedEvent>),
    Missed {
        observed: usize,
        type_mismatches: usize,
        samples: Vec<String>,
    },
}

impl WaitEngine {
    pub fn new(log: Arc<EventLog>, poll_interval: Duration) -> Self {
        Self { log, poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until an event of type `T` with the given outcome satisfies `predicate`.
    ///
    /// Events whose payload is not a `T` are skipped even when their tag equals
    /// `T::type_tag()`. Returns the first matching event, or a [`TimeoutFailure`]
    /// once `timeout` has elapsed without a match.
    pub async fn wait_for<T, F>(
        &self,
        outcome: Outcome,
        timeout: Duration,
        predicate: F,
    ) -> Result<Arc<CapturedEvent>, TimeoutFailure>
    where
        T: Message,
        F: Fn(&T, &CapturedEvent) -> bool,
    {
        let type_tag = T::type_tag();
        let start = Instant::now();
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + Duration::from_secs(60 * 60 * 24 * 365));

        loop {
            match self.scan(outcome, &type_tag, &predicate) {
                Scan::Found(event) => {
                    tracing::trace!(
                        %outcome,
                        %type_tag,
                        elapsed = ?start.elapsed(),
                        "expectation met"
                    );
                    return Ok(event);
                }
                Scan::Missed {
                    observed,
                    type_mismatches,
                    samples,
                } => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(%outcome, %type_tag, observed, "expectation timed out");
                        return Err(TimeoutFailure {
                            outcome,
                            type_tag,
                            timeout,
                            observed,
                            type_mismatches,
                            samples,
                        });
                    }
                    sleep(self.poll_interval.min(deadline - now)).await;
                }
            }
        }
    }

    fn scan<T, F>(&self, outcome: Outcome, type_tag: &TypeTag, predicate: &F) -> Scan
    where
        T: Message,
        F: Fn(&T, &CapturedEvent) -> bool,
    {
        let events = self.log.scan(outcome, type_tag);
        let mut type_mismatches = 0;
        let mut samples = Vec::new();
        for event in &events {
            match event.message::<T>() {
                None => type_mismatches += 1,
                Some(message) if predicate(message, event) => return Scan::Found(event.clone()),
                Some(message) => {
                    if samples.len() < MAX_SAMPLES {
                        samples.push(format!("{message:?}"));
                    }
                }
            }
        }
        Scan::Missed {
            observed: events.len(),
            type_mismatches,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{Headers, Interceptor, Payload};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }
    impl Message for OrderCreated {
        fn type_tag() -> TypeTag {
            TypeTag::from_static("OrderCreated")
        }
    }

    /// Another shape that claims the same tag.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LegacyOrderCreated {
        id: String,
    }
    impl Message for LegacyOrderCreated {
        fn type_tag() -> TypeTag {
            TypeTag::from_static("OrderCreated")
        }
    }

    const POLL: Duration = Duration::from_millis(20);

    fn setup() -> (Arc<Interceptor>, WaitEngine) {
        let log = Arc::new(EventLog::new());
        (
            Arc::new(Interceptor::new(log.clone(), "x-")),
            WaitEngine::new(log, POLL),
        )
    }

    fn consume(interceptor: &Interceptor, id: u64) {
        interceptor.on_consumed(
            OrderCreated::type_tag(),
            Payload::new(OrderCreated { id }),
            Headers::new(),
        );
    }

    fn id_is(id: u64) -> impl Fn(&OrderCreated, &CapturedEvent) -> bool {
        move |m, _| m.id == id
    }

    #[tokio::test(start_paused = true)]
    async fn already_recorded_event_matches_without_waiting() {
        let (interceptor, waiter) = setup();
        consume(&interceptor, 42);

        let start = Instant::now();
        let event = waiter
            .wait_for(Outcome::Consumed, Duration::from_secs(5), id_is(42))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(event.message::<OrderCreated>(), Some(&OrderCreated { id: 42 }));
    }

    #[tokio::test(start_paused = true)]
    async fn late_event_is_noticed_within_one_poll_interval() {
        let (interceptor, waiter) = setup();
        let writer = interceptor.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            consume(&writer, 7);
        });

        let start = Instant::now();
        waiter
            .wait_for(Outcome::Consumed, Duration::from_secs(5), id_is(7))
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(150) + POLL, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_at_deadline() {
        let (_interceptor, waiter) = setup();
        let timeout = Duration::from_millis(500);

        let start = Instant::now();
        let failure = waiter
            .wait_for(Outcome::Consumed, timeout, id_is(1))
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= timeout, "{elapsed:?}");
        assert!(elapsed <= timeout + POLL, "{elapsed:?}");
        assert!(failure.nothing_observed());
        assert_eq!(failure.timeout, timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_scans_once() {
        let (interceptor, waiter) = setup();
        consume(&interceptor, 1);
        assert!(waiter.wait_for(Outcome::Consumed, Duration::ZERO, id_is(1)).await.is_ok());
        assert!(waiter.wait_for(Outcome::Consumed, Duration::ZERO, id_is(2)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_events_are_reported() {
        let (interceptor, waiter) = setup();
        for id in 0..8 {
            consume(&interceptor, id);
        }

        let failure = waiter
            .wait_for(Outcome::Consumed, Duration::from_millis(100), id_is(99))
            .await
            .unwrap_err();

        assert_eq!(failure.observed, 8);
        assert_eq!(failure.rejected(), 8);
        assert_eq!(failure.samples.len(), MAX_SAMPLES);
        assert_eq!(failure.samples[0], "OrderCreated { id: 0 }");
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_partitions_are_not_mixed() {
        let (interceptor, waiter) = setup();
        interceptor.on_published(
            OrderCreated::type_tag(),
            Payload::new(OrderCreated { id: 3 }),
            Headers::new(),
        );

        let failure = waiter
            .wait_for(Outcome::Consumed, Duration::from_millis(50), id_is(3))
            .await
            .unwrap_err();
        assert!(failure.nothing_observed());
        assert!(waiter.wait_for(Outcome::Published, Duration::ZERO, id_is(3)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn same_tag_different_type_never_matches() {
        let (interceptor, waiter) = setup();
        interceptor.on_consumed(
            LegacyOrderCreated::type_tag(),
            Payload::new(LegacyOrderCreated { id: "42".into() }),
            Headers::new(),
        );

        let failure = waiter
            .wait_for::<OrderCreated, _>(Outcome::Consumed, Duration::from_millis(50), |_, _| true)
            .await
            .unwrap_err();
        assert_eq!(failure.observed, 1);
        assert_eq!(failure.type_mismatches, 1);
        assert_eq!(failure.rejected(), 0);

        assert!(
            waiter
                .wait_for::<LegacyOrderCreated, _>(Outcome::Consumed, Duration::ZERO, |m, _| m.id == "42")
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_share_events() {
        let (interceptor, waiter) = setup();
        let writer = interceptor.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            consume(&writer, 5);
        });

        let even = waiter.wait_for(Outcome::Consumed, Duration::from_millis(200), |m: &OrderCreated, _| {
            m.id % 2 == 0
        });
        let five = waiter.wait_for(Outcome::Consumed, Duration::from_millis(200), id_is(5));
        let any = waiter.wait_for(Outcome::Consumed, Duration::from_millis(200), |_: &OrderCreated, _| true);

        let (even, five, any) = tokio::join!(even, five, any);
        assert!(even.is_err());
        assert_eq!(five.unwrap().id(), any.unwrap().id());
    }
}
