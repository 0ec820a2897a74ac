use std::{
    collections::HashMap,
    pin::{Pin, pin},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures_util::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::Notify;

use super::{Acknowledgment, Broker, OutgoingRecord, Producer, Record, RecordPosition, Subscription};
use crate::{Error, Headers, Result, TopicSelection, config::Config};

#[derive(Debug)]
struct Stored {
    sequence: u64,
    key: Option<String>,
    payload: Vec<u8>,
    headers: Headers,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<Arc<str>, Vec<Stored>>,
    /// Next offset to read, per `(group, topic)`.
    committed: HashMap<(String, Arc<str>), u64>,
    sequence: u64,
}

#[derive(Debug)]
struct State {
    name: Arc<str>,
    inner: Mutex<Inner>,
    appended: Notify,
    reachable: AtomicBool,
}

impl State {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::connection(format!("{} is unreachable", self.name)))
        }
    }
}

/// An in-process broker with topics, offsets and consumer groups.
///
/// - Topics are append-only logs created on first write.
/// - Each consumer group keeps a committed offset per topic. A new subscription
///   resumes from it, or from the earliest record.
/// - A subscription delivers records of all selected topics in the order they
///   were appended, including topics created after it started.
/// - [`set_reachable(false)`](Self::set_reachable) makes connects, sends and
///   commits fail, to exercise startup and error paths.
///
/// Clones share the same broker.
///
/// # Example
///
/// ```rust
/// use wiretap::broker::MemoryBroker;
///
/// let broker = MemoryBroker::new("orders-test");
/// assert_eq!(broker.name(), "orders-test");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl MemoryBroker {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            state: Arc::new(State {
                name: name.into(),
                inner: Mutex::new(Inner::default()),
                appended: Notify::new(),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::Release);
    }

    pub fn create_topic(&self, topic: &str) {
        self.state.lock().topics.entry(Arc::from(topic)).or_default();
    }

    /// Topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.state.lock().topics.keys().map(|t| t.to_string()).collect();
        topics.sort();
        topics
    }

    /// Number of records stored in a topic.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.state.lock().topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Next offset the group will read from `topic`, if it committed any.
    pub fn committed(&self, group_id: &str, topic: &str) -> Option<u64> {
        self.state
            .lock()
            .committed
            .get(&(group_id.to_string(), Arc::from(topic)))
            .copied()
    }

    /// Append a record as any producer would. Wakes every subscription.
    pub fn append(&self, record: OutgoingRecord) -> Result<Acknowledgment> {
        self.state.ensure_reachable()?;
        let offset = {
            let mut inner = self.state.lock();
            let sequence = inner.sequence;
            inner.sequence += 1;
            let log = inner.topics.entry(record.topic.clone()).or_default();
            log.push(Stored {
                sequence,
                key: record.key,
                payload: record.payload,
                headers: record.headers,
            });
            (log.len() - 1) as u64
        };
        self.state.appended.notify_waiters();
        Ok(Acknowledgment {
            topic: record.topic,
            offset,
        })
    }
}

impl Broker for MemoryBroker {
    type Producer = MemoryProducer;
    type Subscription = MemorySubscription;

    fn bootstrap_servers(&self) -> String {
        format!("memory://{}", self.state.name)
    }

    async fn connect_producer(&self, config: &Config) -> Result<MemoryProducer> {
        if let Some(servers) = &config.bootstrap_servers {
            let own = self.bootstrap_servers();
            if *servers != own {
                return Err(Error::connection(format!(
                    "{servers} is not served by this broker, use {own}"
                )));
            }
        }
        self.state.ensure_reachable()?;
        Ok(MemoryProducer {
            broker: self.clone(),
        })
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topics: &TopicSelection,
    ) -> Result<MemorySubscription> {
        self.state.ensure_reachable()?;
        Ok(MemorySubscription::new(
            self.state.clone(),
            group_id.to_string(),
            topics.clone(),
        ))
    }
}

/// Producer handle of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
}

impl Producer for MemoryProducer {
    async fn send(&self, record: OutgoingRecord) -> Result<Acknowledgment> {
        let topic = record.topic.clone();
        self.broker.append(record).map_err(|e| Error::Publish {
            topic,
            reason: Arc::from(e.to_string()),
        })
    }
}

struct Cursor {
    state: Arc<State>,
    group_id: String,
    topics: TopicSelection,
    /// Next offset to deliver, per topic.
    positions: HashMap<Arc<str>, u64>,
}

impl Cursor {
    async fn next_record(&mut self) -> Record {
        loop {
            let state = self.state.clone();
            let mut notified = pin!(state.appended.notified());
            notified.as_mut().enable();
            if let Some(record) = self.take_next() {
                return record;
            }
            notified.await;
        }
    }

    /// Oldest undelivered record across the selected topics.
    fn take_next(&mut self) -> Option<Record> {
        let inner = self.state.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut oldest: Option<(&Arc<str>, u64, &Stored)> = None;
        for (topic, log) in &inner.topics {
            if !self.topics.includes(topic) {
                continue;
            }
            let position = *self.positions.entry(topic.clone()).or_insert_with(|| {
                inner
                    .committed
                    .get(&(self.group_id.clone(), topic.clone()))
                    .copied()
                    .unwrap_or(0)
            });
            if let Some(stored) = log.get(position as usize) {
                if oldest.is_none_or(|(_, _, o)| stored.sequence < o.sequence) {
                    oldest = Some((topic, position, stored));
                }
            }
        }
        let (topic, offset, stored) = oldest?;
        let record = Record {
            topic: topic.clone(),
            offset,
            key: stored.key.clone(),
            payload: stored.payload.clone(),
            headers: stored.headers.clone(),
        };
        self.positions.insert(record.topic.clone(), offset + 1);
        Some(record)
    }
}

/// Consumer-group subscription of a [`MemoryBroker`].
pub struct MemorySubscription {
    state: Arc<State>,
    group_id: String,
    records: BoxStream<'static, Result<Record>>,
}

impl MemorySubscription {
    fn new(state: Arc<State>, group_id: String, topics: TopicSelection) -> Self {
        let cursor = Cursor {
            state: state.clone(),
            group_id: group_id.clone(),
            topics,
            positions: HashMap::new(),
        };
        let records = futures_util::stream::unfold(cursor, |mut cursor| async move {
            let record = cursor.next_record().await;
            Some((Ok(record), cursor))
        })
        .boxed();
        Self {
            state,
            group_id,
            records,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl Stream for MemorySubscription {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_next_unpin(cx)
    }
}

impl Subscription for MemorySubscription {
    async fn commit(&mut self, position: &RecordPosition) -> Result<()> {
        self.state.ensure_reachable().map_err(|e| Error::Commit {
            topic: position.topic.clone(),
            offset: position.offset,
            reason: Arc::from(e.to_string()),
        })?;
        let mut inner = self.state.lock();
        let next = inner
            .committed
            .entry((self.group_id.clone(), position.topic.clone()))
            .or_insert(0);
        *next = (*next).max(position.offset + 1);
        Ok(())
    }
}
