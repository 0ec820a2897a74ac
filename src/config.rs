use std::{fmt, sync::Arc, time::Duration};

/// Which topics the bridge consumer subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TopicSelection {
    /// Every topic the broker knows about, including ones created later.
    #[default]
    All,
    /// Only the named topics.
    Topics(Vec<String>),
}

impl TopicSelection {
    pub fn includes(&self, topic: &str) -> bool {
        match self {
            TopicSelection::All => true,
            TopicSelection::Topics(topics) => topics.iter().any(|t| t == topic),
        }
    }
}

/// Connection details exposed to the application under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedConfiguration {
    pub bootstrap_servers: String,
}

type ExposeFn = Arc<dyn Fn(&ExposedConfiguration) -> Vec<String> + Send + Sync>;

/// Runtime configuration for [`Wiretap`](crate::Wiretap).
///
/// Use the builder methods to customize, or use [`Default`] for sensible defaults.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use wiretap::Config;
///
/// let config = Config::default()
///     .with_bootstrap_servers("localhost:29092")
///     .with_max_parked_records(1_000)
///     .with_poll_interval(Duration::from_millis(5))      // Faster assertions
///     .with_default_timeout(Duration::from_secs(10))
///     .with_error_topic_suffixes(["dlq", "retry"]);
/// ```
#[derive(Clone)]
pub struct Config {
    /// Endpoint the broker is expected to serve. The producer refuses to
    /// connect to a broker answering elsewhere, and the value is reported by
    /// [`Wiretap::configuration`](crate::Wiretap::configuration).
    /// Default: unset, the broker's own endpoint is used
    pub bootstrap_servers: Option<String>,

    /// Topics whose name ends with one of these suffixes hold failed messages.
    /// Default: `error`, `errorTopic`, `retry`, `retryTopic`
    pub error_topic_suffixes: Vec<String>,

    /// How long a waiting assertion sleeps between two scans of the event log.
    /// Bounds how late a match is noticed.
    /// Default: 20 ms
    pub poll_interval: Duration,

    /// Assertion timeout used when none is given.
    /// Default: 5 s
    pub default_timeout: Duration,

    /// Consumer group of the bridge subscription. Must differ from every group
    /// used by the application under test.
    /// Default: `wiretap-subscribe-to-all`
    pub group_id: String,

    /// Topics observed by the bridge consumer.
    /// Default: [`TopicSelection::All`]
    pub topics: TopicSelection,

    /// Headers starting with this prefix (case-insensitive) are propagated context.
    /// Default: `x-`
    pub context_header_prefix: String,

    /// Header read as the failure reason of records on error topics.
    /// Default: `failure-reason`
    pub failure_header: String,

    /// How long startup waits for the broker before giving up.
    /// Default: 10 s
    pub connect_timeout: Duration,

    /// Records of types nobody asserted on yet are held until their type is
    /// registered. Past this many, further ones are dropped.
    /// Default: 10 000
    pub max_parked_records: usize,

    expose: Option<ExposeFn>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bootstrap_servers: None,
            error_topic_suffixes: ["error", "errorTopic", "retry", "retryTopic"]
                .map(String::from)
                .to_vec(),
            poll_interval: Duration::from_millis(20),
            default_timeout: Duration::from_secs(5),
            group_id: "wiretap-subscribe-to-all".into(),
            topics: TopicSelection::All,
            context_header_prefix: "x-".into(),
            failure_header: "failure-reason".into(),
            connect_timeout: Duration::from_secs(10),
            max_parked_records: 10_000,
            expose: None,
        }
    }
}

impl Config {
    pub fn with_bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    /// Replace the error/retry topic suffixes.
    pub fn with_error_topic_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_topic_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the poll interval of waiting assertions.
    ///
    /// Lower values notice matches sooner at the cost of more scans.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_topics(mut self, topics: TopicSelection) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_context_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.context_header_prefix = prefix.into();
        self
    }

    pub fn with_failure_header(mut self, header: impl Into<String>) -> Self {
        self.failure_header = header.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_parked_records(mut self, limit: usize) -> Self {
        self.max_parked_records = limit;
        self
    }

    /// Add configuration lines derived from the resolved broker endpoint.
    ///
    /// They are returned by [`Wiretap::configuration`](crate::Wiretap::configuration)
    /// ahead of the built-in `kafka.*` lines.
    ///
    /// ```rust
    /// use wiretap::Config;
    ///
    /// let config = Config::default().with_exposed_configuration(|exposed| {
    ///     vec![format!("app.kafka.servers={}", exposed.bootstrap_servers)]
    /// });
    /// ```
    pub fn with_exposed_configuration<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExposedConfiguration) -> Vec<String> + Send + Sync + 'static,
    {
        self.expose = Some(Arc::new(f));
        self
    }

    /// Configuration lines for the application under test.
    pub(crate) fn exposed_lines(&self, exposed: &ExposedConfiguration) -> Vec<String> {
        let mut lines = self.expose.as_ref().map(|f| f(exposed)).unwrap_or_default();
        lines.push(format!("kafka.bootstrapServers={}", exposed.bootstrap_servers));
        lines.push("kafka.isSecure=false".to_string());
        lines
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("error_topic_suffixes", &self.error_topic_suffixes)
            .field("poll_interval", &self.poll_interval)
            .field("default_timeout", &self.default_timeout)
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_parked_records", &self.max_parked_records)
            .finish_non_exhaustive()
    }
}
