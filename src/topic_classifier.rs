use crate::Outcome;

/// Splits topics into regular ones and error/retry ones by name suffix.
///
/// Messages read from a topic ending with one of the suffixes are recorded as
/// [`Outcome::Failed`], everything else as [`Outcome::Consumed`].
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    suffixes: Vec<String>,
}

impl TopicClassifier {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_error_topic(&self, topic: &str) -> bool {
        self.suffixes
            .iter()
            .any(|suffix| !suffix.is_empty() && topic.ends_with(suffix.as_str()))
    }

    pub fn classify(&self, topic: &str) -> Outcome {
        if self.is_error_topic(topic) {
            Outcome::Failed
        } else {
            Outcome::Consumed
        }
    }
}
