use crate::{Headers, TEST_CASE_HEADER};

/// Optional parts of a published record.
///
/// # Example
///
/// ```rust
/// use wiretap::PublishOptions;
///
/// let options = PublishOptions::new()
///     .with_key("order-42")
///     .with_header("x-correlation-id", "c-1")
///     .with_test_case("order is shipped");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub key: Option<String>,
    pub headers: Headers,
    pub test_case: Option<String>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Name the test case in the `testCase` header.
    ///
    /// An explicit `testCase` header given via [`with_header`](Self::with_header) wins.
    pub fn with_test_case(mut self, test_case: impl Into<String>) -> Self {
        self.test_case = Some(test_case.into());
        self
    }

    /// Headers to send, with the test case applied.
    pub(crate) fn resolved_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        if let Some(test_case) = &self.test_case {
            if !headers.contains(TEST_CASE_HEADER) {
                headers.insert(TEST_CASE_HEADER, test_case.clone());
            }
        }
        headers
    }
}
