use std::{borrow::Cow, fmt, hash::Hash, ops::Deref, sync::Arc};

/// A stable identifier for a logical message type.
///
/// The tag is attached to every published record (see [`TYPE_HEADER`](crate::TYPE_HEADER))
/// and partitions the [`EventLog`](crate::EventLog). It is independent of the
/// wire encoding: two services agree on a tag, not on a Rust type path.
///
/// Tags are cheap to clone and compare by value.
///
/// # Example
///
/// ```rust
/// use wiretap::TypeTag;
///
/// let tag = TypeTag::from_static("OrderCreated");
/// assert_eq!(tag, TypeTag::new("OrderCreated"));
/// assert_eq!(tag.as_str(), "OrderCreated");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(Arc<str>);

impl TypeTag {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    /// Build a tag from a `'static` string. Used by `#[derive(Message)]`.
    pub fn from_static(tag: &'static str) -> Self {
        Self(Arc::from(tag))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for TypeTag {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for TypeTag {
    fn from(tag: &str) -> Self {
        Self(Arc::from(tag))
    }
}

impl From<String> for TypeTag {
    fn from(tag: String) -> Self {
        Self(Arc::from(tag))
    }
}

impl From<Cow<'static, str>> for TypeTag {
    fn from(tag: Cow<'static, str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_by_value() {
        let a = TypeTag::new(String::from("OrderCreated"));
        let b = TypeTag::from_static("OrderCreated");
        assert_eq!(a, b);
        assert_ne!(a, TypeTag::from("OrderCancelled"));
    }

    #[test]
    fn display_is_the_raw_tag() {
        assert_eq!(TypeTag::from("billing.Invoice").to_string(), "billing.Invoice");
    }
}
