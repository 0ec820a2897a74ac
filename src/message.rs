use std::{any::Any, fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::TypeTag;

/// Marker trait for messages observed by wiretap.
///
/// Implement it for every payload type a test publishes or asserts on, usually
/// with `#[derive(Message)]`. The [`type_tag`](Message::type_tag) is written to the
/// [`TYPE_HEADER`](crate::TYPE_HEADER) of published records and is how captured
/// events are partitioned, so it must be stable across the processes under test.
///
/// The default tag is `std::any::type_name`, which includes the module path.
/// The derive macro uses the bare type identifier instead, or the value given in
/// `#[message(tag = "...")]`. Two types sharing a tag cannot both be used with
/// one harness; the second one fails with [`Error::TagConflict`](crate::Error::TagConflict).
pub trait Message: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    fn type_tag() -> TypeTag
    where
        Self: Sized,
    {
        TypeTag::from_static(std::any::type_name::<Self>())
    }
}

pub(crate) trait ErasedMessage: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Message> ErasedMessage for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A captured message value with its concrete type erased.
///
/// Payloads are shared, never copied, between the event log and every waiter
/// that scans it. [`downcast_ref`](Self::downcast_ref) checks the concrete Rust
/// type, so a payload is never mistaken for another type that happens to share
/// its tag.
#[derive(Clone)]
pub struct Payload(Arc<dyn ErasedMessage>);

impl Payload {
    pub fn new<T: Message>(message: T) -> Self {
        Self(Arc::new(message))
    }

    /// Returns the value if it is a `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Message>(&self) -> bool {
        self.0.as_any().is::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
