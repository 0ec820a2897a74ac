use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    CaptureFailure, CapturedEvent, Codec, Delivery, Error, FailureDetail, Headers, Interceptor,
    Message, Outcome, Payload, Result, TypeTag, captured_event::Capture,
};

/// A broker record that has been classified but not decoded yet.
#[derive(Debug, Clone)]
pub(crate) struct Classified {
    pub outcome: Outcome,
    pub type_tag: TypeTag,
    pub delivery: Delivery,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub error: Option<FailureDetail>,
}

struct Registration<C> {
    type_id: TypeId,
    type_name: &'static str,
    decode: fn(&C, &[u8]) -> Result<Payload>,
}

struct DecoderState<C> {
    types: HashMap<TypeTag, Registration<C>>,
    /// Records of tags nobody registered yet, in arrival order.
    parked: HashMap<TypeTag, Vec<Classified>>,
    parked_len: usize,
    /// Records turned away because the parking area was full.
    overflowed: usize,
}

fn decode_as<T: Message, C: Codec>(codec: &C, bytes: &[u8]) -> Result<Payload> {
    Ok(Payload::new(codec.decode::<T>(bytes)?))
}

/// Decodes broker records into captured events.
///
/// Maps type tags to the Rust types registered for them. A record whose tag
/// has no registered type yet is parked and captured as soon as the type is
/// registered, so a message that arrives before the first assertion on its
/// type is not lost. At most `max_parked` records are held; later ones are
/// dropped until a registration frees room. The lock is held while a record
/// is handed to the interceptor, which keeps parked records ahead of newer
/// ones.
pub(crate) struct Decoder<C: Codec> {
    codec: C,
    interceptor: Arc<Interceptor>,
    max_parked: usize,
    state: Mutex<DecoderState<C>>,
}

impl<C: Codec> Decoder<C> {
    pub fn new(codec: C, interceptor: Arc<Interceptor>, max_parked: usize) -> Self {
        Self {
            codec,
            interceptor,
            max_parked,
            state: Mutex::new(DecoderState {
                types: HashMap::new(),
                parked: HashMap::new(),
                parked_len: 0,
                overflowed: 0,
            }),
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn lock(&self) -> MutexGuard<'_, DecoderState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `T` under its tag and capture any records parked for it.
    ///
    /// Registering the same type twice is a no-op. A tag already held by
    /// another type is an [`Error::TagConflict`].
    pub fn register<T: Message>(&self) -> Result<()> {
        let type_tag = T::type_tag();
        let mut state = self.lock();
        if let Some(existing) = state.types.get(&type_tag) {
            if existing.type_id == TypeId::of::<T>() {
                return Ok(());
            }
            return Err(Error::TagConflict {
                type_tag,
                registered: existing.type_name,
                requested: std::any::type_name::<T>(),
            });
        }
        let parked = state.parked.remove(&type_tag).unwrap_or_default();
        state.parked_len -= parked.len();
        let registration = Registration {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_as::<T, C>,
        };
        if !parked.is_empty() {
            tracing::debug!(%type_tag, count = parked.len(), "capturing parked records");
        }
        for record in parked {
            if let Err(failure) = self.decode_and_record(&registration, record) {
                tracing::warn!(%failure, "parked record skipped");
            }
        }
        state.types.insert(type_tag, registration);
        Ok(())
    }

    /// Decode and capture a record, or park it if its type is unknown.
    ///
    /// Returns `Ok(None)` when the record was parked.
    pub fn capture(
        &self,
        record: Classified,
    ) -> std::result::Result<Option<Arc<CapturedEvent>>, CaptureFailure> {
        let mut state = self.lock();
        match state.types.get(&record.type_tag) {
            Some(registration) => self.decode_and_record(registration, record).map(Some),
            None if state.parked_len >= self.max_parked => {
                state.overflowed += 1;
                tracing::warn!(
                    type_tag = %record.type_tag,
                    topic = %record.delivery.topic,
                    limit = self.max_parked,
                    "too many records of unregistered types, dropping record"
                );
                Ok(None)
            }
            None => {
                tracing::debug!(type_tag = %record.type_tag, "no type registered for tag, parking record");
                state
                    .parked
                    .entry(record.type_tag.clone())
                    .or_default()
                    .push(record);
                state.parked_len += 1;
                Ok(None)
            }
        }
    }

    /// Drop every parked record and return how many were held.
    pub fn discard_parked(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.parked_len;
        if discarded > 0 || state.overflowed > 0 {
            tracing::info!(
                discarded,
                overflowed = state.overflowed,
                tags = state.parked.len(),
                "dropping records no type was registered for"
            );
        }
        state.parked.clear();
        state.parked_len = 0;
        state.overflowed = 0;
        discarded
    }

    #[cfg(test)]
    fn parked_count(&self) -> usize {
        self.lock().parked.values().map(Vec::len).sum()
    }

    fn decode_and_record(
        &self,
        registration: &Registration<C>,
        record: Classified,
    ) -> std::result::Result<Arc<CapturedEvent>, CaptureFailure> {
        let payload =
            (registration.decode)(&self.codec, &record.payload).map_err(|e| CaptureFailure::Decode {
                topic: record.delivery.topic.clone(),
                offset: record.delivery.offset.unwrap_or_default(),
                type_tag: record.type_tag.clone(),
                reason: Arc::from(e.to_string()),
            })?;
        let mut capture = Capture::new(record.outcome, record.type_tag, payload, record.headers)
            .with_delivery(record.delivery);
        if let Some(error) = record.error {
            capture = capture.with_error(error);
        }
        Ok(self.interceptor.record(capture))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{EventLog, JsonCodec};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }
    impl Message for OrderCreated {
        fn type_tag() -> TypeTag {
            TypeTag::from_static("OrderCreated")
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Impostor {
        name: String,
    }
    impl Message for Impostor {
        fn type_tag() -> TypeTag {
            TypeTag::from_static("OrderCreated")
        }
    }

    fn decoder() -> Decoder<JsonCodec> {
        let interceptor = Arc::new(Interceptor::new(Arc::new(EventLog::new()), "x-"));
        Decoder::new(JsonCodec, interceptor, 16)
    }

    fn classified(offset: u64, payload: &str) -> Classified {
        Classified {
            outcome: Outcome::Consumed,
            type_tag: OrderCreated::type_tag(),
            delivery: Delivery::new("orders").with_offset(offset),
            payload: payload.as_bytes().to_vec(),
            headers: Headers::new(),
            error: None,
        }
    }

    fn consumed(decoder: &Decoder<JsonCodec>) -> Vec<u64> {
        decoder
            .interceptor
            .log()
            .scan(Outcome::Consumed, &OrderCreated::type_tag())
            .iter()
            .filter_map(|e| e.message::<OrderCreated>().map(|m| m.id))
            .collect()
    }

    #[test]
    fn registered_records_are_captured() {
        let decoder = decoder();
        decoder.register::<OrderCreated>().unwrap();
        let event = decoder.capture(classified(0, r#"{"id":42}"#)).unwrap();
        assert!(event.is_some());
        assert_eq!(consumed(&decoder), vec![42]);
    }

    #[test]
    fn unknown_records_are_parked_until_registration() {
        let decoder = decoder();
        assert!(decoder.capture(classified(0, r#"{"id":1}"#)).unwrap().is_none());
        assert!(decoder.capture(classified(1, r#"{"id":2}"#)).unwrap().is_none());
        assert_eq!(decoder.parked_count(), 2);
        assert!(consumed(&decoder).is_empty());

        decoder.register::<OrderCreated>().unwrap();
        decoder.capture(classified(2, r#"{"id":3}"#)).unwrap();

        assert_eq!(decoder.parked_count(), 0);
        assert_eq!(consumed(&decoder), vec![1, 2, 3]);
    }

    #[test]
    fn undecodable_record_is_a_capture_failure() {
        let decoder = decoder();
        decoder.register::<OrderCreated>().unwrap();
        let failure = decoder.capture(classified(5, "garbage")).unwrap_err();
        assert!(matches!(failure, CaptureFailure::Decode { offset: 5, .. }));
        assert!(consumed(&decoder).is_empty());
    }

    #[test]
    fn a_tag_cannot_change_type() {
        let decoder = decoder();
        decoder.register::<OrderCreated>().unwrap();
        decoder.register::<OrderCreated>().unwrap();

        let err = decoder.register::<Impostor>().unwrap_err();
        assert!(matches!(
            err,
            Error::TagConflict { ref type_tag, registered, requested }
                if type_tag.as_str() == "OrderCreated"
                    && registered.ends_with("OrderCreated")
                    && requested.ends_with("Impostor")
        ));

        decoder.capture(classified(0, r#"{"id":9}"#)).unwrap();
        assert_eq!(consumed(&decoder), vec![9]);
    }

    #[test]
    fn parking_is_bounded() {
        let interceptor = Arc::new(Interceptor::new(Arc::new(EventLog::new()), "x-"));
        let decoder = Decoder::new(JsonCodec, interceptor, 2);
        for offset in 0..5 {
            assert!(decoder.capture(classified(offset, r#"{"id":1}"#)).unwrap().is_none());
        }
        assert_eq!(decoder.parked_count(), 2);

        decoder.register::<OrderCreated>().unwrap();
        assert_eq!(decoder.parked_count(), 0);
        assert_eq!(consumed(&decoder), vec![1, 1]);
    }

    #[test]
    fn discarding_parked_records_frees_room() {
        let interceptor = Arc::new(Interceptor::new(Arc::new(EventLog::new()), "x-"));
        let decoder = Decoder::new(JsonCodec, interceptor, 2);
        decoder.capture(classified(0, r#"{"id":1}"#)).unwrap();
        decoder.capture(classified(1, r#"{"id":2}"#)).unwrap();
        decoder.capture(classified(2, r#"{"id":3}"#)).unwrap();

        assert_eq!(decoder.discard_parked(), 2);
        assert_eq!(decoder.parked_count(), 0);
        assert_eq!(decoder.discard_parked(), 0);

        decoder.capture(classified(3, r#"{"id":4}"#)).unwrap();
        decoder.register::<OrderCreated>().unwrap();
        assert_eq!(consumed(&decoder), vec![4]);
    }
}
