mod bridge;
mod decoder;

pub(crate) use bridge::BridgeConsumer;
pub(crate) use decoder::{Classified, Decoder};
