//! Shared record model and wire encoding for the Sortie telemetry pipeline.
//!
//! The agent emits [`models::PlayerData`] records, encodes them through the
//! [`codec::CodecRegistry`], and ships them inside [`wire`] envelopes. The
//! data service decodes with the same registry, keyed on the envelope's
//! record-type tag, so new record kinds only need a codec registration on
//! both ends.

pub mod codec;
pub mod models;
pub mod wire;

pub use codec::{CodecError, CodecRegistry, RecordCodec, SyncRecord};
pub use models::PlayerData;
pub use wire::{RecordEnvelope, RecordStatus, SyncRequest, SyncResponse};
