//! A CAN frame codec for marine and vehicle telemetry streams.
//!
//! `cancodec` turns the ASCII frame lines emitted by a USB-CAN adapter into
//! structured messages and back. Frames are matched against a registry of
//! message definitions, either by exact identifier or by the PGN decoded
//! from an ISO 11783 (NMEA2000) 29-bit identifier, and each field is
//! extracted, scaled, unit-converted, and filtered according to runtime
//! settings that can change while the stream is live.
//!
//! ```rust
//! use cancodec::meta::{FieldDefinition, FieldKind, MessageDefinition, MessageRegistry};
//! use cancodec::transcode::Transcoder;
//!
//! let mut registry = MessageRegistry::new();
//! registry
//!     .add(
//!         MessageDefinition::new("Wind Data", None, Some(130306), 8, true, true, true)
//!             .with_field(FieldDefinition::new(
//!                 "Wind Speed",
//!                 FieldKind::Integer { signed: false },
//!                 16,
//!                 0,
//!                 "m/s",
//!                 0.01,
//!                 true,
//!             )),
//!     )
//!     .unwrap();
//!
//! let mut transcoder = Transcoder::new(registry);
//! let msg = transcoder.decode_line("T09FD02848D410002841FAFFFF\r").unwrap();
//! assert_eq!(msg.name, "Wind Data");
//! assert_eq!(msg.pgn, 130306);
//! ```

pub mod field;
pub mod frame;
pub mod freq;
pub mod meta;
pub mod pgn;
pub mod transcode;
pub mod units;

pub use crate::field::{extract_field_bytes, FieldEncodeError};
pub use crate::frame::RawFrame;
pub use crate::freq::FrequencyEstimator;
pub use crate::meta::{
    FieldDefinition, FieldKind, FieldValue, MessageDefinition, MessageRegistry, RegistryError,
    RuntimeConfig, RuntimeFieldConfig, SharedRuntimeConfig, ValueFilter,
};
pub use crate::pgn::{decode_iso11783, encode_iso11783, PgnInfo};
pub use crate::transcode::{DecodedMessage, EncodeError, Transcoder};
