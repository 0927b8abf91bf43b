//! Message and field metadata.
//!
//! Definitions are loaded once from external metadata and treated as
//! read-only by the codec. The two things a user may change while a stream
//! is live, the display unit and the value filter of a field, live in a
//! separate [`RuntimeConfig`] that is shared between the decoding side and
//! whatever component mutates it.

use crate::pgn::encode_iso11783;
use crate::units;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

/// Field name used for the payload of messages with no metadata.
pub const RAW_DATA_FIELD: &str = "Raw Data";

/// How a field's bits are interpreted.
///
/// `Boolean` and `Enum` decode through the integer path; `Enum` values are
/// reported as their raw integer until a value-to-label mapping exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Integer { signed: bool },
    Bitfield,
    Boolean,
    Enum,
}

impl FieldKind {
    pub(crate) fn is_signed(self) -> bool {
        match self {
            FieldKind::Integer { signed } => signed,
            _ => false,
        }
    }
}

/// A decoded field value.
///
/// `Display` produces the user-facing surface: numbers print plainly,
/// bitfields as an `0b`-prefixed bit string, unavailable data as `NaN`, and
/// filtered-out values as the empty string.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Bitfield(String),
    /// The NMEA2000 "data not available" code 0xFFFF was read.
    NotAvailable,
    /// An active value filter rejected the value.
    Filtered,
    /// Undecoded payload bytes of a message with no metadata.
    Raw(Vec<u8>),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{}", v),
            FieldValue::Bitfield(bits) => write!(f, "{}", bits),
            FieldValue::NotAvailable => write!(f, "NaN"),
            FieldValue::Filtered => Ok(()),
            FieldValue::Raw(bytes) => {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                write!(f, "0x[{}]", hex.join(","))
            }
        }
    }
}

/// A keep-if predicate applied to decoded values.
///
/// Each criterion is independently optional so that zero is an ordinary
/// threshold; `active` alone decides whether the filter applies at all. With
/// several criteria set, passing any one of them keeps the value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueFilter {
    pub active: bool,
    pub equals: Vec<f64>,
    pub less_than: Option<f64>,
    pub greater_than: Option<f64>,
}

impl ValueFilter {
    /// Returns true if `value` should be kept.
    pub fn accepts(&self, value: f64) -> bool {
        if !self.active {
            return true;
        }
        if self.equals.iter().any(|&e| value == e) {
            return true;
        }
        if let Some(lt) = self.less_than {
            if value < lt {
                return true;
            }
        }
        if let Some(gt) = self.greater_than {
            if value > gt {
                return true;
            }
        }
        false
    }
}

/// The runtime-mutable settings of a single field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeFieldConfig {
    /// Target unit for display, if the user changed it from the base unit.
    pub unit_target: Option<String>,
    pub filter: ValueFilter,
}

/// Per-field runtime settings for all messages, keyed message name then
/// field name. Owned by the mutating side (typically a UI), read by the
/// decoder through a [`SharedRuntimeConfig`] handle.
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    fields: HashMap<String, HashMap<String, RuntimeFieldConfig>>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig::default()
    }

    pub fn field(&self, message: &str, field: &str) -> Option<&RuntimeFieldConfig> {
        self.fields.get(message).and_then(|m| m.get(field))
    }

    pub fn field_mut(&mut self, message: &str, field: &str) -> &mut RuntimeFieldConfig {
        self.fields
            .entry(message.to_string())
            .or_insert_with(HashMap::new)
            .entry(field.to_string())
            .or_insert_with(RuntimeFieldConfig::default)
    }

    pub fn set_unit_target(&mut self, message: &str, field: &str, target: Option<String>) {
        self.field_mut(message, field).unit_target = target;
    }

    pub fn set_filter(&mut self, message: &str, field: &str, filter: ValueFilter) {
        self.field_mut(message, field).filter = filter;
    }
}

/// Shared handle to the runtime configuration.
pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

/// An immutable field description from the metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub bit_len: usize,
    /// Bit offset from the start of the payload, least-significant bit of
    /// each byte first (the byte-reversed bit string convention).
    pub bit_offset: usize,
    /// Canonical base unit code, or empty when the field is unitless.
    pub units: String,
    pub scaling: f64,
    pub little_endian: bool,
    bounds: (f64, f64),
}

/// Round `num` down to the nearest multiple of `divisor`.
fn round_down(num: f64, divisor: f64) -> f64 {
    num - (num % divisor)
}

impl FieldDefinition {
    /// Builds a field description and precomputes its value bounds.
    ///
    /// `units` is canonicalized (`m/s` becomes `MPS`, everything else is
    /// uppercased). Boolean fields may pass a zero `bit_len` and default to
    /// one bit.
    pub fn new(
        name: &str,
        kind: FieldKind,
        bit_len: usize,
        bit_offset: usize,
        units: &str,
        scaling: f64,
        little_endian: bool,
    ) -> Self {
        let bit_len = if kind == FieldKind::Boolean && bit_len == 0 {
            1
        } else {
            bit_len
        };

        let bounds = Self::compute_bounds(kind, bit_len, scaling);

        FieldDefinition {
            name: name.to_string(),
            kind,
            bit_len,
            bit_offset,
            units: units::canonical_unit(units),
            scaling,
            little_endian,
            bounds,
        }
    }

    fn compute_bounds(kind: FieldKind, bit_len: usize, scaling: f64) -> (f64, f64) {
        if bit_len == 0 {
            return (0.0, 0.0);
        }
        if kind.is_signed() {
            let bound = (1u128 << (bit_len - 1)) as f64;
            (
                round_down(-bound * scaling, scaling),
                round_down((bound - 1.0) * scaling, scaling),
            )
        } else {
            let max = if bit_len >= 64 {
                u64::max_value() as f64
            } else {
                ((1u64 << bit_len) - 1) as f64
            };
            (0.0, round_down(max * scaling, scaling))
        }
    }

    /// The legal `[lower, upper]` value range in scaled (human) units.
    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }
}

/// An immutable message description from the metadata.
///
/// Exactly one of `id` and `pgn` is set for definitions that match incoming
/// frames; PGN-only definitions synthesize an identifier for transmission.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageDefinition {
    pub name: String,
    pub id: Option<u32>,
    pub pgn: Option<u32>,
    /// Payload length in bytes.
    pub size: usize,
    pub extended: bool,
    /// Default endianness for the message's fields.
    pub little_endian: bool,
    /// NMEA2000 payloads are filled with 1-bits before encoding; other
    /// protocols fill with 0-bits.
    pub nmea2000: bool,
    pub anonymous: bool,
    pub fields: HashMap<String, FieldDefinition>,
}

impl MessageDefinition {
    pub fn new(
        name: &str,
        id: Option<u32>,
        pgn: Option<u32>,
        size: usize,
        extended: bool,
        little_endian: bool,
        nmea2000: bool,
    ) -> Self {
        MessageDefinition {
            name: name.to_string(),
            id,
            pgn,
            size,
            // A PGN implies the 29-bit identifier format.
            extended: extended || pgn.is_some(),
            little_endian,
            nmea2000,
            anonymous: false,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// The identifier to transmit this message under: the configured one,
    /// or for PGN-only definitions one synthesized with source 0,
    /// destination 0, priority 7.
    pub fn transmit_id(&self) -> Option<u32> {
        self.id
            .or_else(|| self.pgn.map(|pgn| encode_iso11783(pgn, 0, 0, 7)))
    }
}

/// Error returned when a definition cannot be added to a registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// A definition may set an identifier or a PGN, not both.
    BothIdAndPgn(String),
    /// A definition must describe at least one field.
    NoFields(String),
    DuplicateName(String),
    /// Two definitions matching the same identifier would make frame lookup
    /// order-dependent, so the second one is rejected.
    DuplicateId(u32),
    DuplicatePgn(u32),
    /// A field extends past the end of the declared payload.
    FieldOverrun { message: String, field: String },
    /// A CAN payload is at most eight bytes.
    OversizedPayload { message: String, size: usize },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            RegistryError::BothIdAndPgn(name) => write!(
                f,
                "both identifier and PGN specified for message '{}', only one may be set",
                name
            ),
            RegistryError::NoFields(name) => {
                write!(f, "no fields found for message '{}'", name)
            }
            RegistryError::DuplicateName(name) => {
                write!(f, "a message named '{}' is already registered", name)
            }
            RegistryError::DuplicateId(id) => {
                write!(f, "identifier 0x{:X} is already registered", id)
            }
            RegistryError::DuplicatePgn(pgn) => {
                write!(f, "PGN {} is already registered", pgn)
            }
            RegistryError::FieldOverrun { message, field } => write!(
                f,
                "field '{}.{}' extends past the end of the payload",
                message, field
            ),
            RegistryError::OversizedPayload { message, size } => write!(
                f,
                "message '{}' declares a {}-byte payload, the maximum is 8",
                message, size
            ),
        }
    }
}

impl Error for RegistryError {}

/// The set of known message definitions, with identifier and PGN indexes
/// for frame matching.
#[derive(Clone, Debug, Default)]
pub struct MessageRegistry {
    messages: HashMap<String, MessageDefinition>,
    id_to_name: HashMap<u32, String>,
    pgn_to_name: HashMap<u32, String>,
    /// Last identifier each message was actually seen with on the bus.
    /// Preferred over the synthesized identifier when transmitting.
    live_ids: HashMap<String, u32>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry::default()
    }

    /// Adds a definition, enforcing the metadata invariants: at least one
    /// field, at most one of identifier/PGN, unique name and lookup keys,
    /// and fields that fit the declared payload size.
    pub fn add(&mut self, def: MessageDefinition) -> Result<(), RegistryError> {
        if def.id.is_some() && def.pgn.is_some() {
            return Err(RegistryError::BothIdAndPgn(def.name.clone()));
        }
        if def.fields.is_empty() {
            return Err(RegistryError::NoFields(def.name.clone()));
        }
        if self.messages.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name.clone()));
        }
        if let Some(id) = def.id {
            if self.id_to_name.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
        }
        if let Some(pgn) = def.pgn {
            if self.pgn_to_name.contains_key(&pgn) {
                return Err(RegistryError::DuplicatePgn(pgn));
            }
        }
        if def.size > 8 {
            return Err(RegistryError::OversizedPayload {
                message: def.name.clone(),
                size: def.size,
            });
        }
        for field in def.fields.values() {
            if field.bit_offset + field.bit_len > def.size * 8 {
                return Err(RegistryError::FieldOverrun {
                    message: def.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        if let Some(id) = def.id {
            self.id_to_name.insert(id, def.name.clone());
        }
        if let Some(pgn) = def.pgn {
            self.pgn_to_name.insert(pgn, def.name.clone());
        }
        self.messages.insert(def.name.clone(), def);
        Ok(())
    }

    /// Registers a placeholder definition for a message with no metadata,
    /// so later frames with the same synthesized name reuse it.
    pub fn add_anonymous(&mut self, name: &str, extended: bool) {
        if self.messages.contains_key(name) {
            return;
        }
        let mut def = MessageDefinition::new(name, None, None, 0, extended, true, false);
        def.anonymous = true;
        def.fields.insert(
            RAW_DATA_FIELD.to_string(),
            FieldDefinition::new(
                RAW_DATA_FIELD,
                FieldKind::Integer { signed: false },
                0,
                0,
                "",
                1.0,
                true,
            ),
        );
        self.messages.insert(name.to_string(), def);
    }

    pub fn get(&self, name: &str) -> Option<&MessageDefinition> {
        self.messages.get(name)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(|k| k.as_str())
    }

    /// Finds the definition matching a frame, by exact identifier first and
    /// decoded PGN second. Both lookups are indexed, so matching does not
    /// depend on registration order.
    pub fn match_frame(&self, id: u32, pgn: u32) -> Option<&MessageDefinition> {
        self.id_to_name
            .get(&id)
            .or_else(|| self.pgn_to_name.get(&pgn))
            .and_then(|name| self.messages.get(name))
    }

    /// Records the identifier a message was last seen with on the bus.
    pub fn note_live_id(&mut self, name: &str, id: u32) {
        self.live_ids.insert(name.to_string(), id);
    }

    /// The identifier to use when transmitting `name`: the live on-bus one
    /// if the node has been heard from, otherwise the definition's own.
    pub fn transmit_id(&self, name: &str) -> Option<u32> {
        self.live_ids
            .get(name)
            .copied()
            .or_else(|| self.messages.get(name).and_then(|d| d.transmit_id()))
    }
}
