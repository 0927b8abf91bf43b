//! Frame-to-message transcoding.
//!
//! [`Transcoder`] is the assembly layer: it matches an incoming
//! [`RawFrame`] against the registry, decodes every field of the matched
//! definition, and tracks per-message broadcast rates. The reverse path
//! packs a map of human field values into a payload and renders a transmit
//! line.
//!
//! The transcoder performs no I/O and never blocks; one instance is meant
//! to live on a decoder thread, with configuration changes arriving through
//! the shared [`RuntimeConfig`] handle.

use crate::field::FieldEncodeError;
use crate::frame::RawFrame;
use crate::freq::FrequencyEstimator;
use crate::meta::{
    FieldValue, MessageRegistry, RuntimeConfig, RuntimeFieldConfig, SharedRuntimeConfig,
    RAW_DATA_FIELD,
};
use crate::pgn::decode_iso11783;
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

/// One fully decoded message, handed to the caller and not retained.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMessage {
    pub id: u32,
    pub extended: bool,
    pub pgn: u32,
    /// Name of the matched definition, or a synthesized placeholder name
    /// for frames with no metadata.
    pub name: String,
    pub values: HashMap<String, FieldValue>,
    /// Estimated broadcast rate for this message name, in Hz.
    pub frequency: f64,
}

/// Errors from the transmit-encode path. Decode-side problems degrade
/// silently; these are surfaced because a malformed transmit frame would go
/// out on a live bus.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodeError {
    Field(FieldEncodeError),
    UnknownMessage(String),
    MissingFieldValue { message: String, field: String },
    /// The definition has neither an identifier nor a PGN to derive one
    /// from (an anonymous placeholder, for instance).
    NoTransmitId(String),
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            EncodeError::Field(e) => e.fmt(f),
            EncodeError::UnknownMessage(name) => {
                write!(f, "no definition for message '{}'", name)
            }
            EncodeError::MissingFieldValue { message, field } => {
                write!(f, "no value supplied for field '{}.{}'", message, field)
            }
            EncodeError::NoTransmitId(name) => {
                write!(f, "message '{}' has no identifier to transmit under", name)
            }
        }
    }
}

impl Error for EncodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EncodeError::Field(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FieldEncodeError> for EncodeError {
    fn from(e: FieldEncodeError) -> Self {
        EncodeError::Field(e)
    }
}

/// Decodes raw frames into structured messages and encodes the reverse.
pub struct Transcoder {
    registry: MessageRegistry,
    config: SharedRuntimeConfig,
    freq: FrequencyEstimator,
}

impl Transcoder {
    pub fn new(registry: MessageRegistry) -> Self {
        Transcoder::with_config(registry, Arc::new(RwLock::new(RuntimeConfig::new())))
    }

    /// Builds a transcoder sharing an externally owned runtime
    /// configuration.
    pub fn with_config(registry: MessageRegistry, config: SharedRuntimeConfig) -> Self {
        Transcoder {
            registry,
            config,
            freq: FrequencyEstimator::new(),
        }
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// A handle for mutating unit targets and value filters from another
    /// component while this transcoder keeps decoding.
    pub fn config_handle(&self) -> SharedRuntimeConfig {
        Arc::clone(&self.config)
    }

    /// Current broadcast-rate estimate for a message name.
    pub fn frequency(&mut self, name: &str) -> f64 {
        self.freq.rate(name)
    }

    /// Parses one serial line and decodes it. `None` means the line did not
    /// match the frame grammar and was dropped.
    pub fn decode_line(&mut self, line: &str) -> Option<DecodedMessage> {
        RawFrame::from_line(line).map(|frame| self.decode_frame(&frame))
    }

    /// Decodes a parsed frame into a structured message. Frames with no
    /// matching definition come back under a synthesized name carrying the
    /// raw payload, and a placeholder definition is registered so the name
    /// stays stable across repeats.
    pub fn decode_frame(&mut self, frame: &RawFrame) -> DecodedMessage {
        let pgn = decode_iso11783(frame.id).pgn;

        let name = match self.registry.match_frame(frame.id, pgn) {
            Some(def) => def.name.clone(),
            None => return self.decode_unknown(frame, pgn),
        };
        self.registry.note_live_id(&name, frame.id);

        let mut values = HashMap::new();
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        let default_cfg = RuntimeFieldConfig::default();
        if let Some(def) = self.registry.get(&name) {
            for field in def.fields.values() {
                let cfg = config.field(&name, &field.name).unwrap_or(&default_cfg);
                match field.decode(&frame.payload, cfg) {
                    Some(value) => {
                        values.insert(field.name.clone(), value);
                    }
                    None => warn!(
                        "skipping field '{}.{}': not readable from a {}-byte payload",
                        name,
                        field.name,
                        frame.payload.len()
                    ),
                }
            }
        }
        drop(config);

        let frequency = self.freq.record(&name);
        DecodedMessage {
            id: frame.id,
            extended: frame.extended,
            pgn,
            name,
            values,
            frequency,
        }
    }

    fn decode_unknown(&mut self, frame: &RawFrame, pgn: u32) -> DecodedMessage {
        let name = if frame.extended {
            format!("Extended message 0x{:X} (PGN: {})", frame.id, pgn)
        } else {
            format!("Standard message 0x{:X}", frame.id)
        };

        if self.registry.get(&name).is_none() {
            info!("no metadata for frame 0x{:X}, registering '{}'", frame.id, name);
        }
        self.registry.add_anonymous(&name, frame.extended);

        let mut values = HashMap::new();
        values.insert(
            RAW_DATA_FIELD.to_string(),
            FieldValue::Raw(frame.payload.clone()),
        );

        let frequency = self.freq.record(&name);
        DecodedMessage {
            id: frame.id,
            extended: frame.extended,
            pgn,
            name,
            values,
            frequency,
        }
    }

    /// Packs `values` (scaled, human units) into a payload per the named
    /// definition and renders the transmit line.
    ///
    /// NMEA2000 payloads are filled with 1-bits so unpopulated regions read
    /// back as "not available"; other protocols fill with 0-bits. The
    /// identifier is the one the message was last seen with on the bus, or
    /// the definition's own (possibly PGN-synthesized) identifier.
    pub fn encode_message(
        &self,
        name: &str,
        values: &HashMap<String, f64>,
    ) -> Result<String, EncodeError> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| EncodeError::UnknownMessage(name.to_string()))?;
        let id = self
            .registry
            .transmit_id(name)
            .ok_or_else(|| EncodeError::NoTransmitId(name.to_string()))?;

        let fill = if def.nmea2000 { 1u8 } else { 0u8 };
        let mut payload_bits = vec![fill; def.size * 8];

        for field in def.fields.values() {
            let value = *values
                .get(&field.name)
                .ok_or_else(|| EncodeError::MissingFieldValue {
                    message: name.to_string(),
                    field: field.name.clone(),
                })?;
            let bits = field.encode(value)?;
            payload_bits[field.bit_offset..field.bit_offset + field.bit_len]
                .copy_from_slice(&bits);
        }

        let payload: Vec<u8> = payload_bits
            .chunks(8)
            .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b))
            .collect();

        let frame = RawFrame {
            id,
            extended: def.extended,
            dlc: def.size,
            payload,
        };
        Ok(frame.to_transmit_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FieldDefinition, FieldKind, MessageDefinition, ValueFilter};
    use approx::assert_relative_eq;

    fn wind_registry() -> MessageRegistry {
        let mut registry = MessageRegistry::new();
        registry
            .add(
                MessageDefinition::new("Wind Data", None, Some(130306), 8, true, true, true)
                    .with_field(FieldDefinition::new(
                        "Wind Speed",
                        FieldKind::Integer { signed: false },
                        16,
                        0,
                        "m/s",
                        0.01,
                        true,
                    ))
                    .with_field(FieldDefinition::new(
                        "Wind Direction",
                        FieldKind::Integer { signed: false },
                        16,
                        48,
                        "RAD",
                        0.0001,
                        true,
                    )),
            )
            .unwrap();
        registry
    }

    fn number(msg: &DecodedMessage, field: &str) -> f64 {
        match msg.values.get(field) {
            Some(FieldValue::Number(v)) => *v,
            other => panic!("field '{}' was {:?}", field, other),
        }
    }

    #[test]
    fn decode_known_extended_frame() {
        let mut transcoder = Transcoder::new(wind_registry());
        let msg = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();

        assert_eq!(msg.name, "Wind Data");
        assert_eq!(msg.id, 0x09FD0284);
        assert_eq!(msg.pgn, 130306);
        assert!(msg.extended);
        // Bytes D4 10 at offset 0 read little-endian: 0x10D4 * 0.01.
        assert_relative_eq!(number(&msg, "Wind Speed"), 43.08);
        // Trailing FFFF is the "not available" code.
        assert_eq!(
            msg.values.get("Wind Direction"),
            Some(&FieldValue::NotAvailable)
        );
        assert!(msg.frequency > 0.0);
    }

    #[test]
    fn decode_is_deterministic() {
        let mut transcoder = Transcoder::new(wind_registry());
        let first = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        let second = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn malformed_line_is_dropped() {
        let mut transcoder = Transcoder::new(wind_registry());
        assert!(transcoder.decode_line("not a frame").is_none());
    }

    #[test]
    fn unknown_extended_frame_synthesizes_name_and_registers() {
        let mut transcoder = Transcoder::new(MessageRegistry::new());
        let msg = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();

        assert_eq!(msg.name, "Extended message 0x9FD0284 (PGN: 130306)");
        assert_eq!(
            msg.values.get(RAW_DATA_FIELD),
            Some(&FieldValue::Raw(vec![
                0xD4, 0x10, 0x00, 0x28, 0x41, 0xFA, 0xFF, 0xFF
            ]))
        );
        assert!(transcoder.registry().get(&msg.name).unwrap().anonymous);

        // Repeats reuse the placeholder definition.
        let again = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        assert_eq!(again.name, msg.name);
        assert_eq!(transcoder.registry().len(), 1);
    }

    #[test]
    fn unknown_standard_frame_name_has_no_pgn() {
        let mut transcoder = Transcoder::new(MessageRegistry::new());
        let msg = transcoder.decode_line("t10025566\r").unwrap();
        assert_eq!(msg.name, "Standard message 0x100");
    }

    #[test]
    fn short_frame_skips_unreadable_fields() {
        let mut transcoder = Transcoder::new(wind_registry());
        // DLC 2: only the first field fits.
        let msg = transcoder.decode_line("T09FD02842D410\r").unwrap();
        assert_relative_eq!(number(&msg, "Wind Speed"), 43.08);
        assert!(!msg.values.contains_key("Wind Direction"));
    }

    #[test]
    fn runtime_filter_applies_mid_stream() {
        let mut transcoder = Transcoder::new(wind_registry());
        let config = transcoder.config_handle();

        let msg = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        assert_relative_eq!(number(&msg, "Wind Speed"), 43.08);

        config.write().unwrap().set_filter(
            "Wind Data",
            "Wind Speed",
            ValueFilter {
                active: true,
                equals: vec![],
                less_than: Some(10.0),
                greater_than: None,
            },
        );
        let msg = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        assert_eq!(msg.values.get("Wind Speed"), Some(&FieldValue::Filtered));
    }

    #[test]
    fn runtime_unit_target_applies_mid_stream() {
        let mut transcoder = Transcoder::new(wind_registry());
        let config = transcoder.config_handle();
        config.write().unwrap().set_unit_target(
            "Wind Data",
            "Wind Speed",
            Some("KNOT".to_string()),
        );

        let msg = transcoder
            .decode_line("T09FD02848D410002841FAFFFF\r")
            .unwrap();
        assert_relative_eq!(number(&msg, "Wind Speed"), 43.08 * 1.944, epsilon = 1e-9);
    }

    #[test]
    fn encode_uses_synthesized_id_until_node_is_heard() {
        let mut values = HashMap::new();
        values.insert("Wind Speed".to_string(), 10.0);
        values.insert("Wind Direction".to_string(), 1.5);

        let mut transcoder = Transcoder::new(wind_registry());
        let line = transcoder.encode_message("Wind Data", &values).unwrap();
        // PGN 130306 with source 0, destination 0, priority 7.
        assert!(line.starts_with("T1DFD02008"), "line was {:?}", line);

        // Once the message has been seen live, its on-bus identifier wins.
        transcoder.decode_line("T09FD02848D410002841FAFFFF\r");
        let line = transcoder.encode_message("Wind Data", &values).unwrap();
        assert!(line.starts_with("T09FD02848"), "line was {:?}", line);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut registry = MessageRegistry::new();
        registry
            .add(
                MessageDefinition::new("Rudder", None, Some(127245), 8, true, true, true)
                    .with_field(FieldDefinition::new(
                        "Angle",
                        FieldKind::Integer { signed: true },
                        16,
                        16,
                        "RAD",
                        0.25,
                        true,
                    )),
            )
            .unwrap();
        let mut transcoder = Transcoder::new(registry);

        let mut values = HashMap::new();
        values.insert("Angle".to_string(), -4.5);
        let line = transcoder.encode_message("Rudder", &values).unwrap();

        let msg = transcoder.decode_line(&line).unwrap();
        assert_eq!(msg.name, "Rudder");
        assert_relative_eq!(number(&msg, "Angle"), -4.5);
    }

    #[test]
    fn encode_fills_nmea2000_payloads_with_ones() {
        let mut values = HashMap::new();
        values.insert("Wind Speed".to_string(), 10.0);
        values.insert("Wind Direction".to_string(), 0.0);

        let transcoder = Transcoder::new(wind_registry());
        let line = transcoder.encode_message("Wind Data", &values).unwrap();
        // 10.0 / 0.01 = 1000 = 0x03E8, little-endian at offset 0; direction
        // zero at offset 48; everything in between stays 0xFF.
        assert_eq!(line, "T1DFD02008E803FFFFFFFF0000\r");
    }

    #[test]
    fn encode_fills_other_protocols_with_zeros() {
        let mut registry = MessageRegistry::new();
        registry
            .add(
                MessageDefinition::new("Status", Some(0x123), None, 2, false, true, false)
                    .with_field(FieldDefinition::new(
                        "Code",
                        FieldKind::Integer { signed: false },
                        8,
                        0,
                        "",
                        1.0,
                        true,
                    )),
            )
            .unwrap();
        let transcoder = Transcoder::new(registry);

        let mut values = HashMap::new();
        values.insert("Code".to_string(), 0x42 as f64);
        assert_eq!(
            transcoder.encode_message("Status", &values).unwrap(),
            "t12324200\r"
        );
    }

    #[test]
    fn encode_unknown_message() {
        let transcoder = Transcoder::new(MessageRegistry::new());
        assert_eq!(
            transcoder.encode_message("Nope", &HashMap::new()),
            Err(EncodeError::UnknownMessage("Nope".to_string()))
        );
    }

    #[test]
    fn encode_missing_field_value() {
        let transcoder = Transcoder::new(wind_registry());
        let mut values = HashMap::new();
        values.insert("Wind Speed".to_string(), 10.0);
        assert_eq!(
            transcoder.encode_message("Wind Data", &values),
            Err(EncodeError::MissingFieldValue {
                message: "Wind Data".to_string(),
                field: "Wind Direction".to_string(),
            })
        );
    }

    #[test]
    fn encode_overflow_names_the_field() {
        let transcoder = Transcoder::new(wind_registry());
        let mut values = HashMap::new();
        values.insert("Wind Speed".to_string(), 1e6);
        values.insert("Wind Direction".to_string(), 0.0);
        match transcoder.encode_message("Wind Data", &values) {
            Err(EncodeError::Field(FieldEncodeError::Overflow { field, .. })) => {
                assert_eq!(field, "Wind Speed")
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }
}
