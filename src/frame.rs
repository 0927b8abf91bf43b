//! Raw CAN frames and the Lawicel ASCII wire grammar.
//!
//! A USB-CAN adapter in ASCII mode emits one carriage-return-terminated line
//! per frame: `t` + 3 hex identifier digits for standard 11-bit frames or
//! `T` + 8 hex digits for extended 29-bit frames, one DLC digit, two hex
//! digits per payload byte, and an optional 4-digit timestamp which this
//! codec discards.

use crate::pgn::decode_iso11783;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::fmt;
use std::fmt::{Display, Formatter};

lazy_static! {
    static ref FRAME_RE: Regex = Regex::new(
        r"^\s*(?:t([0-9a-fA-F]{3})|T([0-9a-fA-F]{8}))([0-8])((?:[0-9a-fA-F]{2}){0,8})([0-9a-fA-F]{4})?"
    )
    .expect("frame grammar regex");
}

/// One frame as received from (or destined for) the serial adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawFrame {
    pub id: u32,
    pub extended: bool,
    /// Declared payload byte count, 0 to 8.
    pub dlc: usize,
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Parses one serial line. Returns `None` for anything that does not
    /// match the grammar, including frames whose DLC claims more bytes than
    /// the line carries; such lines are dropped by the caller.
    ///
    /// The payload capture is greedy and can swallow a trailing timestamp,
    /// so it is trimmed back to exactly `2 * DLC` characters.
    pub fn from_line(line: &str) -> Option<RawFrame> {
        let caps = match FRAME_RE.captures(line) {
            Some(caps) => caps,
            None => {
                debug!("dropping malformed frame line: {:?}", line);
                return None;
            }
        };

        let (id_hex, extended) = match (caps.get(1), caps.get(2)) {
            (Some(m), _) => (m.as_str(), false),
            (_, Some(m)) => (m.as_str(), true),
            _ => return None,
        };
        let id = u32::from_str_radix(id_hex, 16).ok()?;
        let dlc: usize = caps.get(3)?.as_str().parse().ok()?;

        let payload_hex = caps.get(4).map_or("", |m| m.as_str());
        if payload_hex.len() < 2 * dlc {
            debug!(
                "dropping frame 0x{:X}: DLC {} but only {} payload digits",
                id,
                dlc,
                payload_hex.len()
            );
            return None;
        }
        let payload_hex = &payload_hex[..2 * dlc];

        let mut payload = Vec::with_capacity(dlc);
        for i in 0..dlc {
            payload.push(u8::from_str_radix(&payload_hex[2 * i..2 * i + 2], 16).ok()?);
        }

        Some(RawFrame {
            id,
            extended,
            dlc,
            payload,
        })
    }

    /// Renders this frame as a transmit line for the adapter, payload
    /// zero-padded to two hex digits per byte.
    pub fn to_transmit_string(&self) -> String {
        let mut body = String::with_capacity(2 * self.payload.len());
        for byte in &self.payload {
            body.push_str(&format!("{:02X}", byte));
        }
        if self.extended {
            format!("T{:08X}{:1}{}\r", self.id, self.dlc, body)
        } else {
            format!("t{:03X}{:1}{}\r", self.id, self.dlc, body)
        }
    }
}

impl Display for RawFrame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let pgn = decode_iso11783(self.id).pgn;
        let hex: Vec<String> = self.payload.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "Head: 0x{:X}", self.id)?;
        if pgn > 0 {
            write!(f, " (PGN: {})", pgn)?;
        }
        write!(f, ", Body: 0x[{}]", hex.join(","))
    }
}
