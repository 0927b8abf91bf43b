//! ISO 11783 identifier codec.
//!
//! NMEA2000 folds its message-type identifier, the Parameter Group Number
//! (PGN), into the 29-bit extended CAN identifier together with the source
//! address, destination address, and priority. This module converts between
//! the packed identifier and those fields.

/// The addressing fields packed into a 29-bit extended CAN identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PgnInfo {
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    pub priority: u8,
}

/// Unpacks a 29-bit extended CAN identifier into its NMEA2000 fields.
///
/// A PDU format byte above 239 marks a PDU2 (broadcast) message: the PDU
/// specific byte is a group extension folded into the PGN and the destination
/// is the global address 0xFF. Otherwise (PDU1) the PDU specific byte is the
/// destination address and is excluded from the PGN.
///
/// # Example
///
/// ```rust
/// use cancodec::pgn::decode_iso11783;
///
/// let info = decode_iso11783(0x09FD0284);
/// assert_eq!(info.pgn, 130306);
/// assert_eq!(info.source, 0x84);
/// ```
pub fn decode_iso11783(can_id: u32) -> PgnInfo {
    let source = (can_id & 0xFF) as u8;
    let priority = ((can_id >> 26) & 0x7) as u8;

    // Data page bits, PDU format byte, PDU specific byte.
    let ms = (can_id >> 24) & 0x03;
    let pf = (can_id >> 16) & 0xFF;
    let ps = (can_id >> 8) & 0xFF;

    let (pgn, destination) = if pf > 239 {
        ((ms << 16) | (pf << 8) | ps, 0xFF)
    } else {
        ((ms << 16) | (pf << 8), ps as u8)
    };

    PgnInfo {
        pgn,
        source,
        destination,
        priority,
    }
}

/// Packs NMEA2000 addressing fields back into a 29-bit CAN identifier.
///
/// The reserved and data page bits are left zero per the protocol. A PGN with
/// a non-zero low byte is PDU2 form and carries no destination; for PDU1-form
/// PGNs the destination occupies the PDU specific byte.
pub fn encode_iso11783(pgn: u32, source: u8, destination: u8, priority: u8) -> u32 {
    let mut can_id = u32::from(source);
    can_id |= (u32::from(priority) & 0x7) << 26;

    if pgn & 0xFF != 0 {
        // PDU2
        can_id |= (pgn & 0x7FFFF) << 8;
    } else {
        // PDU1
        can_id |= ((pgn & 0x7FF00) | u32::from(destination)) << 8;
    }

    can_id
}

impl PgnInfo {
    /// Packs this set of fields into a 29-bit CAN identifier.
    pub fn to_can_id(&self) -> u32 {
        encode_iso11783(self.pgn, self.source, self.destination, self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pdu2() {
        // PF = 0xFD > 239, so the PS byte extends the PGN and the
        // destination is the global address.
        let info = decode_iso11783(0x09FD0284);
        assert_eq!(info.pgn, 0x1FD02);
        assert_eq!(info.source, 0x84);
        assert_eq!(info.destination, 0xFF);
        assert_eq!(info.priority, 2);
    }

    #[test]
    fn decode_pdu1() {
        // PF = 0xEA <= 239: PS is the destination and not part of the PGN.
        let info = decode_iso11783(0x18EA2301);
        assert_eq!(info.pgn, 0xEA00);
        assert_eq!(info.source, 0x01);
        assert_eq!(info.destination, 0x23);
        assert_eq!(info.priority, 6);
    }

    #[test]
    fn round_trip_pdu1() {
        for &dest in &[0x00u8, 0x23, 0xFE] {
            let id = encode_iso11783(0xEA00, 0x42, dest, 3);
            let info = decode_iso11783(id);
            assert_eq!(info.pgn, 0xEA00);
            assert_eq!(info.source, 0x42);
            assert_eq!(info.destination, dest);
            assert_eq!(info.priority, 3);
        }
    }

    #[test]
    fn round_trip_pdu2_forces_global_destination() {
        let id = encode_iso11783(0x1FD02, 0x84, 0x12, 2);
        let info = decode_iso11783(id);
        assert_eq!(info.pgn, 0x1FD02);
        assert_eq!(info.source, 0x84);
        // PDU2 messages are broadcast; the requested destination is not
        // representable and comes back as 0xFF.
        assert_eq!(info.destination, 0xFF);
        assert_eq!(info.priority, 2);
    }

    #[test]
    fn priority_is_masked_to_three_bits() {
        let id = encode_iso11783(0xEA00, 0, 0, 0xFF);
        assert_eq!(decode_iso11783(id).priority, 7);
    }

    #[test]
    fn standard_identifier_decodes_to_zero_pgn() {
        let info = decode_iso11783(0x123);
        assert_eq!(info.pgn, 0);
        assert_eq!(info.source, 0x23);
        assert_eq!(info.destination, 0x01);
    }
}
