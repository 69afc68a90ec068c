//! Mailbox frame header and protocol identifiers
//!
//! Every mailbox frame starts with a 6-byte header: payload length, station
//! address, and a flags word carrying the protocol-type nibble and the
//! datagram counter nibble. The header is read and written at fixed byte
//! offsets.

use crate::constants::mailbox_errors;

/// Size of the mailbox frame header in bytes
pub const MAILBOX_HEADER_SIZE: usize = 6;

/// Protocols which may be carried in a mailbox frame, from the type nibble
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MailboxProtocol {
    /// Mailbox error reply
    Error = 0,
    /// Vendor ADS-over-fieldbus
    Aoe = 1,
    /// Ethernet tunneling
    Eoe = 2,
    /// CANopen application protocol
    Coe = 3,
    /// File access
    Foe = 4,
    /// Servo-drive profile
    Soe = 5,
    /// Vendor specific
    Voe = 15,
}

impl TryFrom<u8> for MailboxProtocol {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use MailboxProtocol::*;
        match value {
            x if x == Error as u8 => Ok(Error),
            x if x == Aoe as u8 => Ok(Aoe),
            x if x == Eoe as u8 => Ok(Eoe),
            x if x == Coe as u8 => Ok(Coe),
            x if x == Foe as u8 => Ok(Foe),
            x if x == Soe as u8 => Ok(Soe),
            x if x == Voe as u8 => Ok(Voe),
            other => Err(other),
        }
    }
}

/// Errors from [`MailboxHeader::parse`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MailboxFrameError {
    /// Frame is shorter than the mailbox header
    TooShort,
    /// The header length field exceeds the bytes actually present
    LengthMismatch,
}

impl MailboxFrameError {
    /// The matching mailbox error detail code
    pub fn detail(&self) -> u16 {
        match self {
            MailboxFrameError::TooShort => mailbox_errors::SIZE_TOO_SHORT,
            MailboxFrameError::LengthMismatch => mailbox_errors::SYNTAX,
        }
    }
}

/// The 6-byte mailbox frame header
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MailboxHeader {
    /// Number of payload bytes following the header
    pub length: u16,
    /// Station address field
    pub address: u16,
    /// Protocol type nibble, not yet validated
    pub protocol: u8,
    /// Datagram counter nibble; 0 means the master does not sequence
    pub counter: u8,
}

impl MailboxHeader {
    /// Parse a header from the start of `frame` and return it with the
    /// payload slice it describes
    pub fn parse(frame: &[u8]) -> Result<(Self, &[u8]), MailboxFrameError> {
        if frame.len() < MAILBOX_HEADER_SIZE {
            return Err(MailboxFrameError::TooShort);
        }
        let length = u16::from_le_bytes([frame[0], frame[1]]);
        let address = u16::from_le_bytes([frame[2], frame[3]]);
        let flags = u16::from_le_bytes([frame[4], frame[5]]);
        let header = Self {
            length,
            address,
            protocol: ((flags >> 8) & 0x0F) as u8,
            counter: ((flags >> 12) & 0x0F) as u8,
        };
        let end = MAILBOX_HEADER_SIZE + length as usize;
        if frame.len() < end {
            return Err(MailboxFrameError::LengthMismatch);
        }
        Ok((header, &frame[MAILBOX_HEADER_SIZE..end]))
    }

    /// Write the header to the first 6 bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.address.to_le_bytes());
        let flags =
            (((self.counter & 0x0F) as u16) << 12) | (((self.protocol & 0x0F) as u16) << 8);
        buf[4..6].copy_from_slice(&flags.to_le_bytes());
    }

    /// Protocol nibble as a typed value
    pub fn protocol_type(&self) -> Result<MailboxProtocol, u8> {
        MailboxProtocol::try_from(self.protocol)
    }
}

/// Payload of a mailbox error reply (protocol type 0)
///
/// Two little-endian words: the fixed service command 0x01 and a detail code
/// from [`mailbox_errors`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MailboxErrorReply {
    /// Detail code describing what was wrong with the request
    pub detail: u16,
}

impl MailboxErrorReply {
    /// Service command word of an error reply
    pub const COMMAND: u16 = 0x0001;

    /// Encode the 4-byte payload
    pub fn to_bytes(&self) -> [u8; 4] {
        let cmd = Self::COMMAND.to_le_bytes();
        let detail = self.detail.to_le_bytes();
        [cmd[0], cmd[1], detail[0], detail[1]]
    }

    /// Decode from a payload slice
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        if u16::from_le_bytes([payload[0], payload[1]]) != Self::COMMAND {
            return None;
        }
        Some(Self {
            detail: u16::from_le_bytes([payload[2], payload[3]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = MailboxHeader {
            length: 10,
            address: 0x1001,
            protocol: MailboxProtocol::Coe as u8,
            counter: 5,
        };
        let mut buf = [0u8; 16];
        header.write(&mut buf);
        let (parsed, payload) = MailboxHeader::parse(&buf).unwrap();
        assert_eq!(header, parsed);
        assert_eq!(10, payload.len());
        assert_eq!(Ok(MailboxProtocol::Coe), parsed.protocol_type());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let header = MailboxHeader {
            length: 64,
            address: 0,
            protocol: 3,
            counter: 0,
        };
        let mut buf = [0u8; 16];
        header.write(&mut buf);
        assert_eq!(
            Err(MailboxFrameError::LengthMismatch),
            MailboxHeader::parse(&buf).map(|(h, _)| h)
        );
        assert_eq!(
            Err(MailboxFrameError::TooShort),
            MailboxHeader::parse(&buf[..3]).map(|(h, _)| h)
        );
    }

    #[test]
    fn test_error_reply() {
        let reply = MailboxErrorReply { detail: 0x0002 };
        let bytes = reply.to_bytes();
        assert_eq!([0x01, 0x00, 0x02, 0x00], bytes);
        assert_eq!(Some(reply), MailboxErrorReply::parse(&bytes));
    }
}
