//! CoE wire coding: service header, SDO transfer frames, abort codes
//!
//! All frames are coded at fixed byte offsets, little-endian. A CoE payload
//! is the mailbox payload: 2-byte CoE header followed by the service data.
//! SDO initiate frames carry a 4-byte header (command, flags, index, sub);
//! segment frames carry a single header byte followed by data.

/// Size of the CoE service header in bytes
pub const COE_HEADER_SIZE: usize = 2;
/// Size of the SDO initiate header in bytes
pub const SDO_HEADER_SIZE: usize = 4;
/// Size of the SDO segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 1;
/// Nominal segment data size; shorter final segments encode the difference
/// in the seg-data-size field
pub const MIN_SEGMENT_DATA: usize = 7;

/// CoE service types, carried in the high nibble of the CoE header
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CoeService {
    /// Emergency message
    Emergency = 1,
    /// SDO request (master to slave)
    SdoRequest = 2,
    /// SDO response (slave to master)
    SdoResponse = 3,
    /// Object dictionary introspection, both directions
    SdoInfo = 8,
}

impl TryFrom<u8> for CoeService {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use CoeService::*;
        match value {
            x if x == Emergency as u8 => Ok(Emergency),
            x if x == SdoRequest as u8 => Ok(SdoRequest),
            x if x == SdoResponse as u8 => Ok(SdoResponse),
            x if x == SdoInfo as u8 => Ok(SdoInfo),
            other => Err(other),
        }
    }
}

/// The 2-byte CoE header
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CoeHeader {
    /// PDO number for PDO services, 0 otherwise
    pub number: u16,
    /// Service type nibble, not yet validated
    pub service: u8,
}

impl CoeHeader {
    /// Build a header for `service` with number 0
    pub fn new(service: CoeService) -> Self {
        Self {
            number: 0,
            service: service as u8,
        }
    }

    /// Parse from the start of a mailbox payload, returning the service data
    pub fn parse(payload: &[u8]) -> Option<(Self, &[u8])> {
        if payload.len() < COE_HEADER_SIZE {
            return None;
        }
        let word = u16::from_le_bytes([payload[0], payload[1]]);
        let header = Self {
            number: word & 0x01FF,
            service: ((word >> 12) & 0x0F) as u8,
        };
        Some((header, &payload[COE_HEADER_SIZE..]))
    }

    /// Write to the first two bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        let word = (self.number & 0x01FF) | (((self.service & 0x0F) as u16) << 12);
        buf[0..2].copy_from_slice(&word.to_le_bytes());
    }

    /// Service nibble as a typed value
    pub fn service_type(&self) -> Result<CoeService, u8> {
        CoeService::try_from(self.service)
    }
}

/// SDO abort codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit did not alternate
    ToggleNotAlternated = 0x0503_0000,
    /// Protocol timed out waiting for a segment
    SdoTimeout = 0x0504_0000,
    /// Command specifier not valid or unknown
    InvalidCommandSpecifier = 0x0504_0001,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempted to read a write-only object
    WriteOnly = 0x0601_0001,
    /// Attempted to write a read-only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the dictionary
    NoSuchObject = 0x0602_0000,
    /// Object cannot be mapped into a PDO
    NotMappable = 0x0604_0041,
    /// The mapped objects exceed the PDO length
    PdoLengthExceeded = 0x0604_0042,
    /// General parameter incompatibility
    IncompatibleParameter = 0x0604_0043,
    /// Access failed due to a hardware error
    HardwareError = 0x0606_0000,
    /// Data type mismatch, length of service parameter does not match
    DataTypeMismatch = 0x0607_0010,
    /// Data type mismatch, length of service parameter too high
    DataTypeMismatchLengthHigh = 0x0607_0012,
    /// Data type mismatch, length of service parameter too low
    DataTypeMismatchLengthLow = 0x0607_0013,
    /// Sub-index does not exist
    NoSuchSubIndex = 0x0609_0011,
    /// Value range of parameter exceeded
    ValueRangeExceeded = 0x0609_0030,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    CannotTransfer = 0x0800_0020,
    /// Data cannot be transferred because of local control
    LocalControl = 0x0800_0021,
    /// Data cannot be transferred in the present device state
    InvalidState = 0x0800_0022,
    /// No resource available to complete the request
    ResourceNotAvailable = 0x0800_0023,
}

impl From<AbortCode> for u32 {
    fn from(value: AbortCode) -> Self {
        value as u32
    }
}

mod cmd {
    pub const DOWNLOAD_SEGMENT_REQ: u8 = 0;
    pub const INITIATE_DOWNLOAD_REQ: u8 = 1;
    pub const INITIATE_UPLOAD_REQ: u8 = 2;
    pub const UPLOAD_SEGMENT_REQ: u8 = 3;
    pub const ABORT: u8 = 4;

    pub const UPLOAD_SEGMENT_RESP: u8 = 0;
    pub const DOWNLOAD_SEGMENT_RESP: u8 = 1;
    pub const INITIATE_UPLOAD_RESP: u8 = 2;
    pub const INITIATE_DOWNLOAD_RESP: u8 = 3;
}

/// A decoded SDO request from the master
#[derive(Debug, PartialEq, Eq)]
pub enum SdoRequest<'a> {
    /// Begin a download (master writes the dictionary)
    InitiateDownload {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Complete-access flag
        complete: bool,
        /// Declared total size, when the size indicator is set on a
        /// non-expedited request
        size: Option<u32>,
        /// Data carried in the initiate frame. For expedited requests this is
        /// the entire value; for normal requests it is the first chunk and
        /// may be empty.
        data: &'a [u8],
        /// Expedited transfer flag
        expedited: bool,
    },
    /// One segment of a segmented download
    DownloadSegment {
        /// Toggle bit
        toggle: bool,
        /// No more segments follow
        last: bool,
        /// Segment data
        data: &'a [u8],
    },
    /// Begin an upload (master reads the dictionary)
    InitiateUpload {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Complete-access flag
        complete: bool,
    },
    /// Request the next segment of a segmented upload
    UploadSegment {
        /// Toggle bit
        toggle: bool,
    },
    /// Master aborted the transfer
    Abort {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Raw abort code
        code: u32,
    },
}

impl<'a> SdoRequest<'a> {
    /// Parse the SDO service data following a CoE request header
    pub fn parse(data: &'a [u8]) -> Result<Self, AbortCode> {
        if data.is_empty() {
            return Err(AbortCode::InvalidCommandSpecifier);
        }
        let command = data[0] >> 5;
        match command {
            cmd::INITIATE_DOWNLOAD_REQ => {
                if data.len() < SDO_HEADER_SIZE {
                    return Err(AbortCode::InvalidCommandSpecifier);
                }
                let size_indicator = data[0] & 0x01 != 0;
                let expedited = data[0] & 0x02 != 0;
                let data_set_size = (data[0] >> 2) & 0x03;
                let complete = data[0] & 0x10 != 0;
                let index = u16::from_le_bytes([data[1], data[2]]);
                let sub = data[3];
                if expedited {
                    let len = if size_indicator {
                        4 - data_set_size as usize
                    } else {
                        4
                    };
                    if data.len() < SDO_HEADER_SIZE + len {
                        return Err(AbortCode::InvalidCommandSpecifier);
                    }
                    Ok(SdoRequest::InitiateDownload {
                        index,
                        sub,
                        complete,
                        size: Some(len as u32),
                        data: &data[SDO_HEADER_SIZE..SDO_HEADER_SIZE + len],
                        expedited: true,
                    })
                } else if size_indicator {
                    if data.len() < SDO_HEADER_SIZE + 4 {
                        return Err(AbortCode::InvalidCommandSpecifier);
                    }
                    let size = u32::from_le_bytes(
                        data[SDO_HEADER_SIZE..SDO_HEADER_SIZE + 4].try_into().unwrap(),
                    );
                    Ok(SdoRequest::InitiateDownload {
                        index,
                        sub,
                        complete,
                        size: Some(size),
                        data: &data[SDO_HEADER_SIZE + 4..],
                        expedited: false,
                    })
                } else {
                    Ok(SdoRequest::InitiateDownload {
                        index,
                        sub,
                        complete,
                        size: None,
                        data: &data[SDO_HEADER_SIZE..],
                        expedited: false,
                    })
                }
            }
            cmd::INITIATE_UPLOAD_REQ => {
                if data.len() < SDO_HEADER_SIZE {
                    return Err(AbortCode::InvalidCommandSpecifier);
                }
                Ok(SdoRequest::InitiateUpload {
                    index: u16::from_le_bytes([data[1], data[2]]),
                    sub: data[3],
                    complete: data[0] & 0x10 != 0,
                })
            }
            cmd::DOWNLOAD_SEGMENT_REQ => {
                let seg = SegmentHeader::from_byte(data[0]);
                let body = &data[SEGMENT_HEADER_SIZE..];
                let len = seg.data_length(body.len());
                if len > body.len() {
                    return Err(AbortCode::InvalidCommandSpecifier);
                }
                Ok(SdoRequest::DownloadSegment {
                    toggle: seg.toggle,
                    last: seg.last,
                    data: &body[..len],
                })
            }
            cmd::UPLOAD_SEGMENT_REQ => Ok(SdoRequest::UploadSegment {
                toggle: data[0] & 0x10 != 0,
            }),
            cmd::ABORT => {
                if data.len() < SDO_HEADER_SIZE + 4 {
                    return Err(AbortCode::InvalidCommandSpecifier);
                }
                Ok(SdoRequest::Abort {
                    index: u16::from_le_bytes([data[1], data[2]]),
                    sub: data[3],
                    code: u32::from_le_bytes(
                        data[SDO_HEADER_SIZE..SDO_HEADER_SIZE + 4].try_into().unwrap(),
                    ),
                })
            }
            _ => Err(AbortCode::InvalidCommandSpecifier),
        }
    }
}

/// The 1-byte SDO segment header
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Command bits
    pub command: u8,
    /// Toggle bit
    pub toggle: bool,
    /// For final segments shorter than the nominal size, the number of
    /// missing bytes (nominal minus actual); 0 otherwise
    pub seg_data_size: u8,
    /// No more segments follow
    pub last: bool,
}

impl SegmentHeader {
    /// Decode from the header byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            command: byte >> 5,
            toggle: byte & 0x10 != 0,
            seg_data_size: (byte >> 1) & 0x07,
            last: byte & 0x01 != 0,
        }
    }

    /// Encode into the header byte
    pub fn to_byte(&self) -> u8 {
        let mut byte = (self.command << 5) | ((self.seg_data_size & 0x07) << 1);
        if self.toggle {
            byte |= 0x10;
        }
        if self.last {
            byte |= 0x01;
        }
        byte
    }

    /// Number of valid data bytes given the bytes present after the header
    ///
    /// A short final segment encodes `nominal - actual` in the seg-data-size
    /// field; other segments use everything present.
    pub fn data_length(&self, present: usize) -> usize {
        if self.last && self.seg_data_size != 0 {
            MIN_SEGMENT_DATA.saturating_sub(self.seg_data_size as usize)
        } else {
            present
        }
    }

    /// Seg-data-size field value for a final segment carrying `len` bytes
    pub fn size_field_for(len: usize) -> u8 {
        if len >= MIN_SEGMENT_DATA {
            0
        } else {
            (MIN_SEGMENT_DATA - len) as u8
        }
    }
}

/// An SDO response to be sent to the master
#[derive(Debug, PartialEq, Eq)]
pub enum SdoResponse<'a> {
    /// Acknowledge a completed or initiated download
    DownloadAck {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
    },
    /// Acknowledge a download segment
    DownloadSegmentAck {
        /// Echoed toggle bit
        toggle: bool,
    },
    /// Expedited upload carrying up to 4 data bytes in the header
    ExpeditedUpload {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Value bytes, at most 4
        data: &'a [u8],
    },
    /// Normal upload: declared total size plus the entire value in one frame
    NormalUpload {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Declared total size
        total: u32,
        /// Value bytes
        data: &'a [u8],
    },
    /// Segmented upload initiate: declared total size, data follows in
    /// segments
    UploadAck {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Declared total size
        total: u32,
    },
    /// One segment of a segmented upload
    UploadSegment {
        /// Toggle bit
        toggle: bool,
        /// No more segments follow
        last: bool,
        /// Segment data
        data: &'a [u8],
    },
    /// Abort the transfer
    Abort {
        /// Object index
        index: u16,
        /// Sub-index
        sub: u8,
        /// Abort code
        code: u32,
    },
}

impl SdoResponse<'_> {
    /// Abort response helper
    pub fn abort(index: u16, sub: u8, code: AbortCode) -> Self {
        SdoResponse::Abort {
            index,
            sub,
            code: code.into(),
        }
    }

    /// Write the CoE header and response body into `buf`, returning the
    /// number of bytes written
    pub fn write(&self, buf: &mut [u8]) -> usize {
        CoeHeader::new(CoeService::SdoResponse).write(buf);
        let body = &mut buf[COE_HEADER_SIZE..];
        let body_len = match self {
            SdoResponse::DownloadAck { index, sub } => {
                write_initiate(body, cmd::INITIATE_DOWNLOAD_RESP << 5, *index, *sub);
                body[4..8].fill(0);
                SDO_HEADER_SIZE + 4
            }
            SdoResponse::DownloadSegmentAck { toggle } => {
                let seg = SegmentHeader {
                    command: cmd::DOWNLOAD_SEGMENT_RESP,
                    toggle: *toggle,
                    seg_data_size: 0,
                    last: false,
                };
                body[0] = seg.to_byte();
                body[1..8].fill(0);
                SEGMENT_HEADER_SIZE + MIN_SEGMENT_DATA
            }
            SdoResponse::ExpeditedUpload { index, sub, data } => {
                debug_assert!(data.len() <= 4);
                let n = (4 - data.len()) as u8;
                let byte0 = (cmd::INITIATE_UPLOAD_RESP << 5) | (n << 2) | 0x02 | 0x01;
                write_initiate(body, byte0, *index, *sub);
                body[4..8].fill(0);
                body[SDO_HEADER_SIZE..SDO_HEADER_SIZE + data.len()].copy_from_slice(data);
                SDO_HEADER_SIZE + 4
            }
            SdoResponse::NormalUpload {
                index,
                sub,
                total,
                data,
            } => {
                write_initiate(body, (cmd::INITIATE_UPLOAD_RESP << 5) | 0x01, *index, *sub);
                body[SDO_HEADER_SIZE..SDO_HEADER_SIZE + 4]
                    .copy_from_slice(&total.to_le_bytes());
                body[SDO_HEADER_SIZE + 4..SDO_HEADER_SIZE + 4 + data.len()]
                    .copy_from_slice(data);
                SDO_HEADER_SIZE + 4 + data.len()
            }
            SdoResponse::UploadAck { index, sub, total } => {
                write_initiate(body, (cmd::INITIATE_UPLOAD_RESP << 5) | 0x01, *index, *sub);
                body[SDO_HEADER_SIZE..SDO_HEADER_SIZE + 4]
                    .copy_from_slice(&total.to_le_bytes());
                SDO_HEADER_SIZE + 4
            }
            SdoResponse::UploadSegment { toggle, last, data } => {
                let seg = SegmentHeader {
                    command: cmd::UPLOAD_SEGMENT_RESP,
                    toggle: *toggle,
                    seg_data_size: if *last {
                        SegmentHeader::size_field_for(data.len())
                    } else {
                        0
                    },
                    last: *last,
                };
                body[0] = seg.to_byte();
                // Only short final segments are padded to the nominal size;
                // the seg-data-size field tells the master how many bytes are
                // valid. A short non-final segment must keep its true length.
                let padded = if *last {
                    data.len().max(MIN_SEGMENT_DATA)
                } else {
                    data.len()
                };
                body[1..1 + padded].fill(0);
                body[1..1 + data.len()].copy_from_slice(data);
                SEGMENT_HEADER_SIZE + padded
            }
            SdoResponse::Abort { index, sub, code } => {
                write_initiate(body, cmd::ABORT << 5, *index, *sub);
                body[SDO_HEADER_SIZE..SDO_HEADER_SIZE + 4].copy_from_slice(&code.to_le_bytes());
                SDO_HEADER_SIZE + 4
            }
        };
        COE_HEADER_SIZE + body_len
    }
}

fn write_initiate(buf: &mut [u8], byte0: u8, index: u16, sub: u8) {
    buf[0] = byte0;
    buf[1..3].copy_from_slice(&index.to_le_bytes());
    buf[3] = sub;
}

/// Opcodes of the SDO Information service
pub mod info_op {
    /// Get OD list request
    pub const GET_OD_LIST_REQ: u8 = 1;
    /// Get OD list response
    pub const GET_OD_LIST_RESP: u8 = 2;
    /// Get object description request
    pub const GET_OBJ_DESC_REQ: u8 = 3;
    /// Get object description response
    pub const GET_OBJ_DESC_RESP: u8 = 4;
    /// Get entry description request
    pub const GET_ENTRY_DESC_REQ: u8 = 5;
    /// Get entry description response
    pub const GET_ENTRY_DESC_RESP: u8 = 6;
    /// SDO Info error response
    pub const ERROR: u8 = 7;
}

/// Size of the SDO Information service header in bytes
pub const SDO_INFO_HEADER_SIZE: usize = 4;

/// The 4-byte SDO Information service header
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SdoInfoHeader {
    /// Service opcode, see [`info_op`]
    pub opcode: u8,
    /// More fragments follow this one
    pub incomplete: bool,
    /// Number of fragments still to be sent after this one
    pub fragments_left: u16,
}

impl SdoInfoHeader {
    /// Parse from the start of SDO Info service data
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < SDO_INFO_HEADER_SIZE {
            return None;
        }
        let header = Self {
            opcode: data[0] & 0x7F,
            incomplete: data[0] & 0x80 != 0,
            fragments_left: u16::from_le_bytes([data[2], data[3]]),
        };
        Some((header, &data[SDO_INFO_HEADER_SIZE..]))
    }

    /// Write to the first four bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = (self.opcode & 0x7F) | if self.incomplete { 0x80 } else { 0 };
        buf[1] = 0;
        buf[2..4].copy_from_slice(&self.fragments_left.to_le_bytes());
    }
}

/// An emergency message frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EmergencyFrame {
    /// Error code
    pub code: u16,
    /// Error register
    pub register: u8,
    /// Diagnostic payload
    pub data: [u8; 4],
}

impl EmergencyFrame {
    /// Write the CoE header and emergency body into `buf`, returning the
    /// number of bytes written
    pub fn write(&self, buf: &mut [u8]) -> usize {
        CoeHeader::new(CoeService::Emergency).write(buf);
        let body = &mut buf[COE_HEADER_SIZE..];
        body[0..2].copy_from_slice(&self.code.to_le_bytes());
        body[2] = self.register;
        body[3..7].copy_from_slice(&self.data);
        COE_HEADER_SIZE + 7
    }

    /// Parse from the service data following a CoE emergency header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }
        Some(Self {
            code: u16::from_le_bytes([data[0], data[1]]),
            register: data[2],
            data: data[3..7].try_into().unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coe_header_round_trip() {
        let header = CoeHeader::new(CoeService::SdoRequest);
        let mut buf = [0u8; 2];
        header.write(&mut buf);
        let (parsed, rest) = CoeHeader::parse(&buf).unwrap();
        assert_eq!(header, parsed);
        assert!(rest.is_empty());
        assert_eq!(Ok(CoeService::SdoRequest), parsed.service_type());
    }

    #[test]
    fn test_parse_expedited_download() {
        // Expedited, size indicator set, 2 valid bytes
        let data = [
            (1 << 5) | 0x01 | 0x02 | (2 << 2),
            0x08,
            0x60,
            0x01,
            0x34,
            0x12,
            0x00,
            0x00,
        ];
        let req = SdoRequest::parse(&data).unwrap();
        assert_eq!(
            SdoRequest::InitiateDownload {
                index: 0x6008,
                sub: 1,
                complete: false,
                size: Some(2),
                data: &[0x34, 0x12],
                expedited: true,
            },
            req
        );
    }

    #[test]
    fn test_parse_segmented_download_initiate() {
        let mut data = [0u8; 8];
        data[0] = (1 << 5) | 0x01;
        data[1..3].copy_from_slice(&0x2000u16.to_le_bytes());
        data[3] = 0;
        data[4..8].copy_from_slice(&100u32.to_le_bytes());
        let req = SdoRequest::parse(&data).unwrap();
        assert_eq!(
            SdoRequest::InitiateDownload {
                index: 0x2000,
                sub: 0,
                complete: false,
                size: Some(100),
                data: &[],
                expedited: false,
            },
            req
        );
    }

    #[test]
    fn test_segment_header_size_field() {
        assert_eq!(0, SegmentHeader::size_field_for(7));
        assert_eq!(0, SegmentHeader::size_field_for(12));
        assert_eq!(5, SegmentHeader::size_field_for(2));

        let seg = SegmentHeader {
            command: cmd::DOWNLOAD_SEGMENT_REQ,
            toggle: true,
            seg_data_size: 5,
            last: true,
        };
        let byte = seg.to_byte();
        let parsed = SegmentHeader::from_byte(byte);
        assert_eq!(seg, parsed);
        assert_eq!(2, parsed.data_length(7));
    }

    #[test]
    fn test_expedited_upload_response() {
        let resp = SdoResponse::ExpeditedUpload {
            index: 0x1000,
            sub: 0,
            data: &0x1234u16.to_le_bytes(),
        };
        let mut buf = [0u8; 16];
        let len = resp.write(&mut buf);
        assert_eq!(COE_HEADER_SIZE + 8, len);
        // n = 2, expedited + size indicator set
        assert_eq!((2 << 5) | (2 << 2) | 0x03, buf[2]);
        assert_eq!([0x34, 0x12], buf[6..8]);
    }

    #[test]
    fn test_abort_response() {
        let resp = SdoResponse::abort(0x6000, 2, AbortCode::NoSuchObject);
        let mut buf = [0u8; 16];
        let len = resp.write(&mut buf);
        assert_eq!(COE_HEADER_SIZE + 8, len);
        assert_eq!(4 << 5, buf[2]);
        assert_eq!(
            0x0602_0000u32,
            u32::from_le_bytes(buf[6..10].try_into().unwrap())
        );
    }

    #[test]
    fn test_emergency_round_trip() {
        let frame = EmergencyFrame {
            code: 0x4210,
            register: 0x01,
            data: [1, 2, 3, 4],
        };
        let mut buf = [0u8; 16];
        let len = frame.write(&mut buf);
        assert_eq!(COE_HEADER_SIZE + 7, len);
        let (header, body) = CoeHeader::parse(&buf[..len]).unwrap();
        assert_eq!(Ok(CoeService::Emergency), header.service_type());
        assert_eq!(Some(frame), EmergencyFrame::parse(body));
    }

    #[test]
    fn test_sdo_info_header_round_trip() {
        let header = SdoInfoHeader {
            opcode: info_op::GET_OD_LIST_RESP,
            incomplete: true,
            fragments_left: 3,
        };
        let mut buf = [0u8; 8];
        header.write(&mut buf);
        let (parsed, _) = SdoInfoHeader::parse(&buf).unwrap();
        assert_eq!(header, parsed);
    }
}
