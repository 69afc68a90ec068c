//! Definitions and data types related to PDO mapping
//!
//! A mapping entry names one sub-object and the number of bits it occupies in
//! the process image. Entries are stored in mapping objects as packed `u32`
//! values.

/// Represents one PDO mapping entry
///
/// Each entry specifies one sub-object to be included in the process image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(
    feature = "std",
    derive(serde::Deserialize),
    serde(deny_unknown_fields)
)]
pub struct PdoMapValue {
    /// The object index
    pub index: u16,
    /// The object sub index
    pub sub: u8,
    /// The size of the mapped value, in **bits**
    pub bit_length: u8,
}

impl PdoMapValue {
    /// Convert to the u32 representation stored in a mapping object
    pub fn to_raw(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.sub as u32) << 8) | (self.bit_length as u32)
    }

    /// Create from the raw u32 representation stored in a mapping object
    pub fn from_raw(value: u32) -> Self {
        let index = (value >> 16) as u16;
        let sub = ((value >> 8) & 0xff) as u8;
        let bit_length = (value & 0xff) as u8;
        Self {
            index,
            sub,
            bit_length,
        }
    }
}

/// Error returned by a failed unit conversion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConversionFault;

impl core::fmt::Display for ConversionFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unit conversion failed")
    }
}

/// A unit conversion hook applied to one mapped value on every cycle
///
/// Values are passed as the raw little-endian bits of the mapped entry,
/// widened to u64. Implementations must be constant-time enough for the
/// cyclic deadline and must not allocate or block.
pub trait UnitConvert: Sync {
    /// Convert a value received from the master before it is stored
    fn from_wire(&self, value: u64) -> Result<u64, ConversionFault>;

    /// Convert a value read from the application before it is transmitted
    fn to_wire(&self, value: u64) -> Result<u64, ConversionFault>;
}
