//! Process data mapping and the cyclic encode/decode path
//!
//! The master configures two lists of mapping objects (one per direction)
//! plus an assignment object per direction naming which mapping objects are
//! active. On the transition into SAFEOP the [`compiler`] resolves the active
//! entries against the object dictionary into a flat table of
//! [`PdoFastEntry`] records, which the [`codec`] walks once per cyclic
//! deadline.

pub(crate) mod compiler;
pub(crate) mod codec;

pub use codec::{decode_outputs, encode_inputs, CyclicTask};
pub use compiler::{compile_mappings, CompileError};

use drivecat_common::constants::object_ids;
use drivecat_common::coe::AbortCode;
use drivecat_common::objects::{ObjectAccess, ObjectCode, SubInfo};
use drivecat_common::pdo::UnitConvert;
use drivecat_common::AtomicCell;

/// Mapping objects supported per direction
pub const MAX_PDO_OBJECTS: usize = 4;
/// Mapping entries supported per mapping object
pub const MAX_ENTRIES_PER_PDO: usize = 8;
/// Compiled entries supported per direction
pub const MAX_FAST_ENTRIES: usize = MAX_PDO_OBJECTS * MAX_ENTRIES_PER_PDO;
/// Largest process data image per direction, in bytes
pub const MAX_PROCESS_DATA_BYTES: usize = 128;

/// Direction of a process data object
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PdoDirection {
    /// Received by the slave: cyclic outputs, master to slave
    Rx,
    /// Transmitted by the slave: cyclic inputs, slave to master
    Tx,
}

/// Access class of a compiled entry
///
/// The class encodes the copy width, whether the entry sits at an even byte
/// offset in the process image, and whether a unit conversion is applied.
/// Alignment depends on the running byte offset of everything mapped before
/// the entry, so it is assigned by the compiler, not a property of the entry
/// alone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessSelector {
    /// 8-bit copy
    Bit8,
    /// 16-bit copy at an even offset
    Bit16,
    /// 16-bit copy at an odd offset
    Bit16Unaligned,
    /// 32-bit copy at an even offset
    Bit32,
    /// 32-bit copy at an odd offset
    Bit32Unaligned,
    /// 64-bit copy
    Bit64,
    /// 8-bit copy with unit conversion
    Bit8Converted,
    /// 16-bit copy at an even offset with unit conversion
    Bit16Converted,
    /// 16-bit copy at an odd offset with unit conversion
    Bit16UnalignedConverted,
    /// 32-bit copy at an even offset with unit conversion
    Bit32Converted,
    /// 32-bit copy at an odd offset with unit conversion
    Bit32UnalignedConverted,
    /// 64-bit copy with unit conversion
    Bit64Converted,
}

impl AccessSelector {
    /// Pick the selector for a width in bytes at a given running offset
    pub fn classify(width: usize, offset: usize, converted: bool) -> Option<Self> {
        use AccessSelector::*;
        let aligned = offset % 2 == 0;
        let selector = match (width, aligned, converted) {
            (1, _, false) => Bit8,
            (1, _, true) => Bit8Converted,
            (2, true, false) => Bit16,
            (2, false, false) => Bit16Unaligned,
            (2, true, true) => Bit16Converted,
            (2, false, true) => Bit16UnalignedConverted,
            (4, true, false) => Bit32,
            (4, false, false) => Bit32Unaligned,
            (4, true, true) => Bit32Converted,
            (4, false, true) => Bit32UnalignedConverted,
            (8, _, false) => Bit64,
            (8, _, true) => Bit64Converted,
            _ => return None,
        };
        Some(selector)
    }

    /// Copy width in bytes
    pub fn width(&self) -> usize {
        use AccessSelector::*;
        match self {
            Bit8 | Bit8Converted => 1,
            Bit16 | Bit16Unaligned | Bit16Converted | Bit16UnalignedConverted => 2,
            Bit32 | Bit32Unaligned | Bit32Converted | Bit32UnalignedConverted => 4,
            Bit64 | Bit64Converted => 8,
        }
    }

    /// Does this class apply a unit conversion?
    pub fn converted(&self) -> bool {
        use AccessSelector::*;
        matches!(
            self,
            Bit8Converted
                | Bit16Converted
                | Bit16UnalignedConverted
                | Bit32Converted
                | Bit32UnalignedConverted
                | Bit64Converted
        )
    }
}

/// One compiled process data entry
#[derive(Copy, Clone)]
pub struct PdoFastEntry {
    /// The resolved object
    pub object: &'static dyn ObjectAccess,
    /// Object index, kept for fault reporting
    pub index: u16,
    /// Sub-index
    pub sub: u8,
    /// Byte offset in the process image
    pub offset: u16,
    /// Access class
    pub selector: AccessSelector,
    /// Conversion hook for the converted access classes
    pub converter: Option<&'static dyn UnitConvert>,
}

impl core::fmt::Debug for PdoFastEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PdoFastEntry")
            .field("index", &self.index)
            .field("sub", &self.sub)
            .field("offset", &self.offset)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Descriptor naming the active compiled table
///
/// Published as one atomic value so the cyclic path observes a compile as a
/// single swap: bank selector, entry counts and image sizes always belong to
/// the same compile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PdoTableDescriptor {
    /// Which bank holds the active table
    pub bank: u8,
    /// Number of active receive entries
    pub rx_count: u8,
    /// Number of active transmit entries
    pub tx_count: u8,
    /// Output image size in bytes
    pub rx_bytes: u16,
    /// Input image size in bytes
    pub tx_bytes: u16,
    /// False until a compile succeeds, or after one fails
    pub valid: bool,
}

struct PdoBank {
    rx: [AtomicCell<Option<PdoFastEntry>>; MAX_FAST_ENTRIES],
    tx: [AtomicCell<Option<PdoFastEntry>>; MAX_FAST_ENTRIES],
}

impl PdoBank {
    const fn new() -> Self {
        Self {
            rx: [const { AtomicCell::new(None) }; MAX_FAST_ENTRIES],
            tx: [const { AtomicCell::new(None) }; MAX_FAST_ENTRIES],
        }
    }
}

/// The double-buffered compiled mapping table
///
/// The compiler fills the inactive bank, then publishes it by swapping the
/// descriptor. The cyclic codec reads the descriptor once per pass and only
/// touches the bank it names.
#[allow(missing_debug_implementations)]
pub struct PdoImage {
    banks: [PdoBank; 2],
    active: AtomicCell<PdoTableDescriptor>,
}

impl Default for PdoImage {
    fn default() -> Self {
        Self::new()
    }
}

impl PdoImage {
    /// Create an empty, invalid image
    pub const fn new() -> Self {
        Self {
            banks: [PdoBank::new(), PdoBank::new()],
            active: AtomicCell::new(PdoTableDescriptor {
                bank: 0,
                rx_count: 0,
                tx_count: 0,
                rx_bytes: 0,
                tx_bytes: 0,
                valid: false,
            }),
        }
    }

    /// The currently published descriptor
    pub fn descriptor(&self) -> PdoTableDescriptor {
        self.active.load()
    }

    /// Mark the compiled mapping unusable
    ///
    /// The cyclic path stops exchanging on its next pass.
    pub fn invalidate(&self) {
        let mut desc = self.active.load();
        desc.valid = false;
        self.active.store(desc);
    }

    /// Load one entry of the named bank
    pub fn entry(&self, bank: u8, direction: PdoDirection, i: usize) -> Option<PdoFastEntry> {
        let bank = &self.banks[(bank & 1) as usize];
        match direction {
            PdoDirection::Rx => bank.rx[i].load(),
            PdoDirection::Tx => bank.tx[i].load(),
        }
    }

    pub(crate) fn inactive_bank(&self) -> u8 {
        self.active.load().bank ^ 1
    }

    pub(crate) fn stage_entry(&self, bank: u8, direction: PdoDirection, i: usize, entry: PdoFastEntry) {
        let bank = &self.banks[(bank & 1) as usize];
        match direction {
            PdoDirection::Rx => bank.rx[i].store(Some(entry)),
            PdoDirection::Tx => bank.tx[i].store(Some(entry)),
        }
    }

    pub(crate) fn publish(&self, descriptor: PdoTableDescriptor) {
        self.active.store(descriptor);
    }
}

/// Master-configurable mapping storage for one direction
///
/// Holds the assignment list (which mapping objects are active) and the
/// per-object entry lists, all as atomically accessed raw values so the SDO
/// server can write them while the rest of the stack reads them.
#[allow(missing_debug_implementations)]
pub struct PdoMappingTable {
    assign_count: AtomicCell<u8>,
    assigned: [AtomicCell<u16>; MAX_PDO_OBJECTS],
    entry_counts: [AtomicCell<u8>; MAX_PDO_OBJECTS],
    entries: [[AtomicCell<u32>; MAX_ENTRIES_PER_PDO]; MAX_PDO_OBJECTS],
    direction: PdoDirection,
}

impl PdoMappingTable {
    /// Create an empty table for `direction`
    pub const fn new(direction: PdoDirection) -> Self {
        Self {
            assign_count: AtomicCell::new(0),
            assigned: [const { AtomicCell::new(0) }; MAX_PDO_OBJECTS],
            entry_counts: [const { AtomicCell::new(0) }; MAX_PDO_OBJECTS],
            entries: [const { [const { AtomicCell::new(0) }; MAX_ENTRIES_PER_PDO] };
                MAX_PDO_OBJECTS],
            direction,
        }
    }

    /// Direction this table maps
    pub fn direction(&self) -> PdoDirection {
        self.direction
    }

    /// Index of the first mapping object of this direction
    pub fn map_base(&self) -> u16 {
        match self.direction {
            PdoDirection::Rx => object_ids::RXPDO_MAP_BASE,
            PdoDirection::Tx => object_ids::TXPDO_MAP_BASE,
        }
    }

    /// Number of assigned mapping objects
    pub fn assign_count(&self) -> usize {
        (self.assign_count.load() as usize).min(MAX_PDO_OBJECTS)
    }

    /// The `n`th assigned mapping object index
    pub fn assigned(&self, n: usize) -> u16 {
        self.assigned[n].load()
    }

    /// Number of entries in mapping object slot `slot`
    pub fn entry_count(&self, slot: usize) -> usize {
        (self.entry_counts[slot].load() as usize).min(MAX_ENTRIES_PER_PDO)
    }

    /// Raw mapping value `n` of mapping object slot `slot`
    pub fn entry(&self, slot: usize, n: usize) -> u32 {
        self.entries[slot][n].load()
    }

    /// Reset to the boot-up default: nothing assigned, nothing mapped
    pub fn init_defaults(&self) {
        self.assign_count.store(0);
        for slot in 0..MAX_PDO_OBJECTS {
            self.assigned[slot].store(0);
            self.entry_counts[slot].store(0);
            for entry in &self.entries[slot] {
                entry.store(0);
            }
        }
    }
}

/// The PDO assignment object (0x1C12 / 0x1C13)
#[allow(missing_debug_implementations)]
pub struct PdoAssignObject {
    table: &'static PdoMappingTable,
}

impl PdoAssignObject {
    /// Create the assignment object backed by `table`
    pub const fn new(table: &'static PdoMappingTable) -> Self {
        Self { table }
    }
}

impl ObjectAccess for PdoAssignObject {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Array
    }

    fn max_sub_number(&self) -> u8 {
        MAX_PDO_OBJECTS as u8
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        match sub {
            0 => Ok(SubInfo::new_u8().rw_access()),
            s if (s as usize) <= MAX_PDO_OBJECTS => Ok(SubInfo::new_u16().rw_access()),
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        if offset != 0 {
            return Ok(0);
        }
        match sub {
            0 => {
                if buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.table.assign_count.load();
                Ok(1)
            }
            s if (s as usize) <= MAX_PDO_OBJECTS => {
                let value = self.table.assigned[(s - 1) as usize].load();
                let bytes = value.to_le_bytes();
                let len = buf.len().min(2);
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }

    fn write(&self, sub: u8, data: &[u8]) -> Result<(), AbortCode> {
        match sub {
            0 => {
                if data.len() != 1 {
                    return Err(AbortCode::DataTypeMismatch);
                }
                if data[0] as usize > MAX_PDO_OBJECTS {
                    return Err(AbortCode::ValueRangeExceeded);
                }
                self.table.assign_count.store(data[0]);
                Ok(())
            }
            s if (s as usize) <= MAX_PDO_OBJECTS => {
                if data.len() != 2 {
                    return Err(AbortCode::DataTypeMismatch);
                }
                let value = u16::from_le_bytes(data.try_into().unwrap());
                self.table.assigned[(s - 1) as usize].store(value);
                Ok(())
            }
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }
}

/// One PDO mapping object (0x1600+n / 0x1A00+n)
#[allow(missing_debug_implementations)]
pub struct PdoMappingObject {
    table: &'static PdoMappingTable,
    slot: usize,
}

impl PdoMappingObject {
    /// Create the mapping object for `slot` of `table`
    pub const fn new(table: &'static PdoMappingTable, slot: usize) -> Self {
        Self { table, slot }
    }
}

impl ObjectAccess for PdoMappingObject {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Record
    }

    fn max_sub_number(&self) -> u8 {
        MAX_ENTRIES_PER_PDO as u8
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        match sub {
            0 => Ok(SubInfo::new_u8().rw_access()),
            s if (s as usize) <= MAX_ENTRIES_PER_PDO => Ok(SubInfo::new_u32().rw_access()),
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        if offset != 0 {
            return Ok(0);
        }
        match sub {
            0 => {
                if buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.table.entry_counts[self.slot].load();
                Ok(1)
            }
            s if (s as usize) <= MAX_ENTRIES_PER_PDO => {
                let value = self.table.entries[self.slot][(s - 1) as usize].load();
                let bytes = value.to_le_bytes();
                let len = buf.len().min(4);
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }

    fn write(&self, sub: u8, data: &[u8]) -> Result<(), AbortCode> {
        match sub {
            0 => {
                if data.len() != 1 {
                    return Err(AbortCode::DataTypeMismatch);
                }
                if data[0] as usize > MAX_ENTRIES_PER_PDO {
                    return Err(AbortCode::ValueRangeExceeded);
                }
                self.table.entry_counts[self.slot].store(data[0]);
                Ok(())
            }
            s if (s as usize) <= MAX_ENTRIES_PER_PDO => {
                if data.len() != 4 {
                    return Err(AbortCode::DataTypeMismatch);
                }
                let value = u32::from_le_bytes(data.try_into().unwrap());
                self.table.entries[self.slot][(s - 1) as usize].store(value);
                Ok(())
            }
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivecat_common::objects::ObjectAccess;

    #[test]
    fn test_selector_classification() {
        assert_eq!(
            Some(AccessSelector::Bit8),
            AccessSelector::classify(1, 0, false)
        );
        assert_eq!(
            Some(AccessSelector::Bit16Unaligned),
            AccessSelector::classify(2, 1, false)
        );
        assert_eq!(
            Some(AccessSelector::Bit32Converted),
            AccessSelector::classify(4, 2, true)
        );
        assert_eq!(None, AccessSelector::classify(3, 0, false));
        assert_eq!(4, AccessSelector::Bit32Unaligned.width());
        assert!(AccessSelector::Bit64Converted.converted());
    }

    #[test]
    fn test_mapping_objects_store_to_table() {
        let table = Box::leak(Box::new(PdoMappingTable::new(PdoDirection::Rx)));
        let assign = PdoAssignObject::new(table);
        let mapping = PdoMappingObject::new(table, 0);

        assign
            .write(1, &object_ids::RXPDO_MAP_BASE.to_le_bytes())
            .unwrap();
        assign.write(0, &[1]).unwrap();
        mapping.write(1, &0x6040_0010u32.to_le_bytes()).unwrap();
        mapping.write(0, &[1]).unwrap();

        assert_eq!(1, table.assign_count());
        assert_eq!(object_ids::RXPDO_MAP_BASE, table.assigned(0));
        assert_eq!(1, table.entry_count(0));
        assert_eq!(0x6040_0010, table.entry(0, 0));

        assert_eq!(
            Err(AbortCode::ValueRangeExceeded),
            assign.write(0, &[(MAX_PDO_OBJECTS + 1) as u8])
        );
        assert_eq!(1, assign.read_u8(0).unwrap());
    }
}
