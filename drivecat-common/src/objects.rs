//! Object dictionary access traits and reusable object implementations
//!
//! The dictionary is a table of [`OdEntry`] records, each pairing an index
//! with a reference to an [`ObjectAccess`] implementation. Objects are
//! accessed by the SDO server and the PDO compiler/codec exclusively through
//! this trait, which exposes an explicit transaction protocol for writes:
//! either a single-shot [`ObjectAccess::write`], or the phased sequence
//! [`begin_write`](ObjectAccess::begin_write) →
//! [`write_chunk`](ObjectAccess::write_chunk) →
//! [`end_write`](ObjectAccess::end_write), with
//! [`abort_write`](ObjectAccess::abort_write) guaranteed on every failed
//! transaction so implementations can release per-transaction resources.

use core::cell::RefCell;

use critical_section::Mutex;
use int_enum::IntEnum;
use portable_atomic::{AtomicUsize, Ordering};

use crate::atomic_cell::AtomicCell;
use crate::coe::AbortCode;
use crate::pdo::UnitConvert;

/// Access rights of a sub-object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessType {
    /// Read-only
    #[default]
    Ro,
    /// Write-only
    Wo,
    /// Read-write
    Rw,
    /// Read-only and guaranteed not to change
    Const,
}

impl AccessType {
    /// Can the master read this sub-object?
    pub fn is_readable(&self) -> bool {
        matches!(self, AccessType::Ro | AccessType::Rw | AccessType::Const)
    }

    /// Can the master write this sub-object?
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessType::Wo | AccessType::Rw)
    }
}

/// Standard data type codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum DataType {
    /// BOOLEAN
    Bool = 0x0001,
    /// INTEGER8
    Int8 = 0x0002,
    /// INTEGER16
    Int16 = 0x0003,
    /// INTEGER32
    Int32 = 0x0004,
    /// UNSIGNED8
    #[default]
    UInt8 = 0x0005,
    /// UNSIGNED16
    UInt16 = 0x0006,
    /// UNSIGNED32
    UInt32 = 0x0007,
    /// REAL32
    Real32 = 0x0008,
    /// VISIBLE_STRING
    VisibleString = 0x0009,
    /// OCTET_STRING
    OctetString = 0x000A,
    /// UNICODE_STRING
    UnicodeString = 0x000B,
    /// DOMAIN
    Domain = 0x000F,
    /// INTEGER64
    Int64 = 0x0015,
    /// UNSIGNED64
    UInt64 = 0x001B,
}

impl DataType {
    /// True for the string-like types which permit writes shorter than the
    /// declared size
    pub fn is_str(&self) -> bool {
        matches!(
            self,
            DataType::VisibleString | DataType::OctetString | DataType::UnicodeString
        )
    }
}

/// Object codes, as reported in object descriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ObjectCode {
    /// A single value
    Var = 7,
    /// An array of values of one type
    Array = 8,
    /// A structure of heterogeneous fields
    Record = 9,
}

/// Metadata describing one sub-object
#[derive(Clone, Copy)]
pub struct SubInfo {
    /// Size in bytes. Strings report their capacity; domains may report 0.
    pub size: usize,
    /// Data type code
    pub data_type: DataType,
    /// Access rights
    pub access_type: AccessType,
    /// May this sub-object be mapped into a PDO?
    pub pdo_mappable: bool,
    /// Unit conversion applied when this sub-object is exchanged cyclically
    pub converter: Option<&'static dyn UnitConvert>,
}

impl Default for SubInfo {
    fn default() -> Self {
        Self {
            size: 0,
            data_type: DataType::UInt8,
            access_type: AccessType::Ro,
            pdo_mappable: false,
            converter: None,
        }
    }
}

impl core::fmt::Debug for SubInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubInfo")
            .field("size", &self.size)
            .field("data_type", &self.data_type)
            .field("access_type", &self.access_type)
            .field("pdo_mappable", &self.pdo_mappable)
            .field("converter", &self.converter.map(|_| "..."))
            .finish()
    }
}

impl SubInfo {
    /// Info for the sub-0 "number of entries" field of arrays and records
    pub const MAX_SUB_NUMBER: SubInfo = SubInfo {
        size: 1,
        data_type: DataType::UInt8,
        access_type: AccessType::Const,
        pdo_mappable: false,
        converter: None,
    };

    /// A read-only UNSIGNED8 sub-object
    pub const fn new_u8() -> Self {
        Self {
            size: 1,
            data_type: DataType::UInt8,
            access_type: AccessType::Ro,
            pdo_mappable: false,
            converter: None,
        }
    }

    /// A read-only UNSIGNED16 sub-object
    pub const fn new_u16() -> Self {
        Self {
            size: 2,
            data_type: DataType::UInt16,
            access_type: AccessType::Ro,
            pdo_mappable: false,
            converter: None,
        }
    }

    /// A read-only UNSIGNED32 sub-object
    pub const fn new_u32() -> Self {
        Self {
            size: 4,
            data_type: DataType::UInt32,
            access_type: AccessType::Ro,
            pdo_mappable: false,
            converter: None,
        }
    }

    /// A read-only UNSIGNED64 sub-object
    pub const fn new_u64() -> Self {
        Self {
            size: 8,
            data_type: DataType::UInt64,
            access_type: AccessType::Ro,
            pdo_mappable: false,
            converter: None,
        }
    }

    /// Make this sub-object read-write
    pub const fn rw_access(mut self) -> Self {
        self.access_type = AccessType::Rw;
        self
    }

    /// Make this sub-object write-only
    pub const fn wo_access(mut self) -> Self {
        self.access_type = AccessType::Wo;
        self
    }

    /// Allow mapping this sub-object into a PDO
    pub const fn mappable(mut self) -> Self {
        self.pdo_mappable = true;
        self
    }

    /// Attach a unit conversion hook
    pub const fn with_converter(mut self, converter: &'static dyn UnitConvert) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Check a declared download size against this sub-object
    ///
    /// String and domain types accept shorter writes; all other types require
    /// the exact size. Domains reporting size 0 accept anything.
    pub fn validate_write_size(&self, size: usize) -> Result<(), AbortCode> {
        if self.size == 0 {
            return Ok(());
        }
        if self.data_type.is_str() || matches!(self.data_type, DataType::Domain) {
            if size > self.size {
                return Err(AbortCode::DataTypeMismatchLengthHigh);
            }
        } else if size < self.size {
            return Err(AbortCode::DataTypeMismatchLengthLow);
        } else if size > self.size {
            return Err(AbortCode::DataTypeMismatchLengthHigh);
        }
        Ok(())
    }
}

/// Access to one object in the dictionary
///
/// Writes follow an explicit transaction protocol. Single-shot values arrive
/// through [`write`](Self::write), which is the entire init/data/end sequence
/// collapsed into one call. Larger values arrive through
/// [`begin_write`](Self::begin_write), one or more
/// [`write_chunk`](Self::write_chunk) calls at increasing offsets, and a
/// final [`end_write`](Self::end_write); a failed or cancelled transaction
/// receives [`abort_write`](Self::abort_write) instead of `end_write`.
pub trait ObjectAccess: Sync {
    /// The object code reported in descriptions
    fn object_code(&self) -> ObjectCode;

    /// Highest implemented sub-index
    fn max_sub_number(&self) -> u8 {
        0
    }

    /// Metadata for one sub-object
    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode>;

    /// Read bytes starting at `offset` into `buf`, returning the number read
    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode>;

    /// Current readable size of a sub-object in bytes
    fn read_size(&self, sub: u8) -> Result<usize, AbortCode> {
        let info = self.sub_info(sub)?;
        if !info.access_type.is_readable() {
            return Err(AbortCode::WriteOnly);
        }
        Ok(info.size)
    }

    /// Write a complete value in one call
    fn write(&self, sub: u8, data: &[u8]) -> Result<(), AbortCode>;

    /// Open a chunked write transaction
    ///
    /// The default implementation validates access rights and the declared
    /// size, when one was announced.
    fn begin_write(&self, sub: u8, declared_size: Option<usize>) -> Result<(), AbortCode> {
        let info = self.sub_info(sub)?;
        if !info.access_type.is_writable() {
            return Err(AbortCode::ReadOnly);
        }
        if let Some(size) = declared_size {
            info.validate_write_size(size)?;
        }
        Ok(())
    }

    /// Write one chunk at `offset` within an open transaction
    ///
    /// Objects which cannot accept partial data refuse with
    /// [`AbortCode::UnsupportedAccess`].
    fn write_chunk(&self, _sub: u8, _offset: usize, _data: &[u8]) -> Result<(), AbortCode> {
        Err(AbortCode::UnsupportedAccess)
    }

    /// Commit an open chunked write transaction
    fn end_write(&self, _sub: u8) -> Result<(), AbortCode> {
        Ok(())
    }

    /// Cancel an open chunked write transaction, releasing any resources
    fn abort_write(&self, _sub: u8) {}

    /// Read an UNSIGNED8 value
    fn read_u8(&self, sub: u8) -> Result<u8, AbortCode> {
        let mut buf = [0u8; 1];
        self.read(sub, 0, &mut buf)?;
        Ok(buf[0])
    }

    /// Read an UNSIGNED16 value
    fn read_u16(&self, sub: u8) -> Result<u16, AbortCode> {
        let mut buf = [0u8; 2];
        self.read(sub, 0, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read an UNSIGNED32 value
    fn read_u32(&self, sub: u8) -> Result<u32, AbortCode> {
        let mut buf = [0u8; 4];
        self.read(sub, 0, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// One row of the object dictionary table
#[allow(missing_debug_implementations)]
pub struct OdEntry<'a> {
    /// Object index
    pub index: u16,
    /// The object implementation
    pub data: &'a dyn ObjectAccess,
}

/// Find an object by index
pub fn find_object<'a>(od: &'a [OdEntry<'a>], index: u16) -> Option<&'a dyn ObjectAccess> {
    od.iter().find(|e| e.index == index).map(|e| e.data)
}

/// Find a dictionary entry by index
pub fn find_object_entry<'a>(od: &'a [OdEntry<'a>], index: u16) -> Option<&'a OdEntry<'a>> {
    od.iter().find(|e| e.index == index)
}

fn read_le_bytes(value: &[u8], offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
    if offset >= value.len() {
        return Ok(0);
    }
    let len = buf.len().min(value.len() - offset);
    buf[..len].copy_from_slice(&value[offset..offset + len]);
    Ok(len)
}

/// A constant VAR object
#[derive(Debug)]
pub struct ConstField<const N: usize> {
    data: [u8; N],
    data_type: DataType,
}

impl<const N: usize> ConstField<N> {
    /// Create a new constant field holding `data`
    pub const fn new(data: [u8; N], data_type: DataType) -> Self {
        Self { data, data_type }
    }
}

impl<const N: usize> ObjectAccess for ConstField<N> {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Var
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        Ok(SubInfo {
            size: N,
            data_type: self.data_type,
            access_type: AccessType::Const,
            ..Default::default()
        })
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        read_le_bytes(&self.data, offset, buf)
    }

    fn write(&self, sub: u8, _data: &[u8]) -> Result<(), AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        Err(AbortCode::ReadOnly)
    }
}

/// A mutable VAR object holding an `N`-byte little-endian value
#[allow(missing_debug_implementations)]
pub struct VarField<const N: usize> {
    value: AtomicCell<[u8; N]>,
    info: SubInfo,
}

impl<const N: usize> VarField<N> {
    /// Create a new field with an initial value and sub-object metadata
    ///
    /// `info.size` is forced to `N`.
    pub const fn new(initial: [u8; N], mut info: SubInfo) -> Self {
        info.size = N;
        Self {
            value: AtomicCell::new(initial),
            info,
        }
    }

    /// Raw little-endian value bytes
    pub fn get_bytes(&self) -> [u8; N] {
        self.value.load()
    }

    /// Store raw little-endian value bytes
    pub fn set_bytes(&self, value: [u8; N]) {
        self.value.store(value)
    }
}

impl VarField<1> {
    /// Current value
    pub fn get_u8(&self) -> u8 {
        self.get_bytes()[0]
    }

    /// Store a value
    pub fn set_u8(&self, value: u8) {
        self.set_bytes([value])
    }
}

impl VarField<2> {
    /// Current value
    pub fn get_u16(&self) -> u16 {
        u16::from_le_bytes(self.get_bytes())
    }

    /// Store a value
    pub fn set_u16(&self, value: u16) {
        self.set_bytes(value.to_le_bytes())
    }
}

impl VarField<4> {
    /// Current value
    pub fn get_u32(&self) -> u32 {
        u32::from_le_bytes(self.get_bytes())
    }

    /// Store a value
    pub fn set_u32(&self, value: u32) {
        self.set_bytes(value.to_le_bytes())
    }
}

impl VarField<8> {
    /// Current value
    pub fn get_u64(&self) -> u64 {
        u64::from_le_bytes(self.get_bytes())
    }

    /// Store a value
    pub fn set_u64(&self, value: u64) {
        self.set_bytes(value.to_le_bytes())
    }
}

impl<const N: usize> ObjectAccess for VarField<N> {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Var
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        Ok(self.info)
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        let info = self.sub_info(sub)?;
        if !info.access_type.is_readable() {
            return Err(AbortCode::WriteOnly);
        }
        read_le_bytes(&self.value.load(), offset, buf)
    }

    fn write(&self, sub: u8, data: &[u8]) -> Result<(), AbortCode> {
        let info = self.sub_info(sub)?;
        if !info.access_type.is_writable() {
            return Err(AbortCode::ReadOnly);
        }
        info.validate_write_size(data.len())?;
        let mut value = [0u8; N];
        value[..data.len()].copy_from_slice(data);
        self.value.store(value);
        Ok(())
    }

    fn write_chunk(&self, sub: u8, offset: usize, data: &[u8]) -> Result<(), AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        if offset + data.len() > N {
            return Err(AbortCode::DataTypeMismatchLengthHigh);
        }
        let mut value = self.value.load();
        value[offset..offset + data.len()].copy_from_slice(data);
        self.value.store(value);
        Ok(())
    }
}

/// A VAR object holding up to `N` bytes of string or domain data
///
/// Supports chunked writes at arbitrary offsets. The readable length is only
/// updated when a write transaction commits, so a read between chunks
/// observes the previous length.
#[allow(missing_debug_implementations)]
pub struct ByteField<const N: usize> {
    data: Mutex<RefCell<[u8; N]>>,
    len: AtomicUsize,
    pending_len: AtomicUsize,
    data_type: DataType,
}

impl<const N: usize> ByteField<N> {
    /// Create a new field with initial contents
    pub const fn new(initial: [u8; N], data_type: DataType) -> Self {
        Self {
            data: Mutex::new(RefCell::new(initial)),
            len: AtomicUsize::new(N),
            pending_len: AtomicUsize::new(0),
            data_type,
        }
    }

    /// Capacity in bytes
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> ObjectAccess for ByteField<N> {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Var
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        Ok(SubInfo {
            size: N,
            data_type: self.data_type,
            access_type: AccessType::Rw,
            ..Default::default()
        })
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        let len = self.len.load(Ordering::Relaxed);
        critical_section::with(|cs| {
            let data = self.data.borrow_ref(cs);
            read_le_bytes(&data[..len], offset, buf)
        })
    }

    fn read_size(&self, sub: u8) -> Result<usize, AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        Ok(self.len.load(Ordering::Relaxed))
    }

    fn write(&self, sub: u8, data: &[u8]) -> Result<(), AbortCode> {
        let info = self.sub_info(sub)?;
        info.validate_write_size(data.len())?;
        critical_section::with(|cs| {
            let mut storage = self.data.borrow_ref_mut(cs);
            storage[..data.len()].copy_from_slice(data);
        });
        self.len.store(data.len(), Ordering::Relaxed);
        Ok(())
    }

    fn begin_write(&self, sub: u8, declared_size: Option<usize>) -> Result<(), AbortCode> {
        let info = self.sub_info(sub)?;
        if let Some(size) = declared_size {
            info.validate_write_size(size)?;
        }
        self.pending_len.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn write_chunk(&self, sub: u8, offset: usize, data: &[u8]) -> Result<(), AbortCode> {
        if sub != 0 {
            return Err(AbortCode::NoSuchSubIndex);
        }
        if offset + data.len() > N {
            return Err(AbortCode::DataTypeMismatchLengthHigh);
        }
        critical_section::with(|cs| {
            let mut storage = self.data.borrow_ref_mut(cs);
            storage[offset..offset + data.len()].copy_from_slice(data);
        });
        self.pending_len
            .fetch_max(offset + data.len(), Ordering::Relaxed);
        Ok(())
    }

    fn end_write(&self, _sub: u8) -> Result<(), AbortCode> {
        self.len
            .store(self.pending_len.load(Ordering::Relaxed), Ordering::Relaxed);
        Ok(())
    }

    fn abort_write(&self, _sub: u8) {
        self.pending_len.store(0, Ordering::Relaxed);
    }
}

/// The standard identity object (0x1018)
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub struct IdentityObject {
    vendor_id: AtomicCell<u32>,
    product_code: AtomicCell<u32>,
    revision: AtomicCell<u32>,
    serial: AtomicCell<u32>,
}

impl IdentityObject {
    /// Create a new identity object
    pub const fn new(vendor_id: u32, product_code: u32, revision: u32) -> Self {
        Self {
            vendor_id: AtomicCell::new(vendor_id),
            product_code: AtomicCell::new(product_code),
            revision: AtomicCell::new(revision),
            serial: AtomicCell::new(0),
        }
    }

    /// Set the serial number, usually from a hardware unique-ID register
    pub fn set_serial(&self, serial: u32) {
        self.serial.store(serial);
    }
}

impl ObjectAccess for IdentityObject {
    fn object_code(&self) -> ObjectCode {
        ObjectCode::Record
    }

    fn max_sub_number(&self) -> u8 {
        4
    }

    fn sub_info(&self, sub: u8) -> Result<SubInfo, AbortCode> {
        match sub {
            0 => Ok(SubInfo::MAX_SUB_NUMBER),
            1..=4 => Ok(SubInfo::new_u32()),
            _ => Err(AbortCode::NoSuchSubIndex),
        }
    }

    fn read(&self, sub: u8, offset: usize, buf: &mut [u8]) -> Result<usize, AbortCode> {
        let value: u32 = match sub {
            0 => return read_le_bytes(&[4u8], offset, buf),
            1 => self.vendor_id.load(),
            2 => self.product_code.load(),
            3 => self.revision.load(),
            4 => self.serial.load(),
            _ => return Err(AbortCode::NoSuchSubIndex),
        };
        read_le_bytes(&value.to_le_bytes(), offset, buf)
    }

    fn write(&self, sub: u8, _data: &[u8]) -> Result<(), AbortCode> {
        self.sub_info(sub)?;
        Err(AbortCode::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_field_round_trip() {
        let field = VarField::new(0u32.to_le_bytes(), SubInfo::new_u32().rw_access());
        field.write(0, &0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        assert_eq!(0xDEAD_BEEF, field.get_u32());
        assert_eq!(0xDEAD_BEEF, field.read_u32(0).unwrap());
        assert_eq!(Err(AbortCode::NoSuchSubIndex), field.read_u32(1));
    }

    #[test]
    fn test_var_field_size_validation() {
        let field = VarField::new([0u8; 2], SubInfo::new_u16().rw_access());
        assert_eq!(
            Err(AbortCode::DataTypeMismatchLengthLow),
            field.write(0, &[1])
        );
        assert_eq!(
            Err(AbortCode::DataTypeMismatchLengthHigh),
            field.write(0, &[1, 2, 3])
        );
    }

    #[test]
    fn test_const_field_rejects_writes() {
        let field = ConstField::new(7u8.to_le_bytes(), DataType::UInt8);
        assert_eq!(Err(AbortCode::ReadOnly), field.write(0, &[0]));
        assert_eq!(7, field.read_u8(0).unwrap());
    }

    #[test]
    fn test_byte_field_chunked_write_commits_on_end() {
        let field: ByteField<16> = ByteField::new([0; 16], DataType::OctetString);
        field.write(0, b"abc").unwrap();
        assert_eq!(3, field.read_size(0).unwrap());

        field.begin_write(0, Some(10)).unwrap();
        field.write_chunk(0, 0, b"01234").unwrap();
        // Length not visible until commit
        assert_eq!(3, field.read_size(0).unwrap());
        field.write_chunk(0, 5, b"56789").unwrap();
        field.end_write(0).unwrap();
        assert_eq!(10, field.read_size(0).unwrap());

        let mut buf = [0u8; 10];
        assert_eq!(10, field.read(0, 0, &mut buf).unwrap());
        assert_eq!(b"0123456789", &buf);
    }

    #[test]
    fn test_identity_object() {
        let identity = IdentityObject::new(0xCAFE, 2, 3);
        identity.set_serial(99);
        assert_eq!(4, identity.read_u8(0).unwrap());
        assert_eq!(0xCAFE, identity.read_u32(1).unwrap());
        assert_eq!(99, identity.read_u32(4).unwrap());
        assert_eq!(Err(AbortCode::ReadOnly), identity.write(2, &[0; 4]));
    }
}
