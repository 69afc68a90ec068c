//! A hand-assembled object dictionary for the integration tests
//!
//! Mirrors what firmware would declare statically: identity objects, the
//! PDO assignment and mapping objects wired to the shared state, and a few
//! application objects covering the access classes the tests exercise.

use drivecat_common::constants::object_ids;
use drivecat_common::objects::{
    ByteField, ConstField, DataType, IdentityObject, OdEntry, SubInfo, VarField,
};
use drivecat_slave::pdo::{PdoAssignObject, PdoMappingObject};
use drivecat_slave::{EmcyQueue, SlaveState};

/// Index of the large octet string object used for segmented transfers
pub const BLOB_INDEX: u16 = 0x2000;
/// Index of the control word object (rx mappable, 2 bytes)
pub const CONTROL_WORD_INDEX: u16 = 0x6040;
/// Index of the status word object (tx mappable, 2 bytes)
pub const STATUS_WORD_INDEX: u16 = 0x6041;
/// Index of the target position object (rx mappable, 4 bytes)
pub const TARGET_INDEX: u16 = 0x607A;
/// Index of the actual position object (tx mappable, 4 bytes)
pub const POSITION_INDEX: u16 = 0x6064;

/// Everything a test needs, freshly leaked so tests stay independent
pub struct TestBench {
    pub state: &'static SlaveState,
    pub emcy: &'static EmcyQueue,
    pub od: &'static [OdEntry<'static>],
    pub control_word: &'static VarField<2>,
    pub status_word: &'static VarField<2>,
    pub target: &'static VarField<4>,
    pub position: &'static VarField<4>,
    pub blob: &'static ByteField<64>,
}

pub fn bench() -> TestBench {
    let state: &'static SlaveState = Box::leak(Box::new(SlaveState::new()));
    let emcy: &'static EmcyQueue = Box::leak(Box::new(EmcyQueue::new()));

    let device_type = Box::leak(Box::new(ConstField::new(
        0x0000_1389u32.to_le_bytes(),
        DataType::UInt32,
    )));
    let device_name = Box::leak(Box::new(ConstField::new(
        *b"drivecat test axis",
        DataType::VisibleString,
    )));
    let identity = Box::leak(Box::new(IdentityObject::new(0xCA7, 0x2000, 1)));
    identity.set_serial(0x1234_5678);

    let rx_assign = Box::leak(Box::new(PdoAssignObject::new(state.rx_mapping_table())));
    let tx_assign = Box::leak(Box::new(PdoAssignObject::new(state.tx_mapping_table())));
    let rx_map0 = Box::leak(Box::new(PdoMappingObject::new(state.rx_mapping_table(), 0)));
    let tx_map0 = Box::leak(Box::new(PdoMappingObject::new(state.tx_mapping_table(), 0)));

    let control_word = Box::leak(Box::new(VarField::new(
        [0u8; 2],
        SubInfo::new_u16().rw_access().mappable(),
    )));
    let status_word = Box::leak(Box::new(VarField::new(
        [0u8; 2],
        SubInfo::new_u16().mappable(),
    )));
    let target = Box::leak(Box::new(VarField::new(
        [0u8; 4],
        SubInfo::new_u32().rw_access().mappable(),
    )));
    let position = Box::leak(Box::new(VarField::new(
        [0u8; 4],
        SubInfo::new_u32().mappable(),
    )));
    let blob: &'static ByteField<64> =
        Box::leak(Box::new(ByteField::new([0; 64], DataType::OctetString)));

    let od: &'static [OdEntry<'static>] = Box::leak(Box::new([
        OdEntry {
            index: object_ids::DEVICE_TYPE,
            data: device_type,
        },
        OdEntry {
            index: object_ids::DEVICE_NAME,
            data: device_name,
        },
        OdEntry {
            index: object_ids::IDENTITY,
            data: identity,
        },
        OdEntry {
            index: object_ids::RXPDO_MAP_BASE,
            data: rx_map0,
        },
        OdEntry {
            index: object_ids::TXPDO_MAP_BASE,
            data: tx_map0,
        },
        OdEntry {
            index: object_ids::RXPDO_ASSIGN,
            data: rx_assign,
        },
        OdEntry {
            index: object_ids::TXPDO_ASSIGN,
            data: tx_assign,
        },
        OdEntry {
            index: BLOB_INDEX,
            data: blob,
        },
        OdEntry {
            index: CONTROL_WORD_INDEX,
            data: control_word,
        },
        OdEntry {
            index: STATUS_WORD_INDEX,
            data: status_word,
        },
        OdEntry {
            index: TARGET_INDEX,
            data: target,
        },
        OdEntry {
            index: POSITION_INDEX,
            data: position,
        },
    ]));

    TestBench {
        state,
        emcy,
        od,
        control_word,
        status_word,
        target,
        position,
        blob,
    }
}
