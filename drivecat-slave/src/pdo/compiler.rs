//! Translates the master's mapping configuration into compiled fast entries

use defmt_or_log::debug;

use drivecat_common::coe::AbortCode;
use drivecat_common::objects::{find_object_entry, ObjectCode, OdEntry};
use drivecat_common::pdo::PdoMapValue;

use crate::config::SlaveConfig;
use crate::pdo::{
    AccessSelector, PdoDirection, PdoFastEntry, PdoImage, PdoMappingTable, PdoTableDescriptor,
    MAX_PDO_OBJECTS, MAX_PROCESS_DATA_BYTES,
};
use crate::slave_state::SlaveStateAccess;

/// A failed compile: which direction failed and why
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompileError {
    /// Direction whose mapping was refused
    pub direction: PdoDirection,
    /// Reason, as the abort code the master would see on an equivalent SDO
    /// access
    pub code: AbortCode,
}

impl CompileError {
    /// The AL status code to publish when refusing the transition
    pub fn status_code(&self) -> drivecat_common::AlStatusCode {
        match self.direction {
            PdoDirection::Rx => drivecat_common::AlStatusCode::InvalidOutputMapping,
            PdoDirection::Tx => drivecat_common::AlStatusCode::InvalidInputMapping,
        }
    }
}

/// Compile both directions of the mapping configuration
///
/// Runs fully for both directions before anything is accepted. On success the
/// new table is published with a single descriptor swap and the descriptor is
/// returned. On failure the previous mapping is invalidated, so a master
/// which half-reconfigures a mapping cannot keep exchanging against stale
/// entries.
pub fn compile_mappings(
    state: &dyn SlaveStateAccess,
    od: &'static [OdEntry<'static>],
    config: &SlaveConfig,
) -> Result<PdoTableDescriptor, CompileError> {
    let image = state.pdo_image();
    let bank = image.inactive_bank();

    let rx_capacity = (config.max_output_bytes as usize).min(MAX_PROCESS_DATA_BYTES);
    let tx_capacity = (config.max_input_bytes as usize).min(MAX_PROCESS_DATA_BYTES);

    let (rx_count, rx_bytes) = compile_direction(state.rx_mapping(), image, bank, od, rx_capacity)
        .map_err(|code| {
            image.invalidate();
            CompileError {
                direction: PdoDirection::Rx,
                code,
            }
        })?;
    let (tx_count, tx_bytes) = compile_direction(state.tx_mapping(), image, bank, od, tx_capacity)
        .map_err(|code| {
            image.invalidate();
            CompileError {
                direction: PdoDirection::Tx,
                code,
            }
        })?;

    let descriptor = PdoTableDescriptor {
        bank,
        rx_count,
        tx_count,
        rx_bytes,
        tx_bytes,
        valid: true,
    };
    image.publish(descriptor);
    debug!(
        "Compiled PDO mapping: {} rx entries ({} bytes), {} tx entries ({} bytes)",
        rx_count, rx_bytes, tx_count, tx_bytes
    );
    Ok(descriptor)
}

fn compile_direction(
    table: &PdoMappingTable,
    image: &PdoImage,
    bank: u8,
    od: &'static [OdEntry<'static>],
    capacity: usize,
) -> Result<(u8, u16), AbortCode> {
    let direction = table.direction();
    let base = table.map_base();
    let mut offset = 0usize;
    let mut count = 0usize;

    for n in 0..table.assign_count() {
        let map_index = table.assigned(n);
        let slot = map_index.wrapping_sub(base) as usize;
        if slot >= MAX_PDO_OBJECTS {
            return Err(AbortCode::NoSuchObject);
        }
        for e in 0..table.entry_count(slot) {
            let value = PdoMapValue::from_raw(table.entry(slot, e));

            let od_entry = find_object_entry(od, value.index).ok_or(AbortCode::NoSuchObject)?;
            let info = od_entry.data.sub_info(value.sub)?;

            if od_entry.data.object_code() == ObjectCode::Array && value.sub == 0 {
                return Err(AbortCode::NotMappable);
            }
            if !info.pdo_mappable {
                return Err(AbortCode::NotMappable);
            }
            let access_ok = match direction {
                PdoDirection::Rx => info.access_type.is_writable(),
                PdoDirection::Tx => info.access_type.is_readable(),
            };
            if !access_ok {
                return Err(AbortCode::UnsupportedAccess);
            }

            if value.bit_length % 8 != 0 {
                return Err(AbortCode::NotMappable);
            }
            let width = (value.bit_length / 8) as usize;
            if info.size != width {
                return Err(AbortCode::DataTypeMismatch);
            }
            // Selector classification tracks the running offset: alignment is
            // a property of everything mapped before this entry
            let selector = AccessSelector::classify(width, offset, info.converter.is_some())
                .ok_or(AbortCode::NotMappable)?;

            if offset + width > capacity {
                return Err(AbortCode::PdoLengthExceeded);
            }

            image.stage_entry(
                bank,
                direction,
                count,
                PdoFastEntry {
                    object: od_entry.data,
                    index: value.index,
                    sub: value.sub,
                    offset: offset as u16,
                    selector,
                    converter: info.converter,
                },
            );
            count += 1;
            offset += width;
        }
    }

    Ok((count as u8, offset as u16))
}
