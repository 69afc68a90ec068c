//! Cyclic encode/decode of the compiled process data image
//!
//! These routines run inside the hard-deadline cycle. They never allocate or
//! block; object accesses go through the short bounded critical sections of
//! the dictionary's atomic storage.

use drivecat_common::constants::{al_events, registers};
use drivecat_common::traits::EscRegisters;

use crate::config::SlaveConfig;
use crate::pdo::{PdoDirection, PdoImage, PdoTableDescriptor, MAX_PROCESS_DATA_BYTES};
use crate::slave_state::{RtFault, SlaveStateAccess};

/// Decode received output data into the mapped objects
///
/// Entries are processed in compiled order. A conversion or store failure
/// aborts the whole pass; the caller reports the fault and does not retry.
pub fn decode_outputs(
    image: &PdoImage,
    descriptor: &PdoTableDescriptor,
    data: &[u8],
) -> Result<(), RtFault> {
    for i in 0..descriptor.rx_count as usize {
        let Some(entry) = image.entry(descriptor.bank, PdoDirection::Rx, i) else {
            continue;
        };
        let width = entry.selector.width();
        let offset = entry.offset as usize;

        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&data[offset..offset + width]);
        let mut value = u64::from_le_bytes(raw);

        if entry.selector.converted() {
            if let Some(converter) = entry.converter {
                value = converter.from_wire(value).map_err(|_| RtFault::Conversion {
                    index: entry.index,
                    sub: entry.sub,
                })?;
            }
        }

        let bytes = value.to_le_bytes();
        entry
            .object
            .write(entry.sub, &bytes[..width])
            .map_err(|_| RtFault::ObjectAccess {
                index: entry.index,
                sub: entry.sub,
            })?;
    }
    Ok(())
}

/// Encode the mapped objects into the input data image
pub fn encode_inputs(
    image: &PdoImage,
    descriptor: &PdoTableDescriptor,
    data: &mut [u8],
) -> Result<(), RtFault> {
    for i in 0..descriptor.tx_count as usize {
        let Some(entry) = image.entry(descriptor.bank, PdoDirection::Tx, i) else {
            continue;
        };
        let width = entry.selector.width();
        let offset = entry.offset as usize;

        let mut raw = [0u8; 8];
        entry
            .object
            .read(entry.sub, 0, &mut raw[..width])
            .map_err(|_| RtFault::ObjectAccess {
                index: entry.index,
                sub: entry.sub,
            })?;
        let mut value = u64::from_le_bytes(raw);

        if entry.selector.converted() {
            if let Some(converter) = entry.converter {
                value = converter.to_wire(value).map_err(|_| RtFault::Conversion {
                    index: entry.index,
                    sub: entry.sub,
                })?;
            }
        }

        data[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }
    Ok(())
}

/// The cyclic-task entry point
///
/// Instantiated by the application next to its real-time loop and invoked
/// once per cycle. Everything it shares with the management loop goes through
/// [`SlaveStateAccess`]; faults are latched there and acted on by the state
/// machine, never here.
#[allow(missing_debug_implementations)]
pub struct CyclicTask<'a> {
    state: &'a dyn SlaveStateAccess,
    out_address: u16,
    in_address: u16,
    buf: [u8; MAX_PROCESS_DATA_BYTES],
}

impl<'a> CyclicTask<'a> {
    /// Create a new cyclic task
    pub fn new(state: &'a dyn SlaveStateAccess, config: &SlaveConfig) -> Self {
        Self {
            state,
            out_address: config.pd_out_address,
            in_address: config.pd_in_address,
            buf: [0; MAX_PROCESS_DATA_BYTES],
        }
    }

    /// Run one cyclic exchange
    ///
    /// Returns true if any process data was exchanged. Fresh output data
    /// feeds the watchdog; a conversion or access fault suspends exchange by
    /// latching the fault for the management loop.
    pub fn exchange(&mut self, esc: &mut dyn EscRegisters) -> bool {
        let image = self.state.pdo_image();
        let descriptor = image.descriptor();
        if !descriptor.valid {
            return false;
        }

        let mut exchanged = false;

        if self.state.outputs_active() && descriptor.rx_bytes > 0 {
            let fresh =
                esc.read_u32(registers::AL_EVENT_REQUEST) & al_events::SM2 != 0;
            let len = descriptor.rx_bytes as usize;
            esc.read(self.out_address, &mut self.buf[..len]);
            match decode_outputs(image, &descriptor, &self.buf[..len]) {
                Ok(()) => {
                    if fresh {
                        self.state.feed_watchdog();
                    }
                    exchanged = true;
                }
                Err(fault) => {
                    self.state.raise_rt_fault(fault);
                    return false;
                }
            }
        }

        if self.state.inputs_active() && descriptor.tx_bytes > 0 {
            let len = descriptor.tx_bytes as usize;
            self.buf[..len].fill(0);
            match encode_inputs(image, &descriptor, &mut self.buf[..len]) {
                Ok(()) => {
                    esc.write(self.in_address, &self.buf[..len]);
                    exchanged = true;
                }
                Err(fault) => {
                    self.state.raise_rt_fault(fault);
                    return false;
                }
            }
        }

        exchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivecat_common::constants::object_ids;
    use drivecat_common::objects::{OdEntry, SubInfo, VarField};
    use drivecat_common::pdo::{ConversionFault, PdoMapValue, UnitConvert};

    use crate::pdo::compiler::compile_mappings;
    use crate::slave_state::SlaveState;

    struct Doubler;
    impl UnitConvert for Doubler {
        fn from_wire(&self, value: u64) -> Result<u64, ConversionFault> {
            value.checked_mul(2).ok_or(ConversionFault)
        }

        fn to_wire(&self, value: u64) -> Result<u64, ConversionFault> {
            Ok(value / 2)
        }
    }

    struct Refuser;
    impl UnitConvert for Refuser {
        fn from_wire(&self, _value: u64) -> Result<u64, ConversionFault> {
            Err(ConversionFault)
        }

        fn to_wire(&self, _value: u64) -> Result<u64, ConversionFault> {
            Err(ConversionFault)
        }
    }

    fn configure(
        state: &SlaveState,
        direction: PdoDirection,
        entries: &[PdoMapValue],
    ) {
        let (table, base) = match direction {
            PdoDirection::Rx => (state.rx_mapping(), object_ids::RXPDO_MAP_BASE),
            PdoDirection::Tx => (state.tx_mapping(), object_ids::TXPDO_MAP_BASE),
        };
        table.init_defaults();
        table.assigned[0].store(base);
        table.assign_count.store(1);
        for (i, e) in entries.iter().enumerate() {
            table.entries[0][i].store(e.to_raw());
        }
        table.entry_counts[0].store(entries.len() as u8);
    }

    /// Round trip across every supported width, aligned and unaligned
    #[test]
    fn test_round_trip_all_selector_widths() {
        let state = Box::leak(Box::new(SlaveState::new()));
        // Layout: u8 @0, u16 @1 (odd), u32 @3 (odd), u64 @7, u16 @15 (odd),
        // u32 @17 (odd), 21 bytes total, covering every alignment class
        let objects: [(u16, &'static dyn drivecat_common::objects::ObjectAccess, u8); 6] = [
            (0x2000, Box::leak(Box::new(VarField::new([0u8; 1], SubInfo::new_u8().rw_access().mappable()))), 8),
            (0x2001, Box::leak(Box::new(VarField::new([0u8; 2], SubInfo::new_u16().rw_access().mappable()))), 16),
            (0x2002, Box::leak(Box::new(VarField::new([0u8; 4], SubInfo::new_u32().rw_access().mappable()))), 32),
            (0x2003, Box::leak(Box::new(VarField::new([0u8; 8], SubInfo::new_u64().rw_access().mappable()))), 64),
            (0x2004, Box::leak(Box::new(VarField::new([0u8; 2], SubInfo::new_u16().rw_access().mappable()))), 16),
            (0x2005, Box::leak(Box::new(VarField::new([0u8; 4], SubInfo::new_u32().rw_access().mappable()))), 32),
        ];
        let od: Vec<OdEntry> = objects
            .iter()
            .map(|(index, data, _)| OdEntry { index: *index, data: *data })
            .collect();
        let od: &'static [OdEntry] = Box::leak(od.into_boxed_slice());

        let mappings: Vec<PdoMapValue> = objects
            .iter()
            .map(|(index, _, bits)| PdoMapValue {
                index: *index,
                sub: 0,
                bit_length: *bits,
            })
            .collect();
        configure(state, PdoDirection::Rx, &mappings);
        configure(state, PdoDirection::Tx, &mappings);

        let desc = compile_mappings(state, od, &SlaveConfig::default()).unwrap();
        assert_eq!(21, desc.rx_bytes);
        assert_eq!(21, desc.tx_bytes);

        let source: Vec<u8> = (0u8..21).map(|x| x.wrapping_mul(7).wrapping_add(3)).collect();
        decode_outputs(state.pdo_image(), &desc, &source).unwrap();

        let mut encoded = [0u8; 21];
        encode_inputs(state.pdo_image(), &desc, &mut encoded).unwrap();
        assert_eq!(source.as_slice(), &encoded);
    }

    #[test]
    fn test_conversion_applied_both_directions() {
        let state = Box::leak(Box::new(SlaveState::new()));
        let field = Box::leak(Box::new(VarField::new(
            [0u8; 2],
            SubInfo::new_u16()
                .rw_access()
                .mappable()
                .with_converter(&Doubler),
        )));
        let od: &'static [OdEntry] = Box::leak(Box::new([OdEntry {
            index: 0x2000,
            data: field,
        }]));
        let mapping = [PdoMapValue {
            index: 0x2000,
            sub: 0,
            bit_length: 16,
        }];
        configure(state, PdoDirection::Rx, &mapping);
        configure(state, PdoDirection::Tx, &mapping);
        let desc = compile_mappings(state, od, &SlaveConfig::default()).unwrap();

        decode_outputs(state.pdo_image(), &desc, &100u16.to_le_bytes()).unwrap();
        assert_eq!(200, field.get_u16());

        let mut encoded = [0u8; 2];
        encode_inputs(state.pdo_image(), &desc, &mut encoded).unwrap();
        assert_eq!(100u16.to_le_bytes(), encoded);
    }

    #[test]
    fn test_conversion_failure_aborts_decode() {
        let state = Box::leak(Box::new(SlaveState::new()));
        let refused = Box::leak(Box::new(VarField::new(
            [0u8; 1],
            SubInfo::new_u8()
                .rw_access()
                .mappable()
                .with_converter(&Refuser),
        )));
        let untouched = Box::leak(Box::new(VarField::new(
            [0u8; 1],
            SubInfo::new_u8().rw_access().mappable(),
        )));
        let od: &'static [OdEntry] = Box::leak(Box::new([
            OdEntry {
                index: 0x2000,
                data: refused,
            },
            OdEntry {
                index: 0x2001,
                data: untouched,
            },
        ]));
        configure(
            state,
            PdoDirection::Rx,
            &[
                PdoMapValue {
                    index: 0x2000,
                    sub: 0,
                    bit_length: 8,
                },
                PdoMapValue {
                    index: 0x2001,
                    sub: 0,
                    bit_length: 8,
                },
            ],
        );
        let desc = compile_mappings(state, od, &SlaveConfig::default()).unwrap();

        let err = decode_outputs(state.pdo_image(), &desc, &[5, 9]).unwrap_err();
        assert_eq!(
            RtFault::Conversion {
                index: 0x2000,
                sub: 0
            },
            err
        );
        // The failing entry aborted the pass before the second entry
        assert_eq!(0, untouched.get_u8());
    }
}
