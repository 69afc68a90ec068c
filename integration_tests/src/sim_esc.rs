//! An in-memory EtherCAT Slave Controller
//!
//! Emulates the register space and sync manager behavior the stack relies
//! on: mailbox full/empty status driven by reads and writes of the managed
//! areas, the AL control event, and the repeat request toggle. The master
//! side of the wire is driven directly through the `master_*` methods.

use drivecat_common::al::{AlStatus, AlStatusCode};
use drivecat_common::constants::{al_events, registers};
use drivecat_common::sync_manager::{SmChannel, SmConfig};
use drivecat_common::traits::EscRegisters;

const MEM_SIZE: usize = 0x4000;

pub struct SimEsc {
    mem: Vec<u8>,
    pdi_disabled: [bool; 4],
}

impl Default for SimEsc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEsc {
    pub fn new() -> Self {
        Self {
            mem: vec![0; MEM_SIZE],
            pdi_disabled: [false; 4],
        }
    }

    fn events(&self) -> u32 {
        let a = registers::AL_EVENT_REQUEST as usize;
        u32::from_le_bytes(self.mem[a..a + 4].try_into().unwrap())
    }

    fn set_events(&mut self, value: u32) {
        let a = registers::AL_EVENT_REQUEST as usize;
        self.mem[a..a + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn raise_event(&mut self, bit: u32) {
        let events = self.events();
        self.set_events(events | bit);
    }

    fn clear_event(&mut self, bit: u32) {
        let events = self.events();
        self.set_events(events & !bit);
    }

    fn sm_block(&self, channel: SmChannel) -> SmConfig {
        let a = channel.register_address() as usize;
        SmConfig::from_bytes(&self.mem[a..a + 8].try_into().unwrap())
    }

    fn set_sm_status(&mut self, channel: SmChannel, full: bool) {
        let a = channel.register_address() as usize + 5;
        if full {
            self.mem[a] |= 0x08;
        } else {
            self.mem[a] &= !0x08;
        }
    }

    /// Master configures a sync manager channel
    pub fn configure_sm(&mut self, channel: SmChannel, config: SmConfig) {
        let a = channel.register_address() as usize;
        self.mem[a..a + 8].copy_from_slice(&config.to_bytes());
    }

    /// Master configures the process data watchdog registers
    pub fn set_watchdog(&mut self, divider: u16, value: u16) {
        let a = registers::WATCHDOG_DIVIDER as usize;
        self.mem[a..a + 2].copy_from_slice(&divider.to_le_bytes());
        let a = registers::WATCHDOG_PROCESS_DATA as usize;
        self.mem[a..a + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Master writes the AL control register
    pub fn master_write_al_control(&mut self, value: u8) {
        self.mem[registers::AL_CONTROL as usize] = value;
        self.raise_event(al_events::AL_CONTROL);
    }

    /// The published AL status register value
    pub fn al_status(&self) -> u8 {
        self.mem[registers::AL_STATUS as usize]
    }

    /// The published AL status code register value
    pub fn al_status_code(&self) -> u16 {
        let a = registers::AL_STATUS_CODE as usize;
        u16::from_le_bytes([self.mem[a], self.mem[a + 1]])
    }

    /// Master stores a frame into the write mailbox
    ///
    /// Returns false if the mailbox is still full or the channel is disabled
    /// from the slave side.
    pub fn master_write_mailbox(&mut self, frame: &[u8]) -> bool {
        let sm = self.sm_block(SmChannel::MailboxOut);
        if sm.mailbox_full() || self.pdi_disabled[SmChannel::MailboxOut as usize] {
            return false;
        }
        let a = sm.start_address as usize;
        let len = sm.length as usize;
        assert!(frame.len() <= len, "frame exceeds the mailbox area");
        self.mem[a..a + len].fill(0);
        self.mem[a..a + frame.len()].copy_from_slice(frame);
        self.set_sm_status(SmChannel::MailboxOut, true);
        self.raise_event(al_events::SM0);
        true
    }

    /// Master fetches the frame from the read mailbox, if one is present
    pub fn master_read_mailbox(&mut self) -> Option<Vec<u8>> {
        let sm = self.sm_block(SmChannel::MailboxIn);
        if !sm.mailbox_full() || self.pdi_disabled[SmChannel::MailboxIn as usize] {
            return None;
        }
        let a = sm.start_address as usize;
        let frame = self.mem[a..a + sm.length as usize].to_vec();
        self.set_sm_status(SmChannel::MailboxIn, false);
        self.raise_event(al_events::SM1);
        Some(frame)
    }

    /// Master toggles the mailbox repeat request bit
    pub fn master_request_repeat(&mut self) {
        let a = SmChannel::MailboxIn.register_address() as usize + 6;
        self.mem[a] ^= 0x02;
    }

    /// True once the slave has mirrored the repeat toggle into the PDI
    /// control byte
    pub fn repeat_acknowledged(&mut self) -> bool {
        let block = SmChannel::MailboxIn.register_address() as usize;
        let requested = self.mem[block + 6] & 0x02;
        let acked = self.mem[block + 7] & 0x02;
        requested == acked
    }

    /// Master writes the cyclic output process data
    pub fn master_write_outputs(&mut self, data: &[u8]) {
        let sm = self.sm_block(SmChannel::ProcessDataOut);
        let a = sm.start_address as usize;
        self.mem[a..a + data.len()].copy_from_slice(data);
        self.raise_event(al_events::SM2);
    }

    /// Master reads the cyclic input process data
    pub fn master_read_inputs(&mut self, len: usize) -> Vec<u8> {
        let sm = self.sm_block(SmChannel::ProcessDataIn);
        let a = sm.start_address as usize;
        self.mem[a..a + len].to_vec()
    }

    /// Is the channel deactivated from the slave side?
    pub fn sm_pdi_disabled(&self, channel: SmChannel) -> bool {
        self.pdi_disabled[channel as usize]
    }
}

impl EscRegisters for SimEsc {
    fn read(&mut self, address: u16, buf: &mut [u8]) {
        let a = address as usize;
        buf.copy_from_slice(&self.mem[a..a + buf.len()]);

        // Reading the AL control register acknowledges its event
        if address == registers::AL_CONTROL {
            self.clear_event(al_events::AL_CONTROL);
        }
        // Reading through the end of the write mailbox area empties it
        let sm = self.sm_block(SmChannel::MailboxOut);
        if sm.length > 0 {
            let last = sm.start_address as usize + sm.length as usize - 1;
            if a <= last && a + buf.len() > last {
                self.set_sm_status(SmChannel::MailboxOut, false);
                self.clear_event(al_events::SM0);
            }
        }
        // Reading the start of the output area consumes the outputs event
        let sm = self.sm_block(SmChannel::ProcessDataOut);
        if sm.length > 0 && a == sm.start_address as usize {
            self.clear_event(al_events::SM2);
        }
    }

    fn write(&mut self, address: u16, data: &[u8]) {
        let a = address as usize;
        self.mem[a..a + data.len()].copy_from_slice(data);

        // Writing through the end of the read mailbox area fills it
        let sm = self.sm_block(SmChannel::MailboxIn);
        if sm.length > 0 {
            let last = sm.start_address as usize + sm.length as usize - 1;
            if a <= last && a + data.len() > last {
                self.set_sm_status(SmChannel::MailboxIn, true);
            }
        }
    }

    fn enable_sm(&mut self, channel: SmChannel) {
        self.pdi_disabled[channel as usize] = false;
    }

    fn disable_sm(&mut self, channel: SmChannel) {
        self.pdi_disabled[channel as usize] = true;
        // Deactivating a channel evicts whatever sits in its buffer
        if channel == SmChannel::MailboxIn {
            self.set_sm_status(channel, false);
        }
    }

    fn set_al_status(&mut self, status: AlStatus, code: AlStatusCode) {
        self.mem[registers::AL_STATUS as usize] = status.to_register();
        let a = registers::AL_STATUS_CODE as usize;
        let code: u16 = code.into();
        self.mem[a..a + 2].copy_from_slice(&code.to_le_bytes());
    }

    fn set_event_mask(&mut self, mask: u32) {
        let a = registers::AL_EVENT_MASK as usize;
        self.mem[a..a + 4].copy_from_slice(&mask.to_le_bytes());
    }
}
