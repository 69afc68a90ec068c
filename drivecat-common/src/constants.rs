//! Constants defining ESC register addresses and standard object indices
//!
//!

/// ESC register addresses used by the stack
///
/// Only the logical contract of these registers is relied upon; the physical
/// access goes through the [`EscRegisters`](crate::traits::EscRegisters)
/// facade.
pub mod registers {
    /// Application Layer control register, `u16`
    pub const AL_CONTROL: u16 = 0x0120;
    /// Application Layer status register, `u16`
    pub const AL_STATUS: u16 = 0x0130;
    /// Application Layer status code register, `u16`
    pub const AL_STATUS_CODE: u16 = 0x0134;
    /// AL event mask register, `u32`
    pub const AL_EVENT_MASK: u16 = 0x0204;
    /// AL event request register, `u32`
    pub const AL_EVENT_REQUEST: u16 = 0x0220;
    /// Watchdog divider register, `u16` (increments of 40 ns)
    pub const WATCHDOG_DIVIDER: u16 = 0x0400;
    /// Process data watchdog value register, `u16`
    pub const WATCHDOG_PROCESS_DATA: u16 = 0x0420;
    /// Process data watchdog status register, `u16`
    pub const WATCHDOG_STATUS: u16 = 0x0440;
    /// First sync manager channel register block
    pub const SYNC_MANAGER_BASE: u16 = 0x0800;
    /// Stride between sync manager channel register blocks
    pub const SYNC_MANAGER_STRIDE: u16 = 0x0008;
}

/// Bits of the AL event request register
pub mod al_events {
    /// AL control register was written
    pub const AL_CONTROL: u32 = 1 << 0;
    /// Watchdog process data expired
    pub const WATCHDOG: u32 = 1 << 6;
    /// Sync manager channel 0 event (write mailbox written by master)
    pub const SM0: u32 = 1 << 4;
    /// Sync manager channel 1 event (read mailbox read by master)
    pub const SM1: u32 = 1 << 5;
    /// Sync manager channel 2 event (outputs written by master)
    pub const SM2: u32 = 1 << 8;
    /// Sync manager channel 3 event (inputs read by master)
    pub const SM3: u32 = 1 << 9;
}

/// Object indices for standard objects
pub mod object_ids {
    /// The device type object index
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// The device name object index
    pub const DEVICE_NAME: u16 = 0x1008;
    /// The hardware version object index
    pub const HARDWARE_VERSION: u16 = 0x1009;
    /// The software version object index
    pub const SOFTWARE_VERSION: u16 = 0x100A;
    /// The identity object index
    pub const IDENTITY: u16 = 0x1018;

    /// The first receive-PDO mapping object index. RxPDO mappings can be
    /// stored from 0x1600 to 0x17FF.
    pub const RXPDO_MAP_BASE: u16 = 0x1600;
    /// The first transmit-PDO mapping object index. TxPDO mappings can be
    /// stored from 0x1A00 to 0x1BFF.
    pub const TXPDO_MAP_BASE: u16 = 0x1A00;
    /// Sync manager communication type object index
    pub const SM_COMM_TYPE: u16 = 0x1C00;
    /// Sync manager 2 (outputs) PDO assignment object index
    pub const RXPDO_ASSIGN: u16 = 0x1C12;
    /// Sync manager 3 (inputs) PDO assignment object index
    pub const TXPDO_ASSIGN: u16 = 0x1C13;
}

/// Detail codes carried in a mailbox error response (protocol type 0)
pub mod mailbox_errors {
    /// Header or length field is inconsistent
    pub const SYNTAX: u16 = 0x0001;
    /// The protocol nibble names a protocol this slave does not implement
    pub const UNSUPPORTED_PROTOCOL: u16 = 0x0002;
    /// Invalid mailbox channel
    pub const INVALID_CHANNEL: u16 = 0x0003;
    /// The service within a supported protocol is not implemented
    pub const SERVICE_NOT_SUPPORTED: u16 = 0x0004;
    /// A header field of the embedded protocol is invalid
    pub const INVALID_HEADER: u16 = 0x0005;
    /// The frame is shorter than its header claims
    pub const SIZE_TOO_SHORT: u16 = 0x0006;
    /// No buffer available to serve the request
    pub const NO_MORE_MEMORY: u16 = 0x0007;
    /// Payload size inconsistent with the service
    pub const INVALID_SIZE: u16 = 0x0008;
}
