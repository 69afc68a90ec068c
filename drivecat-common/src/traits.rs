//! Common traits

use crate::al::{AlStatus, AlStatusCode};
use crate::sync_manager::{SmChannel, SmConfig};

/// Access to the slave controller's register space
///
/// This is the hardware boundary of the stack. Implementations wrap a real
/// ESC's process-data interface (SPI, parallel bus, memory mapped) or a
/// simulation. Accesses are byte granular and must compose safely when called
/// back-to-back on overlapping regions; dual-port memory access does not
/// fail, so the methods are infallible.
pub trait EscRegisters {
    /// Read `buf.len()` bytes starting at `address`
    fn read(&mut self, address: u16, buf: &mut [u8]);

    /// Write `data` starting at `address`
    fn write(&mut self, address: u16, data: &[u8]);

    /// Read and decode a sync manager channel's register block
    fn sm_config(&mut self, channel: SmChannel) -> SmConfig {
        let mut raw = [0u8; 8];
        self.read(channel.register_address(), &mut raw);
        SmConfig::from_bytes(&raw)
    }

    /// Allow the master to use a sync manager channel
    fn enable_sm(&mut self, channel: SmChannel);

    /// Deactivate a sync manager channel from the application side
    ///
    /// Used both to refuse exchange in lower states and to evict a pending
    /// mailbox frame for the repeat service.
    fn disable_sm(&mut self, channel: SmChannel);

    /// Publish the AL status and status code registers
    fn set_al_status(&mut self, status: AlStatus, code: AlStatusCode);

    /// Set the AL event mask controlling which events interrupt the PDI
    fn set_event_mask(&mut self, mask: u32);

    /// Read a little-endian u16 register
    fn read_u16(&mut self, address: u16) -> u16 {
        let mut buf = [0u8; 2];
        self.read(address, &mut buf);
        u16::from_le_bytes(buf)
    }

    /// Read a little-endian u32 register
    fn read_u32(&mut self, address: u16) -> u32 {
        let mut buf = [0u8; 4];
        self.read(address, &mut buf);
        u32::from_le_bytes(buf)
    }
}
