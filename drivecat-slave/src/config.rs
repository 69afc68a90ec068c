//! Runtime configuration of the slave stack

/// Smallest usable mailbox: header plus one SDO initiate frame
pub const MIN_MAILBOX_SIZE: u16 = 16;

/// Resource configuration the stack validates the master's sync manager
/// settings against
///
/// These describe what the firmware provisions: where the mailbox and
/// process-data areas live in the ESC memory and how large they may be. On
/// std hosts a [`DeviceConfig`](drivecat_common::device_config::DeviceConfig)
/// can be converted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfig {
    /// Physical address of the write (master-to-slave) mailbox
    pub mailbox_out_address: u16,
    /// Physical address of the read (slave-to-master) mailbox
    pub mailbox_in_address: u16,
    /// Size of each mailbox in bytes
    pub mailbox_size: u16,
    /// Physical address of the output process data area
    pub pd_out_address: u16,
    /// Physical address of the input process data area
    pub pd_in_address: u16,
    /// Capacity of the output process data area in bytes
    pub max_output_bytes: u16,
    /// Capacity of the input process data area in bytes
    pub max_input_bytes: u16,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            mailbox_out_address: 0x1000,
            mailbox_in_address: 0x1080,
            mailbox_size: 128,
            pd_out_address: 0x1100,
            pd_in_address: 0x1200,
            max_output_bytes: 64,
            max_input_bytes: 64,
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl From<&drivecat_common::device_config::DeviceConfig> for SlaveConfig {
    fn from(config: &drivecat_common::device_config::DeviceConfig) -> Self {
        Self {
            mailbox_out_address: config.mailbox.out_address,
            mailbox_in_address: config.mailbox.in_address,
            mailbox_size: config.mailbox.size,
            pd_out_address: config.process_data.out_address,
            pd_in_address: config.process_data.in_address,
            max_output_bytes: config.process_data.max_out_bytes,
            max_input_bytes: config.process_data.max_in_bytes,
        }
    }
}
