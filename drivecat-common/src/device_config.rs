//! Device configuration file support
//!
//! A drivecat device is described by a TOML file giving its identity and the
//! communication resources the firmware provisions. Applications load it at
//! build time or on a host to derive the runtime `SlaveConfig` and the EEPROM
//! image.
//!
//! ```toml
//! device_name = "drive-axis-1"
//! vendor_id = 0xCA7
//! product_code = 0x2000
//! revision = 1
//!
//! [mailbox]
//! out_address = 0x1000
//! in_address = 0x1080
//! size = 128
//!
//! [process_data]
//! out_address = 0x1100
//! in_address = 0x1200
//! max_out_bytes = 64
//! max_in_bytes = 64
//! ```

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Errors from [`DeviceConfig::load_from_str`]
#[derive(Debug, Snafu)]
pub enum LoadConfigError {
    /// The TOML could not be parsed
    #[snafu(display("Failed to parse device config: {source}"))]
    Parse {
        /// Underlying parse error
        source: toml::de::Error,
    },
    /// The config parsed but describes an unusable device
    #[snafu(display("Invalid device config: {message}"))]
    Validate {
        /// What is wrong
        message: String,
    },
}

/// Mailbox resources of the device
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MailboxConfig {
    /// Physical address of the write (master-to-slave) mailbox
    pub out_address: u16,
    /// Physical address of the read (slave-to-master) mailbox
    pub in_address: u16,
    /// Size of each mailbox in bytes
    pub size: u16,
}

/// Process data resources of the device
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProcessDataConfig {
    /// Physical address of the output (master-to-slave) area
    pub out_address: u16,
    /// Physical address of the input (slave-to-master) area
    pub in_address: u16,
    /// Capacity of the output area in bytes
    pub max_out_bytes: u16,
    /// Capacity of the input area in bytes
    pub max_in_bytes: u16,
}

/// A parsed device configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Human readable device name, reported via object 0x1008
    pub device_name: String,
    /// Vendor ID, reported via object 0x1018
    pub vendor_id: u32,
    /// Product code, reported via object 0x1018
    pub product_code: u32,
    /// Revision number, reported via object 0x1018
    pub revision: u32,
    /// Mailbox resources
    pub mailbox: MailboxConfig,
    /// Process data resources
    pub process_data: ProcessDataConfig,
}

impl DeviceConfig {
    /// Parse and validate a device configuration from TOML text
    pub fn load_from_str(text: &str) -> Result<Self, LoadConfigError> {
        let config: DeviceConfig = toml::from_str(text).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LoadConfigError> {
        if self.device_name.is_empty() {
            return Err(LoadConfigError::Validate {
                message: "device_name must not be empty".to_string(),
            });
        }
        if self.mailbox.size < 16 {
            return Err(LoadConfigError::Validate {
                message: format!(
                    "mailbox size {} is too small for the mailbox header and one SDO frame",
                    self.mailbox.size
                ),
            });
        }
        let mb = &self.mailbox;
        if mb.out_address.abs_diff(mb.in_address) < mb.size {
            return Err(LoadConfigError::Validate {
                message: "mailbox areas overlap".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    const EXAMPLE: &str = r#"
device_name = "drive-axis-1"
vendor_id = 0xCA7
product_code = 0x2000
revision = 1

[mailbox]
out_address = 0x1000
in_address = 0x1080
size = 128

[process_data]
out_address = 0x1100
in_address = 0x1200
max_out_bytes = 64
max_in_bytes = 64
"#;

    #[test]
    fn test_load_example() {
        let config = DeviceConfig::load_from_str(EXAMPLE).unwrap();
        assert_eq!("drive-axis-1", config.device_name);
        assert_eq!(0xCA7, config.vendor_id);
        assert_eq!(128, config.mailbox.size);
        assert_eq!(64, config.process_data.max_in_bytes);
    }

    #[test]
    fn test_overlapping_mailboxes_rejected() {
        let text = EXAMPLE.replace("in_address = 0x1080", "in_address = 0x1010");
        let err = DeviceConfig::load_from_str(&text).unwrap_err();
        assert_contains!(err.to_string(), "overlap");
    }

    #[test]
    fn test_tiny_mailbox_rejected() {
        let text = EXAMPLE.replace("size = 128", "size = 8");
        let err = DeviceConfig::load_from_str(&text).unwrap_err();
        assert_contains!(err.to_string(), "too small");
    }
}
