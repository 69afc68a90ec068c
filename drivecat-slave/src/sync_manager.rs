//! Validation of the master's sync manager settings
//!
//! A pure function of the four channel descriptors, the configured resource
//! limits, and the compiled process data sizes. The state machine consults it
//! before every transition that changes the checked channel set.

use drivecat_common::al::{AlState, AlStatusCode};
use drivecat_common::sync_manager::{SmBufferMode, SmChannel, SmConfig, SmDirection};

use crate::config::{SlaveConfig, MIN_MAILBOX_SIZE};

/// Which channels a transition requires to be valid
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmCheckScope {
    /// Only the two mailbox channels (entering PREOP)
    Mailbox,
    /// All four channels (entering SAFEOP or OP)
    All,
}

/// A refused sync manager configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmCheckError {
    /// A mailbox channel is misconfigured
    Mailbox(SmChannel),
    /// A process data channel is misconfigured
    Settings(SmChannel),
}

impl SmCheckError {
    /// The AL status code to publish for this refusal
    pub fn status_code(&self) -> AlStatusCode {
        match self {
            SmCheckError::Mailbox(_) => AlStatusCode::InvalidMailboxConfiguration,
            SmCheckError::Settings(SmChannel::ProcessDataOut) => {
                AlStatusCode::InvalidOutputConfiguration
            }
            SmCheckError::Settings(SmChannel::ProcessDataIn) => {
                AlStatusCode::InvalidInputConfiguration
            }
            SmCheckError::Settings(_) => AlStatusCode::InvalidSyncManagerConfiguration,
        }
    }

    /// The state to fall back to after this refusal
    ///
    /// An unusable mailbox forces INIT; unusable process data settings leave
    /// the mailbox running in PREOP.
    pub fn fallback_state(&self) -> AlState {
        match self {
            SmCheckError::Mailbox(_) => AlState::Init,
            SmCheckError::Settings(_) => AlState::PreOp,
        }
    }
}

/// Derived facts about an approved configuration, consumed by the state
/// machine
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SmMode {
    /// Process data runs in single-buffer mode instead of triple-buffered
    pub single_buffer: bool,
    /// The output channel requires the watchdog trigger
    pub watchdog_required: bool,
}

/// Check the sync manager settings for a state transition
///
/// `compiled` is the (output, input) process data image size pair from the
/// mapping compiler; it is only consulted for [`SmCheckScope::All`].
pub fn check_sm_settings(
    channels: &[SmConfig; 4],
    scope: SmCheckScope,
    config: &SlaveConfig,
    compiled: (u16, u16),
) -> Result<SmMode, SmCheckError> {
    check_mailbox_channel(
        &channels[SmChannel::MailboxOut as usize],
        SmChannel::MailboxOut,
        config.mailbox_out_address,
        config,
    )?;
    check_mailbox_channel(
        &channels[SmChannel::MailboxIn as usize],
        SmChannel::MailboxIn,
        config.mailbox_in_address,
        config,
    )?;

    let mut mode = SmMode::default();
    if scope == SmCheckScope::Mailbox {
        return Ok(mode);
    }

    let (rx_bytes, tx_bytes) = compiled;
    mode = check_pd_channel(
        &channels[SmChannel::ProcessDataOut as usize],
        SmChannel::ProcessDataOut,
        config.pd_out_address,
        rx_bytes,
        mode,
    )?;
    mode = check_pd_channel(
        &channels[SmChannel::ProcessDataIn as usize],
        SmChannel::ProcessDataIn,
        config.pd_in_address,
        tx_bytes,
        mode,
    )?;
    Ok(mode)
}

fn check_mailbox_channel(
    sm: &SmConfig,
    channel: SmChannel,
    expected_address: u16,
    config: &SlaveConfig,
) -> Result<(), SmCheckError> {
    let err = SmCheckError::Mailbox(channel);
    if !sm.enabled() {
        return Err(err);
    }
    if sm.buffer_mode() != Ok(SmBufferMode::Mailbox) {
        return Err(err);
    }
    let expected_direction = match channel {
        SmChannel::MailboxOut => SmDirection::MasterWrite,
        _ => SmDirection::MasterRead,
    };
    if sm.direction() != Ok(expected_direction) {
        return Err(err);
    }
    if sm.start_address != expected_address {
        return Err(err);
    }
    if sm.length < MIN_MAILBOX_SIZE || sm.length > config.mailbox_size {
        return Err(err);
    }
    Ok(())
}

fn check_pd_channel(
    sm: &SmConfig,
    channel: SmChannel,
    expected_address: u16,
    compiled_bytes: u16,
    mut mode: SmMode,
) -> Result<SmMode, SmCheckError> {
    let err = SmCheckError::Settings(channel);
    if !sm.enabled() {
        // A disabled channel must not claim a length
        if sm.length != 0 {
            return Err(err);
        }
        return Ok(mode);
    }
    if sm.length == 0 {
        return Err(err);
    }
    if sm.length != compiled_bytes {
        return Err(err);
    }
    if sm.start_address != expected_address {
        return Err(err);
    }
    let expected_direction = match channel {
        SmChannel::ProcessDataOut => SmDirection::MasterWrite,
        _ => SmDirection::MasterRead,
    };
    if sm.direction() != Ok(expected_direction) {
        return Err(err);
    }
    match sm.buffer_mode() {
        Ok(SmBufferMode::Buffered) => {}
        Ok(SmBufferMode::Mailbox) => mode.single_buffer = true,
        Err(_) => return Err(err),
    }
    if channel == SmChannel::ProcessDataOut && sm.watchdog_trigger() {
        mode.watchdog_required = true;
    }
    Ok(mode)
}
