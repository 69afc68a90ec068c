//! Implements the shared-state object bridging the management loop and the
//! cyclic path
use portable_atomic::{AtomicBool, Ordering};

use drivecat_common::al::{AlState, AlStatus, AlStatusCode};
use drivecat_common::AtomicCell;

use crate::pdo::{PdoDirection, PdoImage, PdoMappingTable};

/// A fault raised from the cyclic path, handled by the management loop
///
/// The cyclic path never changes the AL state itself; it latches a fault
/// here and the state machine downgrades on its next step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtFault {
    /// A unit conversion failed for the named entry
    Conversion {
        /// Object index of the failing entry
        index: u16,
        /// Sub-index of the failing entry
        sub: u8,
    },
    /// A compiled entry could not be stored or read back
    ObjectAccess {
        /// Object index of the failing entry
        index: u16,
        /// Sub-index of the failing entry
        sub: u8,
    },
}

/// A trait by which SlaveState is accessed
pub trait SlaveStateAccess: Sync + Send {
    /// The published AL status
    fn al_status(&self) -> AlStatus;
    /// The published AL status code
    fn status_code(&self) -> AlStatusCode;
    /// Publish a new AL status and code
    fn publish(&self, status: AlStatus, code: AlStatusCode);
    /// Whether output decoding is currently running
    fn outputs_active(&self) -> bool;
    /// Whether input encoding is currently running
    fn inputs_active(&self) -> bool;
    /// Set the output-update-running flag
    fn set_outputs_active(&self, active: bool);
    /// Set the input-update-running flag
    fn set_inputs_active(&self, active: bool);
    /// Record that output data was received, resetting the watchdog
    fn feed_watchdog(&self);
    /// Consume the watchdog feed flag
    fn take_watchdog_feed(&self) -> bool;
    /// Latch a cyclic-path fault for the management loop
    fn raise_rt_fault(&self, fault: RtFault);
    /// Consume a latched cyclic-path fault
    fn take_rt_fault(&self) -> Option<RtFault>;
    /// The compiled mapping image
    fn pdo_image(&self) -> &PdoImage;
    /// The receive-direction mapping configuration
    fn rx_mapping(&self) -> &PdoMappingTable;
    /// The transmit-direction mapping configuration
    fn tx_mapping(&self) -> &PdoMappingTable;
}

/// Shared state between the [`Slave`](crate::Slave) object, the mapping
/// configuration objects in the dictionary, and the cyclic task
///
/// Instantiated statically by the application and handed to all three
/// parties. All fields are atomically accessed; no method blocks.
#[allow(missing_debug_implementations)]
pub struct SlaveState {
    al_status: AtomicCell<AlStatus>,
    status_code: AtomicCell<AlStatusCode>,
    outputs_active: AtomicBool,
    inputs_active: AtomicBool,
    watchdog_feed: AtomicBool,
    rt_fault: AtomicCell<Option<RtFault>>,
    pdo_image: PdoImage,
    rx_mapping: PdoMappingTable,
    tx_mapping: PdoMappingTable,
}

impl Default for SlaveState {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveState {
    /// Create a new SlaveState
    pub const fn new() -> Self {
        Self {
            al_status: AtomicCell::new(AlStatus {
                state: AlState::Init,
                error: false,
            }),
            status_code: AtomicCell::new(AlStatusCode::NoError),
            outputs_active: AtomicBool::new(false),
            inputs_active: AtomicBool::new(false),
            watchdog_feed: AtomicBool::new(false),
            rt_fault: AtomicCell::new(None),
            pdo_image: PdoImage::new(),
            rx_mapping: PdoMappingTable::new(PdoDirection::Rx),
            tx_mapping: PdoMappingTable::new(PdoDirection::Tx),
        }
    }

    /// Access the receive mapping table as a const function
    ///
    /// This is required so that it can be shared with the mapping objects in
    /// the application's dictionary table.
    pub const fn rx_mapping_table(&'static self) -> &'static PdoMappingTable {
        &self.rx_mapping
    }

    /// Access the transmit mapping table as a const function
    pub const fn tx_mapping_table(&'static self) -> &'static PdoMappingTable {
        &self.tx_mapping
    }
}

impl SlaveStateAccess for SlaveState {
    fn al_status(&self) -> AlStatus {
        self.al_status.load()
    }

    fn status_code(&self) -> AlStatusCode {
        self.status_code.load()
    }

    fn publish(&self, status: AlStatus, code: AlStatusCode) {
        self.al_status.store(status);
        self.status_code.store(code);
    }

    fn outputs_active(&self) -> bool {
        self.outputs_active.load(Ordering::Relaxed)
    }

    fn inputs_active(&self) -> bool {
        self.inputs_active.load(Ordering::Relaxed)
    }

    fn set_outputs_active(&self, active: bool) {
        self.outputs_active.store(active, Ordering::Relaxed);
    }

    fn set_inputs_active(&self, active: bool) {
        self.inputs_active.store(active, Ordering::Relaxed);
    }

    fn feed_watchdog(&self) {
        self.watchdog_feed.store(true, Ordering::Relaxed);
    }

    fn take_watchdog_feed(&self) -> bool {
        self.watchdog_feed.swap(false, Ordering::Relaxed)
    }

    fn raise_rt_fault(&self, fault: RtFault) {
        // Keep the first fault; later ones would be consequences of it
        if self.rt_fault.load().is_none() {
            self.rt_fault.store(Some(fault));
        }
    }

    fn take_rt_fault(&self) -> Option<RtFault> {
        self.rt_fault.take()
    }

    fn pdo_image(&self) -> &PdoImage {
        &self.pdo_image
    }

    fn rx_mapping(&self) -> &PdoMappingTable {
        &self.rx_mapping
    }

    fn tx_mapping(&self) -> &PdoMappingTable {
        &self.tx_mapping
    }
}
