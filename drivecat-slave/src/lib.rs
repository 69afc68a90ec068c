//! A library implementing an EtherCAT slave protocol stack in Rust
//!
//! Drivecat-slave turns a raw EtherCAT Slave Controller register interface
//! into a conformant fieldbus slave. It is primarily intended to run on
//! microcontrollers inside motor-drive controllers, so it is no_std
//! compatible and performs no heap allocation, statically allocating all
//! storage. It provides the following features:
//!
//! * Runs the *AL state machine* (INIT/PREOP/SAFEOP/OP) with sync manager
//!   validation on every checked transition and application lifecycle hooks.
//! * Implements the *mailbox* channel with repeat/retry semantics and
//!   protocol dispatch.
//! * Implements a *CoE SDO server* with expedited, normal and segmented
//!   transfers plus the SDO Information introspection service.
//! * Compiles master-configured *PDO mappings* into a flat table of fast
//!   entries and exchanges them with a fixed-budget cyclic codec.
//! * Queues *emergency messages* raised by the stack or the application.
//!
//! # Getting Started
//!
//! The stack is split across two execution contexts. The management loop
//! owns a [`Slave`] object and polls [`Slave::process`]; the real-time loop
//! owns a [`CyclicTask`] and calls [`CyclicTask::exchange`] once per cycle.
//! The two communicate only through a shared [`SlaveState`] object, which is
//! also wired into the mapping configuration objects of the dictionary.
//!
//! ```ignore
//! static STATE: SlaveState = SlaveState::new();
//! static EMCY: EmcyQueue = EmcyQueue::new();
//! static RX_ASSIGN: PdoAssignObject = PdoAssignObject::new(STATE.rx_mapping_table());
//! // ... mapping objects, application objects, and an OD_TABLE referencing
//! // them all ...
//!
//! let config = SlaveConfig::default();
//! let mut slave = Slave::new(config, Callbacks::new(), &STATE, &EMCY, &OD_TABLE);
//! let mut cyclic = CyclicTask::new(&STATE, &config);
//!
//! // Management task, e.g. every millisecond
//! slave.process(&mut esc, now_us);
//!
//! // Real-time task, once per fieldbus cycle
//! cyclic.exchange(&mut esc);
//! ```
//!
//! The ESC itself is reached through the
//! [`EscRegisters`](common::traits::EscRegisters) facade, implemented by the
//! application for its particular process data interface (SPI, parallel bus,
//! or a simulation in tests).
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod emergency;
mod mailbox;
pub mod pdo;
mod sdo_server;
mod slave;
mod slave_state;
pub mod sync_manager;

// Re-export types the application wires together
pub use critical_section;
pub use drivecat_common as common;

pub use config::SlaveConfig;
pub use emergency::EmcyQueue;
pub use mailbox::MAX_MAILBOX_SIZE;
pub use pdo::{CyclicTask, PdoAssignObject, PdoMappingObject};
pub use slave::{CallbackResult, Callbacks, LifecycleFn, Slave};
pub use slave_state::{RtFault, SlaveState, SlaveStateAccess};
