//! Common functionality shared among other drivecat crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is
//! re-exported by `drivecat-slave`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod al;
mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod coe;
pub mod constants;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod device_config;
pub mod mailbox;
pub mod objects;
pub mod pdo;
pub mod sync_manager;
pub mod traits;

pub use al::{AlState, AlStatus, AlStatusCode};
pub use sync_manager::{SmChannel, SmConfig};
pub use traits::EscRegisters;
