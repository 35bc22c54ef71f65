//! Container lifecycle coordination for the isolon runtime.
//!
//! The [`Containerizer`] drives the isolators from `isolon-core` through
//! prepare, launch, monitoring, and teardown, recovers containers after a
//! restart, and hands processes to a [`Launcher`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod checkpoint;
pub mod containerizer;
pub mod events;
pub mod launcher;
pub mod merge;
#[cfg(target_os = "linux")]
pub mod process;
pub mod recovery;

mod monitor;
mod registry;
mod termination;

pub use checkpoint::CheckpointStore;
pub use containerizer::{Containerizer, ContainerizerOptions};
pub use events::LifecycleEvent;
pub use launcher::Launcher;
#[cfg(target_os = "linux")]
pub use process::ProcessLauncher;
pub use recovery::{RecoveryOutcome, RecoveryReport};
