//! # isolon-core
//!
//! The isolator contract and the Linux isolators built on it.
//!
//! - **Contract**: [`isolator::Isolator`], stages, and limitation feeds.
//! - **Namespaces**: which namespaces a container creates or joins.
//! - **Cgroups v2**: CPU weight, memory limits, and OOM detection.
//! - **Filesystem**: scratch root filesystems and bind mounts.
//! - **Network**, **capabilities**, and **rlimits**.
//!
//! Syscalls are confined to [`namespace::sys`] and run by the launcher.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod isolator;
pub mod isolators;
pub mod namespace;
pub mod network;
pub mod rlimits;
