//! # isolon-common
//!
//! Shared protocol types, error definitions, configuration models, and
//! constants used across the isolon workspace.
//!
//! This crate is the leaf of the dependency graph. It defines the values
//! exchanged between the containerizer and its isolators at every lifecycle
//! transition: [`ContainerConfig`](protocol::ContainerConfig) going in,
//! [`ContainerLaunchInfo`](protocol::ContainerLaunchInfo) coming back, and the
//! recovery, limitation, and termination records around them.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod types;
