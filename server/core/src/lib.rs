// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Nimbus server core
//!
//! Hierarchical file and collection store with versioning, trash, locks,
//! ACLs, quotas and pluggable blob storage.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Exposes the domain model, the filesystem service and the
//!   storage and persistence backends

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
