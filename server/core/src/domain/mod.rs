// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer
//!
//! Node aggregate, access control, hooks and the ports (`NodeRepository`,
//! `StorageAdapter`, `PrincipalDirectory`) the application layer drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Filesystem model free of concrete backends

pub mod acl;
pub mod attributes;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod name;
pub mod node;
pub mod path;
pub mod principal;
pub mod repository;
pub mod storage;
