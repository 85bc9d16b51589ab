// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod filesystem;
pub mod quota;
pub mod repository_factory;

pub use filesystem::{
    CopyOptions, DeleteOptions, FilesystemService, FilesystemSettings, NodeRef, RestoreOptions,
};
pub use quota::QuotaGuard;
