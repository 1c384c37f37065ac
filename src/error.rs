// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for AppFs operations.

use std::fmt;

/// Standard result type for all AppFs operations.
pub type AppFsResult<T> = Result<T, AppFsError>;

/// Error taxonomy for AppFs operations.
#[derive(Debug, Clone)]
pub enum AppFsError {
    /// A file name or handle did not resolve to an existing file.
    NotFound { what: String },

    /// An offset/length pair exceeded a file's recorded size, or a
    /// requested mmap length was zero.
    InvalidSize { reason: String },

    /// Fewer free pages than required were available at commit time.
    NoSpace { need: u32, free: u32 },

    /// A rename target already exists.
    Exists { name: String },

    /// A flash erase/write/read operation failed.
    IoError { operation: String, reason: String },

    /// Insufficient MMU resources to satisfy a requested mapping.
    NoMmuSlot { pages: usize },
}

impl fmt::Display for AppFsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {}", what),
            Self::InvalidSize { reason } => write!(f, "invalid size: {}", reason),
            Self::NoSpace { need, free } => {
                write!(f, "no space: need {} page(s), {} free", need, free)
            }
            Self::Exists { name } => write!(f, "'{}' already exists", name),
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::NoMmuSlot { pages } => {
                write!(f, "no MMU slot available to map {} page(s)", pages)
            }
        }
    }
}

impl std::error::Error for AppFsError {}

impl From<std::io::Error> for AppFsError {
    fn from(err: std::io::Error) -> Self {
        AppFsError::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
