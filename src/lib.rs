// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! AppFs - crash-safe, page-mappable flash filesystem.
//!
//! AppFs stores files as chains of fixed-size pages over a raw flash
//! partition, tracked by a small ping-pong pair of metadata slots so that a
//! power cut during a metadata update can never leave the filesystem in an
//! inconsistent state: the previous slot stays authoritative until the new
//! one's header, with its checksum, is the last thing written.
//!
//! ## Quick Start
//!
//! ```rust
//! use appfs::{AppFs, MemFlash};
//!
//! let flash = MemFlash::new(1024 * 1024);
//! let (fs, _outcome) = AppFs::new(flash).unwrap();
//! let handle = fs.create(b"hello.txt", 5).unwrap();
//! fs.write(handle, 0, b"hello").unwrap();
//! assert_eq!(fs.read(handle, 0, 5).unwrap(), b"hello");
//! ```
//!
//! ## Architecture
//!
//! - **format**: on-flash byte layout of the header and page descriptors,
//!   and the CRC-32 codec that binds them together.
//! - **flash**: the [`Flash`] trait AppFs is built against, plus
//!   [`FileFlash`] and [`MemFlash`], the two hosted implementations.
//! - **slot**: locates the authoritative metadata slot at mount time and
//!   drives the atomic two-slot commit protocol.
//! - **alloc**: the file directory — lookup, enumeration, delete, create.
//! - **fileio**: translates `(handle, offset, length)` into page chains for
//!   read, write, erase, and mmap.
//! - **fs**: [`AppFs`], the public, thread-safe entry point tying the above
//!   together.

pub mod alloc;
pub mod error;
pub mod fileio;
pub mod flash;
pub mod format;
pub mod fs;
pub mod slot;

pub use alloc::{Entry, Handle};
pub use error::{AppFsError, AppFsResult};
pub use flash::{Flash, FileFlash, MappedRegion, MemFlash};
pub use format::PAGE_SIZE;
pub use fs::{AppFs, MAX_HANDLE};
pub use slot::InitOutcome;
