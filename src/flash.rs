// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Flash abstraction: page-aligned erase, byte-granular write, read, and
//! mmap of an ordered set of physical pages into one contiguous window.
//!
//! AppFs is expressed entirely in terms of the four operations on [`Flash`],
//! so a hosted implementation can substitute a file-backed partition for the
//! real hardware MMU/flash controller. [`FileFlash`] is that substitution,
//! backed by a regular file plus `memmap2` the same way the teacher pairs
//! an `MmapMut` for writes with a freshly taken `Mmap` for reads.

use crate::error::{AppFsError, AppFsResult};
use crate::format::PAGE_SIZE;
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::Path;

/// A contiguous virtual mapping of an ordered list of physical pages.
///
/// Dropping the mapping releases the underlying MMU/mmap resource; there is
/// no explicit unmap call in the public API.
pub struct MappedRegion {
    mmap: Mmap,
}

impl MappedRegion {
    fn from_bytes(bytes: Vec<u8>) -> AppFsResult<Self> {
        let mut anon = MmapMut::map_anon(bytes.len().max(1)).map_err(|e| AppFsError::IoError {
            operation: "mmap_anon".to_string(),
            reason: e.to_string(),
        })?;
        anon[..bytes.len()].copy_from_slice(&bytes);
        let mmap = anon.make_read_only().map_err(|e| AppFsError::IoError {
            operation: "mmap_freeze".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { mmap })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Deref for MappedRegion {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

/// The four operations AppFs needs from the underlying storage medium.
pub trait Flash {
    /// Erase `length` bytes starting at `offset`, clearing them to all
    /// 0xFF. Both arguments must be page-multiples.
    fn erase(&mut self, offset: u32, length: u32) -> AppFsResult<()>;

    /// Write `bytes` at `offset`. The medium can only flip 1-bits to
    /// 0-bits; callers must have erased the target range first, or rely on
    /// writes being monotonically bit-clearing.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> AppFsResult<()>;

    /// Read `length` bytes starting at `offset`.
    fn read(&self, offset: u32, length: u32) -> AppFsResult<Vec<u8>>;

    /// Map an ordered list of absolute partition-page indices into one
    /// contiguous virtual window.
    fn mmap_pages(&self, page_indices: &[u32]) -> AppFsResult<MappedRegion>;

    /// Size of the whole partition in bytes.
    fn partition_size(&self) -> u32;
}

/// File-backed [`Flash`] implementation: the hosted substitution for the
/// real MMU-mapped flash partition.
///
/// Reads and writes to data pages (and to the metadata page) are ordinary
/// file I/O, matching how the ESP32 target treats `esp_partition_write`/
/// `esp_partition_erase_range` as plain flash operations. Only
/// [`Flash::mmap_pages`] goes through an actual `memmap2` mapping, since
/// that is the operation the spec requires to hand back a contiguous
/// virtual window.
pub struct FileFlash {
    file: File,
    size: u32,
}

impl FileFlash {
    /// Open an existing partition image, or create one of `size` bytes
    /// filled with 0xFF (erased) if it doesn't exist yet.
    pub fn open<P: AsRef<Path>>(path: P, size: u32) -> AppFsResult<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| AppFsError::IoError {
                operation: "open_partition".to_string(),
                reason: e.to_string(),
            })?;

        if is_new {
            let blank = vec![0xFFu8; size as usize];
            file.write_all(&blank).map_err(|e| AppFsError::IoError {
                operation: "create_partition".to_string(),
                reason: e.to_string(),
            })?;
        } else {
            let actual = file
                .metadata()
                .map_err(|e| AppFsError::IoError {
                    operation: "stat_partition".to_string(),
                    reason: e.to_string(),
                })?
                .len();
            if actual != size as u64 {
                return Err(AppFsError::IoError {
                    operation: "open_partition".to_string(),
                    reason: format!("partition file is {} bytes, expected {}", actual, size),
                });
            }
        }

        Ok(Self { file, size })
    }
}

impl Flash for FileFlash {
    fn erase(&mut self, offset: u32, length: u32) -> AppFsResult<()> {
        if offset % PAGE_SIZE != 0 || length % PAGE_SIZE != 0 {
            return Err(AppFsError::IoError {
                operation: "erase".to_string(),
                reason: "offset and length must be page-aligned".to_string(),
            });
        }
        self.write(offset, &vec![0xFFu8; length as usize])
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> AppFsResult<()> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| AppFsError::IoError {
                operation: "seek_write".to_string(),
                reason: e.to_string(),
            })?;
        self.file.write_all(bytes).map_err(|e| AppFsError::IoError {
            operation: "write".to_string(),
            reason: e.to_string(),
        })?;
        self.file.flush().map_err(|e| AppFsError::IoError {
            operation: "flush".to_string(),
            reason: e.to_string(),
        })
    }

    fn read(&self, offset: u32, length: u32) -> AppFsResult<Vec<u8>> {
        let mut file = self.file.try_clone().map_err(|e| AppFsError::IoError {
            operation: "clone_for_read".to_string(),
            reason: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| AppFsError::IoError {
                operation: "seek_read".to_string(),
                reason: e.to_string(),
            })?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).map_err(|e| AppFsError::IoError {
            operation: "read".to_string(),
            reason: e.to_string(),
        })?;
        Ok(buf)
    }

    fn mmap_pages(&self, page_indices: &[u32]) -> AppFsResult<MappedRegion> {
        if page_indices.is_empty() {
            return Err(AppFsError::NoMmuSlot { pages: 0 });
        }
        let mut bytes = Vec::with_capacity(page_indices.len() * PAGE_SIZE as usize);
        for &p in page_indices {
            bytes.extend_from_slice(&self.read(p * PAGE_SIZE, PAGE_SIZE)?);
        }
        MappedRegion::from_bytes(bytes)
    }

    fn partition_size(&self) -> u32 {
        self.size
    }
}

/// In-memory [`Flash`] implementation used by unit tests and the
/// `mkappfs` image builder (which never needs a real file until it writes
/// the finished image at the end).
#[derive(Clone)]
pub struct MemFlash {
    bytes: Vec<u8>,
}

impl MemFlash {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0xFFu8; size as usize],
        }
    }

    /// Borrow the whole backing buffer, e.g. to trim and persist an image.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Flash for MemFlash {
    fn erase(&mut self, offset: u32, length: u32) -> AppFsResult<()> {
        if offset % PAGE_SIZE != 0 || length % PAGE_SIZE != 0 {
            return Err(AppFsError::IoError {
                operation: "erase".to_string(),
                reason: "offset and length must be page-aligned".to_string(),
            });
        }
        let start = offset as usize;
        let end = start + length as usize;
        if end > self.bytes.len() {
            return Err(AppFsError::IoError {
                operation: "erase".to_string(),
                reason: "range exceeds partition size".to_string(),
            });
        }
        self.bytes[start..end].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> AppFsResult<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.bytes.len() {
            return Err(AppFsError::IoError {
                operation: "write".to_string(),
                reason: "range exceeds partition size".to_string(),
            });
        }
        // Only 1-bits may be cleared to 0; honour that even in the
        // simulator so bugs in callers surface the same way they would on
        // real NOR flash.
        for (dst, &src) in self.bytes[start..end].iter_mut().zip(bytes) {
            *dst &= src;
        }
        Ok(())
    }

    fn read(&self, offset: u32, length: u32) -> AppFsResult<Vec<u8>> {
        let start = offset as usize;
        let end = start + length as usize;
        if end > self.bytes.len() {
            return Err(AppFsError::IoError {
                operation: "read".to_string(),
                reason: "range exceeds partition size".to_string(),
            });
        }
        Ok(self.bytes[start..end].to_vec())
    }

    fn mmap_pages(&self, page_indices: &[u32]) -> AppFsResult<MappedRegion> {
        if page_indices.is_empty() {
            return Err(AppFsError::NoMmuSlot { pages: 0 });
        }
        let mut bytes = Vec::with_capacity(page_indices.len() * PAGE_SIZE as usize);
        for &p in page_indices {
            bytes.extend_from_slice(&self.read(p * PAGE_SIZE, PAGE_SIZE)?);
        }
        MappedRegion::from_bytes(bytes)
    }

    fn partition_size(&self) -> u32 {
        self.bytes.len() as u32
    }
}
