// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Public API: [`AppFs`], a thread-safe handle onto a mounted partition.
//!
//! Every mutation goes through a single [`Mutex`]-guarded [`Inner`], matching
//! how the teacher serialises writers around its B+Tree root. AppFs has no
//! concurrent-writers story of its own to add: the mutex is the whole
//! concurrency model, same as the original firmware's single-core access
//! pattern.

use std::sync::Mutex;

use crate::alloc::{self, Entry, Handle};
use crate::error::{AppFsError, AppFsResult};
use crate::fileio;
use crate::flash::{Flash, MappedRegion};
use crate::format::{PageDescriptor, MAX_PAGES};
use crate::slot::{InitOutcome, SlotManager};

struct Inner<F: Flash> {
    flash: F,
    slots: SlotManager,
    descriptors: Vec<PageDescriptor>,
}

/// A mounted AppFs partition.
///
/// ## Error Conditions
/// Every fallible operation returns [`AppFsError`]; none panic on ordinary
/// misuse (bad name, bad handle, full partition). A panic indicates a bug in
/// AppFs itself, such as a corrupted working descriptor array.
pub struct AppFs<F: Flash> {
    inner: Mutex<Inner<F>>,
}

impl<F: Flash> AppFs<F> {
    /// Mount `flash`, recovering the active metadata slot or reinitializing
    /// the partition if neither slot validates.
    ///
    /// ## Output
    /// The mounted filesystem and which of the two mounting paths was taken.
    pub fn new(mut flash: F) -> AppFsResult<(Self, InitOutcome)> {
        let (slots, descriptors, outcome) = SlotManager::mount(&mut flash)?;
        let inner = Inner {
            flash,
            slots,
            descriptors,
        };
        Ok((
            Self {
                inner: Mutex::new(inner),
            },
            outcome,
        ))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<F>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `true` if a file named `name` currently exists. `name` is an
    /// arbitrary byte string (spec.md §3); it need not be valid UTF-8.
    pub fn exists(&self, name: &[u8]) -> bool {
        let inner = self.lock();
        alloc::first_page_of(&inner.descriptors, name).is_some()
    }

    /// Resolve `name` to the handle of its first page.
    pub fn open(&self, name: &[u8]) -> AppFsResult<Handle> {
        let inner = self.lock();
        alloc::first_page_of(&inner.descriptors, name).ok_or_else(|| AppFsError::NotFound {
            what: String::from_utf8_lossy(name).into_owned(),
        })
    }

    /// Create a file named `name` of `size` bytes, allocating
    /// `ceil(size / PAGE_SIZE)` pages (at least one) and committing the
    /// updated metadata. Any existing file of the same name is replaced in
    /// the same commit, so creating over an existing name never fails for
    /// want of the old file's own space.
    ///
    /// ## Error Conditions
    /// [`AppFsError::NoSpace`] if the partition has too few free pages.
    pub fn create(&self, name: &[u8], size: u32) -> AppFsResult<Handle> {
        let mut inner = self.lock();
        let mut working = inner.descriptors.clone();
        let handle = alloc::create_into(&mut working, name, size)?;
        inner.slots.commit(&mut inner.flash, &working)?;
        inner.descriptors = working;
        Ok(handle)
    }

    /// Delete `name`, freeing its whole page chain, and commit the updated
    /// metadata. A no-op (not an error) if `name` doesn't exist, matching
    /// the original firmware's `appfsDeleteFile`.
    pub fn delete(&self, name: &[u8]) -> AppFsResult<()> {
        let mut inner = self.lock();
        let mut working = inner.descriptors.clone();
        alloc::delete_into(&mut working, name);
        inner.slots.commit(&mut inner.flash, &working)?;
        inner.descriptors = working;
        Ok(())
    }

    /// Rename `from` to `to` in place, without moving any page. Fails if
    /// `from` doesn't exist or `to` is already taken.
    pub fn rename(&self, from: &[u8], to: &[u8]) -> AppFsResult<()> {
        let mut inner = self.lock();
        let handle = alloc::first_page_of(&inner.descriptors, from).ok_or_else(|| AppFsError::NotFound {
            what: String::from_utf8_lossy(from).into_owned(),
        })?;
        if alloc::first_page_of(&inner.descriptors, to).is_some() {
            return Err(AppFsError::Exists {
                name: String::from_utf8_lossy(to).into_owned(),
            });
        }
        let mut working = inner.descriptors.clone();
        working[handle as usize - 1].name = Some(to.to_vec());
        inner.slots.commit(&mut inner.flash, &working)?;
        inner.descriptors = working;
        Ok(())
    }

    /// Read `length` bytes starting at `offset` of `handle`'s file.
    pub fn read(&self, handle: Handle, offset: u32, length: u32) -> AppFsResult<Vec<u8>> {
        let inner = self.lock();
        fileio::read(&inner.flash, &inner.descriptors, handle, offset, length)
    }

    /// Write `bytes` at `offset` of `handle`'s file. Does not itself commit
    /// metadata, since page contents aren't tracked there; callers writing
    /// file bodies call this directly after `create`.
    pub fn write(&self, handle: Handle, offset: u32, bytes: &[u8]) -> AppFsResult<()> {
        let mut inner = self.lock();
        fileio::write(&mut inner.flash, &inner.descriptors, handle, offset, bytes)
    }

    /// Erase `length` bytes (rounded up to whole pages) starting at
    /// `offset` of `handle`'s file, clearing them to 0xFF ahead of a
    /// rewrite.
    pub fn erase(&self, handle: Handle, offset: u32, length: u32) -> AppFsResult<()> {
        let mut inner = self.lock();
        fileio::erase(&mut inner.flash, &inner.descriptors, handle, offset, length)
    }

    /// Map `[offset, offset + length)` of `handle`'s file into one
    /// contiguous virtual window, returning the mapping and the byte
    /// offset into it at which the requested range begins.
    pub fn mmap(&self, handle: Handle, offset: u32, length: u32) -> AppFsResult<(MappedRegion, u32)> {
        let inner = self.lock();
        fileio::mmap(&inner.flash, &inner.descriptors, handle, offset, length)
    }

    /// Name and recorded size of the file at `handle`.
    pub fn entry_info(&self, handle: Handle) -> AppFsResult<(Vec<u8>, u32)> {
        let inner = self.lock();
        alloc::entry_info(&inner.descriptors, handle)
    }

    /// The handle strictly after `after` in ascending order, or `None` at
    /// the end of the directory. Pass handle 0 to start from the beginning.
    pub fn next_entry(&self, after: Handle) -> Option<Handle> {
        let inner = self.lock();
        alloc::next_entry(&inner.descriptors, after)
    }

    /// Every file currently in the directory, in ascending handle order.
    pub fn entries(&self) -> Vec<Entry> {
        let inner = self.lock();
        alloc::entries(&inner.descriptors)
    }

    /// Total free space across the partition, in bytes.
    pub fn free_space(&self) -> u32 {
        let inner = self.lock();
        alloc::free_space(&inner.descriptors)
    }

    /// Total space currently occupied by file data, in bytes.
    pub fn used_space(&self) -> u32 {
        let inner = self.lock();
        alloc::used_space(&inner.descriptors)
    }

    /// Iterate every file in the directory, in ascending handle order, as
    /// `(handle, name, size)` triples. A safe wrapper over the raw
    /// `next_entry`/`entry_info` cursor pair.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, Vec<u8>, u32)> {
        self.entries().into_iter().map(|e| (e.handle, e.name, e.size))
    }

    /// A human-readable dump of the active metadata slot, in the format the
    /// original firmware's `appfsDump` prints: sixteen descriptors per row,
    /// `..` for free, `XX` for illegal, and the two-digit hex `next` pointer
    /// otherwise, followed by one "File `name` starts at page `handle`"
    /// line per file.
    pub fn dump(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();
        for (row, chunk) in inner.descriptors.chunks(16).enumerate() {
            out.push_str(&format!("{:4}: ", row * 16 + 1));
            for d in chunk {
                let cell = if d.used == crate::format::USED_FREE {
                    "..".to_string()
                } else if d.used == crate::format::USED_ILLEGAL {
                    "XX".to_string()
                } else {
                    format!("{:02x}", d.next)
                };
                out.push_str(&cell);
                out.push(' ');
            }
            out.push('\n');
        }
        for entry in alloc::entries(&inner.descriptors) {
            // Display-only: a dump is for a human to read, so invalid UTF-8
            // in a name is shown lossily rather than rejected.
            out.push_str(&format!(
                "File {} starts at page {}\n",
                String::from_utf8_lossy(&entry.name),
                entry.handle
            ));
        }
        out
    }

    /// Slot serial number currently active, for diagnostics.
    pub fn serial(&self) -> u32 {
        let inner = self.lock();
        inner.slots.serial()
    }

    /// Which metadata slot (0 or 1) is currently active, for diagnostics.
    pub fn active_slot(&self) -> usize {
        let inner = self.lock();
        inner.slots.active_slot()
    }

    /// Read the whole partition back out through the underlying [`Flash`],
    /// e.g. to persist an in-memory image built with [`crate::MemFlash`].
    pub fn read_partition(&self) -> AppFsResult<Vec<u8>> {
        let inner = self.lock();
        let size = inner.flash.partition_size();
        inner.flash.read(0, size)
    }
}

/// Highest valid handle value, for callers iterating the whole range.
pub const MAX_HANDLE: Handle = MAX_PAGES as Handle;
