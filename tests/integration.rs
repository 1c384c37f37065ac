// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end integration tests.
//!
//! Exercises the public [`AppFs`] API over an in-memory partition, covering
//! the create/read/delete/replace/persistence/power-cut/oversize scenarios
//! and the free-space accounting invariant.

use appfs::slot::SlotManager;
use appfs::{AppFs, AppFsError, Flash, InitOutcome, MemFlash, PAGE_SIZE};

const PARTITION_SIZE: u32 = 1_048_576; // 16 pages -> 15 data pages usable.

// ============================================================================
// S1 - Create/read
// ============================================================================

#[test]
fn test_s1_create_write_read() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, outcome) = AppFs::new(flash).unwrap();
    assert_eq!(outcome, InitOutcome::Reinitialized);

    let handle = fs.create(b"hello", 100).unwrap();
    assert_eq!(handle, 1);

    fs.write(handle, 0, &[0x41u8; 100]).unwrap();
    let data = fs.read(handle, 0, 100).unwrap();
    assert_eq!(data, vec![0x41u8; 100]);
}

// ============================================================================
// S2 - Delete frees space
// ============================================================================

#[test]
fn test_s2_delete_frees_space() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"hello", 100).unwrap();

    assert_eq!(fs.free_space(), 14 * PAGE_SIZE);

    fs.delete(b"hello").unwrap();
    assert_eq!(fs.free_space(), 15 * PAGE_SIZE);
}

// ============================================================================
// S3 - Multi-page
// ============================================================================

#[test]
fn test_s3_multi_page_chain() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();

    let handle = fs.create(b"big", 200_000).unwrap();
    assert_eq!(handle, 1);
    assert_eq!(fs.entry_info(1).unwrap(), (b"big".to_vec(), 200_000));
    assert_eq!(fs.free_space(), 11 * PAGE_SIZE);
}

// ============================================================================
// S4 - Replace
// ============================================================================

#[test]
fn test_s4_replace_reclaims_old_pages() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"big", 200_000).unwrap();

    // No explicit delete: creating over the same name must succeed even
    // though "big" still occupies most of the partition, because create
    // deletes the same-named file into its own working buffer before
    // allocating from it.
    let handle = fs.create(b"big", PAGE_SIZE).unwrap();

    assert_eq!(handle, 1);
    assert_eq!(fs.free_space(), 14 * PAGE_SIZE);
}

// ============================================================================
// S5 - Persistence across re-init
// ============================================================================

#[test]
fn test_s5_persists_across_remount() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let image = {
        let (fs, _) = AppFs::new(flash).unwrap();
        fs.create(b"big", 200_000).unwrap();
        fs.read_partition().unwrap()
    };

    let mut reopened = MemFlash::new(PARTITION_SIZE);
    reopened.write(0, &image[..PAGE_SIZE as usize]).unwrap();
    let (fs2, outcome) = AppFs::new(reopened).unwrap();
    assert_eq!(outcome, InitOutcome::Recovered);

    let handle = fs2.open(b"big").unwrap();
    assert_eq!(handle, 1);
    assert_eq!(fs2.entry_info(1).unwrap(), (b"big".to_vec(), 200_000));
}

// ============================================================================
// S7 - Oversize
// ============================================================================

#[test]
fn test_s7_oversize_fails_without_committing() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();

    let before = fs.free_space();
    let err = fs.create(b"too_big", 16 * PAGE_SIZE).unwrap_err();
    assert!(matches!(err, AppFsError::NoSpace { .. }));
    assert_eq!(fs.free_space(), before);
    assert!(!fs.exists(b"too_big"));
}

// ============================================================================
// Uniqueness & rename
// ============================================================================

#[test]
fn test_create_twice_same_name_replaces() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"dup", 10).unwrap();
    let handle = fs.create(b"dup", 20).unwrap();
    assert_eq!(
        fs.entries().iter().filter(|e| e.name == b"dup".to_vec()).count(),
        1
    );
    assert_eq!(fs.entry_info(handle).unwrap().1, 20);
}

#[test]
fn test_rename_keeps_pages_and_data() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    let handle = fs.create(b"old", 10).unwrap();
    fs.write(handle, 0, b"0123456789").unwrap();

    fs.rename(b"old", b"new").unwrap();
    assert!(!fs.exists(b"old"));
    let handle2 = fs.open(b"new").unwrap();
    assert_eq!(handle2, handle);
    assert_eq!(fs.read(handle2, 0, 10).unwrap(), b"0123456789");
}

#[test]
fn test_rename_to_existing_name_fails() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"a", 10).unwrap();
    fs.create(b"b", 10).unwrap();
    assert!(matches!(fs.rename(b"a", b"b"), Err(AppFsError::Exists { .. })));
}

// ============================================================================
// Free-space accounting (Property 5)
// ============================================================================

#[test]
fn test_free_space_accounting_invariant() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"a", 200_000).unwrap();
    fs.create(b"b", 1).unwrap();

    let used: u32 = fs
        .entries()
        .iter()
        .map(|e| e.size.div_ceil(PAGE_SIZE) * PAGE_SIZE)
        .sum();
    let illegal_pages = 255 - 15; // 15 data pages usable on a 16-page partition.
    assert_eq!(
        fs.free_space() + used + illegal_pages as u32 * PAGE_SIZE,
        255 * PAGE_SIZE
    );
    assert_eq!(fs.used_space(), used);
}

#[test]
fn test_iter_matches_entries() {
    let flash = MemFlash::new(PARTITION_SIZE);
    let (fs, _) = AppFs::new(flash).unwrap();
    fs.create(b"a", 10).unwrap();
    fs.create(b"b", 20).unwrap();

    let via_iter: Vec<(u8, Vec<u8>, u32)> = fs.iter().collect();
    let via_entries: Vec<(u8, Vec<u8>, u32)> = fs
        .entries()
        .into_iter()
        .map(|e| (e.handle, e.name, e.size))
        .collect();
    assert_eq!(via_iter, via_entries);
}

// ============================================================================
// S6 - Power cut atomicity
// ============================================================================

/// A [`Flash`] wrapper that silently stops mutating the backing medium once
/// a fixed byte budget of erase/write traffic has been spent, simulating a
/// power cut partway through a commit. Reads and `mmap_pages` are always
/// served in full, since a real power cut doesn't corrupt reads of whatever
/// bits happen to be sitting in flash at the time.
struct FaultInjectingFlash<F: Flash> {
    inner: F,
    budget: usize,
    spent: usize,
}

impl<F: Flash> FaultInjectingFlash<F> {
    fn new(inner: F, budget: usize) -> Self {
        Self {
            inner,
            budget,
            spent: 0,
        }
    }

    /// How many bytes of the budget remain available for this call, taking
    /// `len` more bytes of traffic into account.
    fn allowance(&mut self, len: usize) -> usize {
        if self.spent >= self.budget {
            return 0;
        }
        let room = self.budget - self.spent;
        let take = room.min(len);
        self.spent += len;
        take
    }
}

impl<F: Flash> Flash for FaultInjectingFlash<F> {
    fn erase(&mut self, offset: u32, length: u32) -> appfs::AppFsResult<()> {
        let allowed = self.allowance(length as usize) as u32;
        if allowed > 0 {
            self.inner.erase(offset, allowed)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> appfs::AppFsResult<()> {
        let allowed = self.allowance(bytes.len());
        if allowed > 0 {
            self.inner.write(offset, &bytes[..allowed])?;
        }
        Ok(())
    }

    fn read(&self, offset: u32, length: u32) -> appfs::AppFsResult<Vec<u8>> {
        self.inner.read(offset, length)
    }

    fn mmap_pages(&self, page_indices: &[u32]) -> appfs::AppFsResult<appfs::MappedRegion> {
        self.inner.mmap_pages(page_indices)
    }

    fn partition_size(&self) -> u32 {
        self.inner.partition_size()
    }
}

#[test]
fn test_s6_power_cut_never_yields_hybrid_state() {
    let mut base = MemFlash::new(PARTITION_SIZE);
    let (mut slots, mut descriptors, _) = SlotManager::mount(&mut base).unwrap();
    appfs::alloc::create_into(&mut descriptors, b"big", 200_000).unwrap();
    slots.commit(&mut base, &descriptors).unwrap();

    let pre_names: Vec<Option<Vec<u8>>> = descriptors.iter().map(|d| d.name.clone()).collect();

    let mut post_descriptors = descriptors.clone();
    appfs::alloc::create_into(&mut post_descriptors, b"other", PAGE_SIZE).unwrap();
    let post_names: Vec<Option<Vec<u8>>> = post_descriptors.iter().map(|d| d.name.clone()).collect();

    // The commit sequence touches at most one erased slot (META_SLOT_SIZE
    // bytes) plus up to 255 descriptor writes plus one header write.
    let total_budget = (PAGE_SIZE / 2) as usize + 255 * 128 + 128;

    for cutoff in (0..=total_budget).step_by(4096) {
        let mut trial_flash = base.clone();
        let (mut trial_slots, _, _) = SlotManager::mount(&mut trial_flash).unwrap();
        let mut faulty = FaultInjectingFlash::new(trial_flash, cutoff);
        let _ = trial_slots.commit(&mut faulty, &post_descriptors);

        let mut result_flash = faulty.inner;
        let (_, recovered, _) = SlotManager::mount(&mut result_flash).unwrap();
        let names: Vec<Option<Vec<u8>>> = recovered.iter().map(|d| d.name.clone()).collect();

        assert!(
            names == pre_names || names == post_names,
            "cutoff {} produced a hybrid state",
            cutoff
        );
    }
}
