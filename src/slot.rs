// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Slot manager: locates the authoritative metadata slot at mount time and
//! drives the atomic two-slot commit protocol for every mutation.

use crate::error::AppFsResult;
use crate::flash::Flash;
use crate::format::{
    self, compute_crc, decode_slot, encode_slot, Header, PageDescriptor, MAX_PAGES,
    META_SLOT_SIZE, PAGE_SIZE,
};

/// Distinguishes a clean mount from one that had to reinitialize the
/// partition because neither metadata slot validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// An existing valid slot was found and adopted.
    Recovered,
    /// Neither slot validated; the partition was erased and a fresh,
    /// empty metadata image was written. All previously stored files, if
    /// any, are gone.
    Reinitialized,
}

/// Owns the in-memory active-slot index and the currently active
/// descriptor array, and performs commits.
pub struct SlotManager {
    active: usize,
    serial: u32,
}

impl SlotManager {
    /// Find the active slot, or reinitialize the partition if neither slot
    /// validates. Returns the manager, the active descriptor array, and
    /// which of the two happened.
    pub fn mount<F: Flash>(flash: &mut F) -> AppFsResult<(Self, Vec<PageDescriptor>, InitOutcome)> {
        let mut candidates: Vec<(usize, u32, Vec<PageDescriptor>)> = Vec::new();

        for slot in 0..format::META_SLOT_COUNT {
            let raw = flash.read(slot as u32 * META_SLOT_SIZE, META_SLOT_SIZE)?;
            let (header, descriptors) = match decode_slot(&raw) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let Some(header) = header else { continue };
            let expected_crc = compute_crc(&header, &descriptors);
            if expected_crc == header.crc32 {
                candidates.push((slot, header.serial, descriptors));
            }
        }

        // Strictly greater serial wins; a single valid slot is simply
        // selected, per spec.md §9's resolved Open Question.
        let best = candidates
            .into_iter()
            .max_by_key(|(_, serial, _)| *serial);

        if let Some((slot, serial, descriptors)) = best {
            return Ok((
                Self {
                    active: slot,
                    serial,
                },
                descriptors,
                InitOutcome::Recovered,
            ));
        }

        // Neither slot valid: reinitialize.
        flash.erase(0, PAGE_SIZE)?;
        let last_page = (flash.partition_size() / PAGE_SIZE) as usize;
        let mut descriptors = Vec::with_capacity(MAX_PAGES);
        for page in 0..MAX_PAGES {
            // `page` is a data-page index; physical page `page + 1` must
            // stay below the partition's total page count to be usable.
            if page >= last_page.saturating_sub(1) {
                descriptors.push(PageDescriptor::illegal());
            } else {
                descriptors.push(PageDescriptor::free());
            }
        }
        let image = encode_slot(0, &descriptors);
        flash.write(0, &image)?;

        Ok((
            Self {
                active: 0,
                serial: 0,
            },
            descriptors,
            InitOutcome::Reinitialized,
        ))
    }

    pub fn active_slot(&self) -> usize {
        self.active
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Commit a new descriptor array: erase the inactive slot, write every
    /// non-blank descriptor, write the header with its final CRC last (the
    /// linearization point), then flip the in-memory active index.
    ///
    /// An I/O error at any point before the header write leaves the
    /// previously active slot authoritative; the caller may retry.
    pub fn commit<F: Flash>(
        &mut self,
        flash: &mut F,
        descriptors: &[PageDescriptor],
    ) -> AppFsResult<()> {
        assert_eq!(descriptors.len(), MAX_PAGES);
        let new_slot = (self.active + 1) % format::META_SLOT_COUNT;
        let new_serial = self.serial.wrapping_add(1);

        flash.erase(new_slot as u32 * META_SLOT_SIZE, META_SLOT_SIZE)?;

        for (j, d) in descriptors.iter().enumerate() {
            if d.is_blank() {
                continue; // already 0xFF after the erase above.
            }
            let offset = new_slot as u32 * META_SLOT_SIZE + (j as u32 + 1) * 128;
            flash.write(offset, &d.to_bytes())?;
        }

        let header = Header {
            serial: new_serial,
            crc32: 0,
        };
        let crc = compute_crc(&header, descriptors);
        let header = Header {
            serial: new_serial,
            crc32: crc,
        };
        flash.write(new_slot as u32 * META_SLOT_SIZE, &header.to_bytes())?;

        self.active = new_slot;
        self.serial = new_serial;
        Ok(())
    }
}
