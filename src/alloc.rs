// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Allocator & directory: name lookup, enumeration, delete, and create over
//! the active descriptor array.
//!
//! A handle is the 1-based slot index of a file's first page — the same
//! number stored in `next` fields and used to compute a data page's
//! physical offset (`handle * PAGE_SIZE`, since slot 0 of the metadata
//! array is the header, not a data page).

use crate::error::{AppFsError, AppFsResult};
use crate::format::{PageDescriptor, MAX_PAGES, USED_DATA, USED_FREE};

/// A file handle: the 1-based descriptor-slot index of its first page.
pub type Handle = u8;

fn descriptor_index(handle: Handle) -> AppFsResult<usize> {
    if handle == 0 || handle as usize > MAX_PAGES {
        return Err(AppFsError::NotFound {
            what: format!("handle {}", handle),
        });
    }
    Ok(handle as usize - 1)
}

/// `true` if `handle` currently resolves to a live file (its own first
/// page, carrying a name).
pub fn is_valid_handle(descriptors: &[PageDescriptor], handle: Handle) -> bool {
    match descriptor_index(handle) {
        Ok(idx) => {
            let d = &descriptors[idx];
            d.used == USED_DATA && d.name.is_some()
        }
        Err(_) => false,
    }
}

/// Find the handle of the first page of the file named `name`, scanning
/// ascending slot order. `name` is compared byte-for-byte, matching
/// invariant 5's byte-equal uniqueness requirement.
pub fn first_page_of(descriptors: &[PageDescriptor], name: &[u8]) -> Option<Handle> {
    for (idx, d) in descriptors.iter().enumerate() {
        if d.used == USED_DATA && d.name.as_deref() == Some(name) {
            return Some((idx + 1) as Handle);
        }
    }
    None
}

/// One directory entry as seen by enumeration.
pub struct Entry {
    pub handle: Handle,
    pub name: Vec<u8>,
    pub size: u32,
}

/// All files, in ascending handle order.
pub fn entries(descriptors: &[PageDescriptor]) -> Vec<Entry> {
    descriptors
        .iter()
        .enumerate()
        .filter_map(|(idx, d)| {
            if d.used == USED_DATA {
                d.name.as_ref().map(|name| Entry {
                    handle: (idx + 1) as Handle,
                    name: name.clone(),
                    size: d.size,
                })
            } else {
                None
            }
        })
        .collect()
}

/// The first handle strictly greater than `after` that names a file, or
/// `None` if there isn't one.
pub fn next_entry(descriptors: &[PageDescriptor], after: Handle) -> Option<Handle> {
    ((after as usize + 1)..=MAX_PAGES).find_map(|idx| {
        let d = &descriptors[idx - 1];
        if d.used == USED_DATA && d.name.is_some() {
            Some(idx as Handle)
        } else {
            None
        }
    })
}

/// `entry_info` for a handle: name and recorded size.
pub fn entry_info(descriptors: &[PageDescriptor], handle: Handle) -> AppFsResult<(Vec<u8>, u32)> {
    if !is_valid_handle(descriptors, handle) {
        return Err(AppFsError::NotFound {
            what: format!("handle {}", handle),
        });
    }
    let idx = descriptor_index(handle)?;
    let d = &descriptors[idx];
    Ok((d.name.clone().unwrap(), d.size))
}

/// Clear every descriptor belonging to `name`'s chain in `descriptors`
/// (working buffer), turning them into blank/free entries. A no-op if the
/// name doesn't exist. Does not commit.
pub fn delete_into(descriptors: &mut [PageDescriptor], name: &[u8]) {
    let Some(first) = first_page_of(descriptors, name) else {
        return;
    };
    let mut cur = first;
    loop {
        let idx = cur as usize - 1;
        let next = descriptors[idx].next;
        descriptors[idx] = PageDescriptor::free();
        if next == 0 {
            break;
        }
        cur = next;
    }
}

/// Allocate and link `need` pages for a new file named `name` of `size`
/// bytes into `descriptors` (working buffer). Any existing file of the
/// same name is deleted first, in the same working buffer, so that
/// replacing a file with an equal-or-smaller one always succeeds even when
/// the old file occupied most of the partition. Returns the new file's
/// handle. Does not commit.
pub fn create_into(
    descriptors: &mut [PageDescriptor],
    name: &[u8],
    size: u32,
) -> AppFsResult<Handle> {
    delete_into(descriptors, name);
    let need = (size as usize).div_ceil(crate::format::PAGE_SIZE as usize).max(1);

    let free: Vec<usize> = descriptors
        .iter()
        .enumerate()
        .filter(|(_, d)| d.used == USED_FREE)
        .map(|(idx, _)| idx)
        .take(need)
        .collect();

    if free.len() < need {
        return Err(AppFsError::NoSpace {
            need: need as u32,
            free: descriptors.iter().filter(|d| d.used == USED_FREE).count() as u32,
        });
    }

    for (i, &idx) in free.iter().enumerate() {
        let next = if i + 1 < free.len() {
            (free[i + 1] + 1) as u8
        } else {
            0
        };
        descriptors[idx] = PageDescriptor {
            name: if i == 0 { Some(name.to_vec()) } else { None },
            size: if i == 0 { size } else { 0xFFFF_FFFF },
            next,
            used: USED_DATA,
        };
    }

    Ok((free[0] + 1) as Handle)
}

/// Free space, in bytes, across the active descriptor array.
pub fn free_space(descriptors: &[PageDescriptor]) -> u32 {
    descriptors.iter().filter(|d| d.used == USED_FREE).count() as u32 * crate::format::PAGE_SIZE
}

/// Space currently occupied by file data, in bytes (`used == DATA` pages).
/// The complement of [`free_space`] among the legal (non-illegal) pages.
pub fn used_space(descriptors: &[PageDescriptor]) -> u32 {
    descriptors.iter().filter(|d| d.used == USED_DATA).count() as u32 * crate::format::PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PAGE_SIZE;

    fn blank_descriptors() -> Vec<PageDescriptor> {
        (0..MAX_PAGES).map(|_| PageDescriptor::free()).collect()
    }

    #[test]
    fn test_create_single_page_file() {
        let mut descriptors = blank_descriptors();
        let handle = create_into(&mut descriptors, b"hello", 100).unwrap();
        assert_eq!(handle, 1);
        assert!(is_valid_handle(&descriptors, 1));
        let (name, size) = entry_info(&descriptors, 1).unwrap();
        assert_eq!(name, b"hello".to_vec());
        assert_eq!(size, 100);
        assert_eq!(descriptors[0].next, 0);
    }

    #[test]
    fn test_create_multi_page_file_links_chain() {
        let mut descriptors = blank_descriptors();
        let size = PAGE_SIZE * 3 + 1;
        let handle = create_into(&mut descriptors, b"big", size).unwrap();
        assert_eq!(handle, 1);
        assert_eq!(descriptors[0].next, 2);
        assert_eq!(descriptors[1].next, 3);
        assert_eq!(descriptors[2].next, 4);
        assert_eq!(descriptors[3].next, 0);
    }

    #[test]
    fn test_create_fails_when_out_of_space() {
        let mut descriptors = blank_descriptors();
        for (idx, d) in descriptors.iter_mut().enumerate() {
            if idx > 0 {
                *d = PageDescriptor::illegal();
            }
        }
        let err = create_into(&mut descriptors, b"too-big", PAGE_SIZE * 2).unwrap_err();
        assert!(matches!(err, AppFsError::NoSpace { need: 2, free: 1 }));
    }

    #[test]
    fn test_delete_frees_whole_chain() {
        let mut descriptors = blank_descriptors();
        create_into(&mut descriptors, b"a", PAGE_SIZE * 2).unwrap();
        delete_into(&mut descriptors, b"a");
        assert!(first_page_of(&descriptors, b"a").is_none());
        assert_eq!(free_space(&descriptors), PAGE_SIZE * MAX_PAGES as u32);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut descriptors = blank_descriptors();
        delete_into(&mut descriptors, b"nope");
        assert_eq!(free_space(&descriptors), PAGE_SIZE * MAX_PAGES as u32);
    }

    #[test]
    fn test_entries_and_next_entry_ascending() {
        let mut descriptors = blank_descriptors();
        create_into(&mut descriptors, b"a", 10).unwrap();
        create_into(&mut descriptors, b"b", 10).unwrap();
        let entries = entries(&descriptors);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, b"a".to_vec());
        assert_eq!(entries[1].name, b"b".to_vec());
        assert_eq!(next_entry(&descriptors, 0), Some(1));
        assert_eq!(next_entry(&descriptors, 1), Some(2));
        assert_eq!(next_entry(&descriptors, 2), None);
    }

    #[test]
    fn test_first_page_of_non_utf8_name_round_trips() {
        let mut descriptors = blank_descriptors();
        let raw: &[u8] = &[0x80, 0xFE, 0x2f, 0x00 + 1];
        create_into(&mut descriptors, raw, 10).unwrap();
        assert_eq!(first_page_of(&descriptors, raw), Some(1));
        let (name, _) = entry_info(&descriptors, 1).unwrap();
        assert_eq!(name, raw.to_vec());
    }
}
