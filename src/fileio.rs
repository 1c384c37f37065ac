// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! File I/O: translates `(handle, offset, length)` into chains of physical
//! pages for read, write, erase, and mmap.

use crate::alloc::{entry_info, is_valid_handle, Handle};
use crate::error::{AppFsError, AppFsResult};
use crate::flash::{Flash, MappedRegion};
use crate::format::{PageDescriptor, PAGE_SIZE};

/// Walk `next` pointers from `handle`, `floor(offset / PAGE_SIZE)` times.
/// Returns the page handle containing `offset` and the offset within it.
fn translate(
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
) -> AppFsResult<(Handle, u32)> {
    let mut page = handle;
    let mut remaining = offset;
    while remaining >= PAGE_SIZE {
        let idx = page as usize - 1;
        let next = descriptors[idx].next;
        if next == 0 {
            return Err(AppFsError::InvalidSize {
                reason: "offset beyond end of chain".to_string(),
            });
        }
        page = next;
        remaining -= PAGE_SIZE;
    }
    Ok((page, remaining))
}

/// Collect the ordered chain of page handles covering
/// `[offset, offset + length)` of a file.
fn chain_for_range(
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
    length: u32,
) -> AppFsResult<Vec<Handle>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let (mut page, mut page_offset) = translate(descriptors, handle, offset)?;
    let mut pages = Vec::new();
    let mut remaining = length;
    loop {
        pages.push(page);
        let take = (PAGE_SIZE - page_offset).min(remaining);
        remaining -= take;
        if remaining == 0 {
            break;
        }
        let idx = page as usize - 1;
        page = descriptors[idx].next;
        page_offset = 0;
        if page == 0 {
            return Err(AppFsError::InvalidSize {
                reason: "range beyond end of chain".to_string(),
            });
        }
    }
    Ok(pages)
}

fn check_bounds(descriptors: &[PageDescriptor], handle: Handle, offset: u32, length: u32) -> AppFsResult<()> {
    if !is_valid_handle(descriptors, handle) {
        return Err(AppFsError::NotFound {
            what: format!("handle {}", handle),
        });
    }
    let (_, size) = entry_info(descriptors, handle)?;
    let end = offset.checked_add(length).ok_or_else(|| AppFsError::InvalidSize {
        reason: "offset + length overflows".to_string(),
    })?;
    if end > size {
        return Err(AppFsError::InvalidSize {
            reason: format!("offset {} + length {} exceeds file size {}", offset, length, size),
        });
    }
    Ok(())
}

/// Read `length` bytes starting at `offset` of `handle`'s file.
pub fn read<F: Flash>(
    flash: &F,
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
    length: u32,
) -> AppFsResult<Vec<u8>> {
    check_bounds(descriptors, handle, offset, length)?;
    if length == 0 {
        return Ok(Vec::new());
    }
    let (mut page, mut page_offset) = translate(descriptors, handle, offset)?;
    let mut out = Vec::with_capacity(length as usize);
    let mut remaining = length;
    loop {
        let take = (PAGE_SIZE - page_offset).min(remaining);
        let base = page as u32 * PAGE_SIZE + page_offset;
        out.extend_from_slice(&flash.read(base, take)?);
        remaining -= take;
        if remaining == 0 {
            break;
        }
        let idx = page as usize - 1;
        page = descriptors[idx].next;
        page_offset = 0;
    }
    Ok(out)
}

/// Write `bytes` starting at `offset` of `handle`'s file. The caller is
/// responsible for having erased the affected range first if any bit
/// needs to go from 0 to 1.
pub fn write<F: Flash>(
    flash: &mut F,
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
    bytes: &[u8],
) -> AppFsResult<()> {
    check_bounds(descriptors, handle, offset, bytes.len() as u32)?;
    if bytes.is_empty() {
        return Ok(());
    }
    let (mut page, mut page_offset) = translate(descriptors, handle, offset)?;
    let mut written = 0usize;
    loop {
        let take = ((PAGE_SIZE - page_offset) as usize).min(bytes.len() - written);
        let base = page as u32 * PAGE_SIZE + page_offset;
        flash.write(base, &bytes[written..written + take])?;
        written += take;
        if written == bytes.len() {
            break;
        }
        let idx = page as usize - 1;
        page = descriptors[idx].next;
        page_offset = 0;
    }
    Ok(())
}

/// Erase `length` bytes (rounded up to whole pages) starting at `offset`
/// of `handle`'s file. Partial-page erase is not supported; every page
/// fully contained in the rounded range is erased.
pub fn erase<F: Flash>(
    flash: &mut F,
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
    length: u32,
) -> AppFsResult<()> {
    check_bounds(descriptors, handle, offset, length)?;
    if length == 0 {
        return Ok(());
    }
    let rounded_len = offset % PAGE_SIZE + length;
    let rounded_len = rounded_len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let aligned_offset = offset - offset % PAGE_SIZE;
    for page in chain_for_range(descriptors, handle, aligned_offset, rounded_len)? {
        flash.erase(page as u32 * PAGE_SIZE, PAGE_SIZE)?;
    }
    Ok(())
}

/// Map `[offset, offset + length)` of `handle`'s file into one contiguous
/// virtual window, returning the mapping and the byte offset into it at
/// which the requested range begins.
pub fn mmap<F: Flash>(
    flash: &F,
    descriptors: &[PageDescriptor],
    handle: Handle,
    offset: u32,
    length: u32,
) -> AppFsResult<(MappedRegion, u32)> {
    if length == 0 {
        return Err(AppFsError::InvalidSize {
            reason: "mmap length must be non-zero".to_string(),
        });
    }
    check_bounds(descriptors, handle, offset, length)?;
    let page_offset = offset % PAGE_SIZE;
    let aligned_offset = offset - page_offset;
    let span = page_offset + length;
    let pages = chain_for_range(descriptors, handle, aligned_offset, span)?;
    let physical: Vec<u32> = pages.iter().map(|&p| p as u32).collect();
    let region = flash.mmap_pages(&physical)?;
    Ok((region, page_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::create_into;
    use crate::flash::MemFlash;
    use crate::format::MAX_PAGES;

    fn setup(size: u32) -> (MemFlash, Vec<PageDescriptor>, Handle) {
        let flash = MemFlash::new(size);
        let mut descriptors: Vec<PageDescriptor> = (0..MAX_PAGES).map(|_| PageDescriptor::free()).collect();
        let handle = create_into(&mut descriptors, b"f", size / 4).unwrap();
        (flash, descriptors, handle)
    }

    #[test]
    fn test_write_then_read_single_page() {
        let (mut flash, descriptors, handle) = setup(PAGE_SIZE * 4);
        write(&mut flash, &descriptors, handle, 0, b"hello").unwrap();
        let out = read(&flash, &descriptors, handle, 0, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_write_then_read_across_page_boundary() {
        let (mut flash, mut descriptors, _) = setup(PAGE_SIZE * 4);
        // Replace with a file sized to span exactly two pages.
        for d in descriptors.iter_mut() {
            *d = PageDescriptor::free();
        }
        let handle = create_into(&mut descriptors, b"spanning", PAGE_SIZE + 10).unwrap();
        let data: Vec<u8> = (0..(PAGE_SIZE as usize + 10)).map(|i| (i % 251) as u8).collect();
        write(&mut flash, &descriptors, handle, 0, &data).unwrap();
        let out = read(&flash, &descriptors, handle, 0, data.len() as u32).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_read_past_end_of_file_errors() {
        let (flash, descriptors, handle) = setup(PAGE_SIZE * 4);
        assert!(read(&flash, &descriptors, handle, 0, PAGE_SIZE * 2).is_err());
    }

    #[test]
    fn test_read_unknown_handle_errors() {
        let (flash, descriptors, _) = setup(PAGE_SIZE * 4);
        assert!(matches!(
            read(&flash, &descriptors, 99, 0, 1),
            Err(AppFsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_mmap_returns_requested_bytes_at_right_offset() {
        let (mut flash, descriptors, handle) = setup(PAGE_SIZE * 4);
        write(&mut flash, &descriptors, handle, 0, b"hello").unwrap();
        let (region, page_offset) = mmap(&flash, &descriptors, handle, 0, 5).unwrap();
        assert_eq!(page_offset, 0);
        assert_eq!(&region[0..5], b"hello");
    }
}
