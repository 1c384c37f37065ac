// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! On-flash metadata format: constants, header/descriptor layout, and the
//! CRC-32 codec that binds them together.
//!
//! ## Slot layout
//! ```text
//! Offset 0:                Slot[0] (32768 bytes)
//!   bytes 0..128:   Header
//!   bytes 128..32768: 255 PageDescriptors (128 bytes each)
//! Offset 32768:            Slot[1] (32768 bytes), same shape
//! ```
//!
//! CRC-32 covers the header (with its `crc32` field zeroed) followed by all
//! 255 descriptors, using the reflected polynomial 0xEDB88320 seeded at 0 —
//! the same variant `crc32fast` implements by default.

use crate::error::{AppFsError, AppFsResult};

/// One MMU page / one flash sector, as far as AppFs is concerned.
pub const PAGE_SIZE: u32 = 65_536;
/// Size of one metadata slot (half of the first flash page).
pub const META_SLOT_SIZE: u32 = PAGE_SIZE / 2;
/// Number of metadata slots (ping-pong pair).
pub const META_SLOT_COUNT: usize = 2;
/// Size of one descriptor (header or page descriptor) in bytes.
pub const DESCRIPTOR_SIZE: usize = 128;
/// Descriptors per slot: one header plus 255 page descriptors.
pub const DESCRIPTORS_PER_SLOT: usize = META_SLOT_SIZE as usize / DESCRIPTOR_SIZE;
/// Highest addressable data page index (page 0 is metadata, never data).
pub const MAX_PAGES: usize = DESCRIPTORS_PER_SLOT - 1;
/// On-flash magic identifying a valid header.
pub const MAGIC: [u8; 8] = *b"AppFsDsc";

/// Page is erased and available for allocation.
pub const USED_FREE: u8 = 0xFF;
/// Page is allocated to a file.
pub const USED_DATA: u8 = 0x00;
/// Page is physically outside the partition; never allocatable.
pub const USED_ILLEGAL: u8 = 0x55;

const NAME_LEN: usize = 112;

/// Metadata slot header (first descriptor slot of each metadata slot).
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub serial: u32,
    pub crc32: u32,
}

impl Header {
    /// Serialise to the on-flash 128-byte representation.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0xFFu8; DESCRIPTOR_SIZE];
        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..12].copy_from_slice(&self.serial.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        // bytes[16..128] stay 0xFF (reserved).
        bytes
    }

    /// Parse a 128-byte slice, validating only the magic. Callers that need
    /// CRC validation call [`compute_crc`] separately and compare.
    ///
    /// Returns `None` if the magic does not match.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != DESCRIPTOR_SIZE || bytes[0..8] != MAGIC {
            return None;
        }
        let serial = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let crc32 = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Some(Self { serial, crc32 })
    }
}

/// One page descriptor (one per data page slot).
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// Zero-terminated raw byte-string name; only meaningful on a file's
    /// first page. All-0xFF (and absent) otherwise.
    ///
    /// Stored as raw bytes, not `String`: spec.md §3 defines this as an
    /// arbitrary byte string (the `/` byte is explicitly permitted and
    /// carries no meaning), and invariant 5 requires byte-exact equality
    /// and uniqueness, which a lossy UTF-8 decode would silently violate
    /// for names written by another language's implementation or coming
    /// from a non-UTF-8 host filename.
    pub name: Option<Vec<u8>>,
    /// File size in bytes; only meaningful on a file's first page.
    pub size: u32,
    /// Index of the next page in the chain, or 0 to terminate.
    pub next: u8,
    /// One of `USED_FREE` / `USED_DATA` / `USED_ILLEGAL`.
    pub used: u8,
}

impl PageDescriptor {
    /// A descriptor representing a freshly erased (free) page.
    pub fn free() -> Self {
        Self {
            name: None,
            size: 0xFFFF_FFFF,
            next: 0xFF,
            used: USED_FREE,
        }
    }

    /// A descriptor marking a page as outside the physical partition.
    pub fn illegal() -> Self {
        Self {
            name: None,
            size: 0xFFFF_FFFF,
            next: 0xFF,
            used: USED_ILLEGAL,
        }
    }

    /// `true` if this descriptor's on-flash encoding is all-0xFF (erased).
    pub fn is_blank(&self) -> bool {
        self.used == USED_FREE && self.name.is_none()
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0xFFu8; DESCRIPTOR_SIZE];
        if let Some(name) = &self.name {
            let n = name.len().min(NAME_LEN - 1);
            bytes[0..n].copy_from_slice(&name[0..n]);
            bytes[n] = 0; // NUL terminator
            for b in &mut bytes[n + 1..NAME_LEN] {
                *b = 0xFF;
            }
        }
        bytes[112..116].copy_from_slice(&self.size.to_le_bytes());
        bytes[116] = self.next;
        bytes[117] = self.used;
        // bytes[118..128] stay 0xFF (reserved).
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> AppFsResult<Self> {
        if bytes.len() != DESCRIPTOR_SIZE {
            return Err(AppFsError::IoError {
                operation: "parse_descriptor".to_string(),
                reason: format!("expected {} bytes, got {}", DESCRIPTOR_SIZE, bytes.len()),
            });
        }
        let name = if bytes[0] == 0xFF {
            None
        } else {
            let nul = bytes[0..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            Some(bytes[0..nul].to_vec())
        };
        let size = u32::from_le_bytes(bytes[112..116].try_into().unwrap());
        let next = bytes[116];
        let used = bytes[117];
        Ok(Self {
            name,
            size,
            next,
            used,
        })
    }
}

/// Compute the CRC-32/LE over a header (with its crc32 field zeroed) and
/// 255 descriptors, in the order spec.md §6 requires.
pub fn compute_crc(header: &Header, descriptors: &[PageDescriptor]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let mut header_bytes = header.to_bytes();
    header_bytes[12..16].copy_from_slice(&0u32.to_le_bytes());
    hasher.update(&header_bytes);
    for d in descriptors {
        hasher.update(&d.to_bytes());
    }
    hasher.finalize()
}

/// Build the raw 32768-byte image for a slot from a header and 255
/// descriptors, embedding the final CRC in the header.
pub fn encode_slot(serial: u32, descriptors: &[PageDescriptor]) -> Vec<u8> {
    assert_eq!(descriptors.len(), MAX_PAGES);
    let mut header = Header { serial, crc32: 0 };
    header.crc32 = compute_crc(&header, descriptors);

    let mut out = Vec::with_capacity(META_SLOT_SIZE as usize);
    out.extend_from_slice(&header.to_bytes());
    for d in descriptors {
        out.extend_from_slice(&d.to_bytes());
    }
    out
}

/// Parse a raw 32768-byte slot into a header and its 255 descriptors,
/// without validating the CRC (callers compare against [`compute_crc`]).
pub fn decode_slot(bytes: &[u8]) -> AppFsResult<(Option<Header>, Vec<PageDescriptor>)> {
    if bytes.len() != META_SLOT_SIZE as usize {
        return Err(AppFsError::IoError {
            operation: "parse_slot".to_string(),
            reason: format!("expected {} bytes, got {}", META_SLOT_SIZE, bytes.len()),
        });
    }
    let header = Header::from_bytes(&bytes[0..DESCRIPTOR_SIZE]);
    let mut descriptors = Vec::with_capacity(MAX_PAGES);
    for j in 1..DESCRIPTORS_PER_SLOT {
        let start = j * DESCRIPTOR_SIZE;
        descriptors.push(PageDescriptor::from_bytes(&bytes[start..start + DESCRIPTOR_SIZE])?);
    }
    Ok((header, descriptors))
}
