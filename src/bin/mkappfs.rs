// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! mkappfs - build an AppFs partition image from a set of host files.

use anyhow::{anyhow, Context};
use appfs::{AppFs, MemFlash, PAGE_SIZE};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mkappfs")]
#[command(author = "Vivian Voss <ask@vvoss.dev>")]
#[command(version = "0.1.0")]
#[command(about = "Build an AppFs partition image", long_about = None)]
struct Cli {
    /// Partition size in bytes
    size: u32,

    /// Output image path
    out: PathBuf,

    /// Files to embed, as `path` or `path:stored-name`
    files: Vec<String>,
}

/// Raw bytes of an `OsStr`, preserving non-UTF-8 host filenames exactly
/// (spec.md §3 permits arbitrary name bytes). Falls back to a lossy
/// conversion on platforms without a raw-byte view of `OsStr`.
#[cfg(unix)]
fn os_str_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_str_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}

fn parse_file_arg(arg: &str) -> (PathBuf, Vec<u8>) {
    match arg.split_once(':') {
        Some((path, name)) => (PathBuf::from(path), name.as_bytes().to_vec()),
        None => {
            let path = PathBuf::from(arg);
            let name = path
                .file_name()
                .map(os_str_bytes)
                .unwrap_or_else(|| arg.as_bytes().to_vec());
            (path, name)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.size % PAGE_SIZE != 0 {
        return Err(anyhow!(
            "partition size must be a multiple of the page size ({} bytes)",
            PAGE_SIZE
        ));
    }

    let flash = MemFlash::new(cli.size);
    let (filesystem, _outcome) = AppFs::new(flash).context("initializing partition")?;

    for arg in &cli.files {
        let (path, name) = parse_file_arg(arg);
        let display_name = String::from_utf8_lossy(&name).into_owned();
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let handle = filesystem
            .create(&name, data.len() as u32)
            .with_context(|| format!("allocating {}", display_name))?;
        if !data.is_empty() {
            filesystem
                .write(handle, 0, &data)
                .with_context(|| format!("writing {}", display_name))?;
        }
        println!("{} -> page {} ({} bytes)", display_name, handle, data.len());
    }

    println!("{}", filesystem.dump());

    let image = trim_trailing_blank(filesystem.read_partition().context("reading back partition image")?);
    fs::write(&cli.out, &image).with_context(|| format!("writing {}", cli.out.display()))?;
    println!("wrote {} ({} bytes)", cli.out.display(), image.len());

    Ok(())
}

/// Trim trailing all-0xFF 1 KiB blocks so the image on disk doesn't carry
/// the whole erased tail of a large, mostly-empty partition.
fn trim_trailing_blank(mut image: Vec<u8>) -> Vec<u8> {
    const BLOCK: usize = 1024;
    while image.len() >= BLOCK && image[image.len() - BLOCK..].iter().all(|&b| b == 0xFF) {
        image.truncate(image.len() - BLOCK);
    }
    image
}
