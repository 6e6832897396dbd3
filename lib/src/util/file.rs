use std::{
    fs::File,
    io::Read,
    path::Path,
};

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapOptions};

/// Opens a memory mapped file.
pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open file '{}'", path.as_ref().display()))?;
    let map = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("Failed to mmap file: '{}'", path.as_ref().display()))?;
    Ok(map)
}

/// Reads the first `N` bytes of a file without mapping it.
pub fn read_prefix<const N: usize, P: AsRef<Path>>(path: P) -> Result<[u8; N]> {
    let mut file = File::open(&path)
        .with_context(|| format!("Failed to open file '{}'", path.as_ref().display()))?;
    let mut buf = [0u8; N];
    file.read_exact(&mut buf)
        .with_context(|| format!("Failed to read header of '{}'", path.as_ref().display()))?;
    Ok(buf)
}
