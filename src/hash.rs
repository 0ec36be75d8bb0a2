//! File hashing for checksum comparison mode

use blake3;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};

/// Hash a file with BLAKE3, picking a read strategy by size.
pub fn hash_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::access(path, e))?;
    let file_size = file.metadata().map_err(|e| Error::access(path, e))?.len();
    let hash = if file_size < 1024 {
        hash_small_file(file)
    } else if file_size > 1024 * 1024 {
        hash_large_file(&file)
    } else {
        hash_medium_file(file)
    };
    hash.map_err(|e| Error::access(path, e))
}

/// Hash a small file (<1KB) in one read.
fn hash_small_file(mut file: File) -> std::io::Result<Vec<u8>> {
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(blake3::hash(&content).as_bytes().to_vec())
}

/// Hash a medium-sized file (1KB-1MB) through a buffered reader.
fn hash_medium_file(file: File) -> std::io::Result<Vec<u8>> {
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 32768];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().as_bytes().to_vec())
}

/// Hash a large file (>1MB) through a memory map.
fn hash_large_file(file: &File) -> std::io::Result<Vec<u8>> {
    // SAFETY: the map is read-only and dropped before returning.
    let mmap = unsafe { Mmap::map(file)? };
    let hash = blake3::Hasher::new().update(&mmap).finalize();
    Ok(hash.as_bytes().to_vec())
}
