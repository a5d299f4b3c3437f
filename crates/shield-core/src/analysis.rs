//! Pure content analysis over file bytes.
//!
//! Streaming SHA-256, byte-frequency Shannon entropy and leading
//! magic-number checks. Everything here is stateless and callable from any
//! worker task.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for streaming reads (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Magic signatures keyed by lowercase final extension. Extensions absent
/// from this table are not applicable and pass unconditionally.
const SIGNATURES: &[(&str, &[u8])] = &[
    ("png", &[0x89, 0x50, 0x4E, 0x47]),
    ("jpg", &[0xFF, 0xD8, 0xFF]),
    ("zip", &[0x50, 0x4B, 0x03, 0x04]),
];

/// Stream a file through SHA-256 in fixed-size chunks.
///
/// Returns `None` when the file cannot be opened or read; callers treat an
/// unhashable file as not observable.
pub fn hash_file(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(_) => return None,
        }
    }
    Some(hex::encode(hasher.finalize()))
}

/// Byte-frequency Shannon entropy of the whole file, in `[0.0, 8.0]`.
///
/// An empty file and any I/O failure both yield `0.0`.
pub fn entropy(path: &Path) -> f64 {
    match std::fs::read(path) {
        Ok(data) => shannon_entropy(&data),
        Err(_) => 0.0,
    }
}

/// Shannon entropy of a byte slice (0.0 = uniform, 8.0 = maximally random).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Check the file's leading bytes against the magic table for its final
/// extension. A read failure counts as a failed check.
pub fn signature_ok(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return true,
    };
    let required = match SIGNATURES.iter().find(|(known, _)| *known == ext) {
        Some((_, magic)) => *magic,
        None => return true,
    };
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut head = vec![0u8; required.len()];
    match file.read_exact(&mut head) {
        Ok(()) => head == required,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn hash_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hash_missing_file_is_none() {
        assert!(hash_file(Path::new("/nonexistent/nope.bin")).is_none());
    }

    #[test]
    fn entropy_of_empty_file_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();
        assert_eq!(entropy(&path), 0.0);
    }

    #[test]
    fn entropy_of_uniform_data_is_zero() {
        assert_eq!(shannon_entropy(&[0u8; 4096]), 0.0);
    }

    #[test]
    fn entropy_of_full_byte_spread_is_eight() {
        let mut data = Vec::with_capacity(256 * 16);
        for b in 0..=255u8 {
            data.extend(std::iter::repeat(b).take(16));
        }
        assert!((shannon_entropy(&data) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_on_io_failure_is_zero() {
        assert_eq!(entropy(Path::new("/nonexistent/nope.bin")), 0.0);
    }

    #[test]
    fn png_magic_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();
        assert!(signature_ok(&path));
    }

    #[test]
    fn corrupted_png_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(!signature_ok(&path));
    }

    #[test]
    fn unknown_extension_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [0u8; 8]).unwrap();
        assert!(signature_ok(&path));
    }

    #[test]
    fn unreadable_known_extension_fails() {
        assert!(!signature_ok(Path::new("/nonexistent/photo.png")));
    }

    #[test]
    fn extension_is_final_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.2024.zip");
        std::fs::write(&path, [0x50, 0x4B, 0x03, 0x04, 0x00]).unwrap();
        assert!(signature_ok(&path));
    }
}
