//! Change-classification policy.
//!
//! Compressed or encrypted payloads (typical ransomware output) exhibit
//! high byte entropy, while plain documents and source code do not. Media
//! containers are already high-entropy, so they are judged by their magic
//! signature instead: wholesale replacement by an encrypted blob destroys
//! the leading bytes.

use shield_core::analysis;
use std::path::Path;

/// Extensions judged by magic signature rather than entropy.
const MEDIA_EXTENSIONS: &[&str] = &["jpg", "png", "zip", "pdf"];

/// Entropy above this marks a non-media change as hostile.
pub const ENTROPY_THRESHOLD: f64 = 7.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Legitimate,
    Attack,
}

/// Whether the final extension selects the signature path.
pub fn is_media(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Classify a detected content change on `path`.
pub fn classify(path: &Path) -> Verdict {
    let media = is_media(path);
    let signature = if media { analysis::signature_ok(path) } else { true };
    let entropy = if media { 0.0 } else { analysis::entropy(path) };
    decide(media, signature, entropy)
}

/// The pure decision, split out so the threshold boundary is testable
/// without crafting files of a precise entropy.
pub fn decide(media: bool, signature_ok: bool, entropy: f64) -> Verdict {
    if media {
        if signature_ok {
            Verdict::Legitimate
        } else {
            Verdict::Attack
        }
    } else if entropy > ENTROPY_THRESHOLD {
        Verdict::Attack
    } else {
        Verdict::Legitimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entropy_threshold_is_exclusive() {
        assert_eq!(decide(false, true, 7.499), Verdict::Legitimate);
        assert_eq!(decide(false, true, 7.5), Verdict::Legitimate);
        assert_eq!(decide(false, true, 7.501), Verdict::Attack);
    }

    #[test]
    fn media_ignores_entropy() {
        // A valid container is legitimate no matter how dense its payload.
        assert_eq!(decide(true, true, 8.0), Verdict::Legitimate);
        // A broken signature is hostile even for low-entropy content.
        assert_eq!(decide(true, false, 0.0), Verdict::Attack);
    }

    #[test]
    fn media_selection_uses_final_suffix() {
        assert!(is_media(Path::new("/data/photo.png")));
        assert!(is_media(Path::new("/data/PHOTO.PNG")));
        assert!(is_media(Path::new("/data/backup.2024.zip")));
        assert!(!is_media(Path::new("/data/notes.zip.txt")));
        assert!(!is_media(Path::new("/data/no_extension")));
    }

    #[test]
    fn corrupted_png_is_attack_regardless_of_entropy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        // All zeros: entropy 0.0, magic destroyed.
        std::fs::write(&path, [0u8; 128]).unwrap();
        assert_eq!(classify(&path), Verdict::Attack);
    }

    #[test]
    fn plain_text_is_legitimate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world\n").unwrap();
        assert_eq!(classify(&path), Verdict::Legitimate);
    }

    #[test]
    fn empty_file_is_legitimate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(classify(&path), Verdict::Legitimate);
    }
}
