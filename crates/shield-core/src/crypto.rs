use anyhow::{anyhow, Result};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Load the raw symmetric key from `path`, generating and persisting a fresh
/// one on first use. On Unix the file is restricted to the owner.
pub fn load_or_generate_key(path: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if path.exists() {
        let bytes = fs::read(path)?;
        if bytes.len() != KEY_LEN {
            return Err(anyhow!("key file {} has invalid length", path.display()));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    fs::write(path, &key[..])?;
    restrict_permissions(path);
    Ok(key)
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %e, "cannot restrict key file permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Encrypt `plaintext`, prepending the random nonce to the ciphertext.
/// Output is nondeterministic: equal inputs never produce equal blobs.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| anyhow!("encrypt: {e}"))?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Reverse of [`seal`]. Fails on truncation, tampering or a wrong key.
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(anyhow!("sealed blob too short"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("decrypt: {e}"))
}

/// Deterministic keyed digest of a path string. Because [`seal`] is
/// nondeterministic, this digest is what enforces one-row-per-path in the
/// baseline store.
pub fn path_digest(key: &[u8; KEY_LEN], path: &str) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(path.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> Zeroizing<[u8; KEY_LEN]> {
        let mut k = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut k[..]);
        k
    }

    #[test]
    fn seal_open_roundtrip() {
        let k = key();
        let sealed = seal(&k, b"/etc/hosts").unwrap();
        assert_eq!(open(&k, &sealed).unwrap(), b"/etc/hosts");
    }

    #[test]
    fn seal_is_nondeterministic() {
        let k = key();
        assert_ne!(seal(&k, b"same").unwrap(), seal(&k, b"same").unwrap());
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let sealed = seal(&key(), b"secret").unwrap();
        assert!(open(&key(), &sealed).is_err());
    }

    #[test]
    fn digest_is_deterministic_and_keyed() {
        let k1 = key();
        let k2 = key();
        assert_eq!(path_digest(&k1, "/a/b"), path_digest(&k1, "/a/b"));
        assert_ne!(path_digest(&k1, "/a/b"), path_digest(&k2, "/a/b"));
        assert_ne!(path_digest(&k1, "/a/b"), path_digest(&k1, "/a/c"));
    }

    #[test]
    fn key_file_persists_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let first = load_or_generate_key(&path).unwrap();
        let second = load_or_generate_key(&path).unwrap();
        assert_eq!(*first, *second);
    }
}
