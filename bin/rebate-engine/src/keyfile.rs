use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{bail, Context, Result};
use rand::RngCore;

/// Loads `BROKER_KEY` from an AES-GCM-encrypted file (§6). A plain
/// `0x`-prefixed key found on first load is re-encrypted in place and the
/// plaintext is returned unchanged; an already-encrypted file is decrypted
/// and returned as-is.
pub fn load_from_file(path: &str, key: &[u8; 32]) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading key file {path}"))?;
    let contents = contents.trim();

    if let Some(plain) = contents.strip_prefix("0x") {
        write_to_file(path, plain, key)?;
        return Ok(plain.to_string());
    }

    decrypt(contents, key)
}

fn write_to_file(path: &str, plaintext: &str, key: &[u8; 32]) -> Result<()> {
    let ciphertext = encrypt(plaintext, key)?;
    std::fs::write(path, ciphertext).with_context(|| format!("writing key file {path}"))
}

/// Encrypts `plaintext`, prepending a freshly generated nonce to the sealed
/// output and hex-encoding the result.
fn encrypt(plaintext: &str, key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("encrypting key file contents: {e}"))?;

    let mut out = nonce_bytes.to_vec();
    out.extend_from_slice(&sealed);
    Ok(hex::encode(out))
}

/// Decrypts a hex-encoded `nonce || ciphertext` blob, the convention
/// [`encrypt`] writes.
fn decrypt(hex_ciphertext: &str, key: &[u8; 32]) -> Result<String> {
    let cipher = Aes256Gcm::new(key.into());
    let raw = hex::decode(hex_ciphertext).context("key file is neither 0x-prefixed nor valid hex")?;
    if raw.len() < 12 {
        bail!("key file ciphertext shorter than the AES-GCM nonce");
    }
    let (nonce_bytes, sealed) = raw.split_at(12);
    #[allow(deprecated)] // aes-gcm 0.10 still exposes the generic-array 0.x constructor
    let nonce = Nonce::from_slice(nonce_bytes);

    let plain = cipher
        .decrypt(nonce, sealed)
        .map_err(|e| anyhow::anyhow!("decrypting key file contents: {e}"))?;
    String::from_utf8(plain).context("decrypted key file contents are not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throwaway_key() -> [u8; 32] {
        [0x11; 32]
    }

    #[test]
    fn plain_0x_key_is_returned_and_reencrypted_in_place() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rebate-engine-keyfile-test-{}", std::process::id()));
        std::fs::write(&path, "0xdeadbeefcafebabe").unwrap();
        let path_str = path.to_str().unwrap();

        let key = throwaway_key();
        let loaded = load_from_file(path_str, &key).unwrap();
        assert_eq!(loaded, "deadbeefcafebabe");

        // Second load now finds an encrypted file and must recover the same plaintext.
        let reloaded = load_from_file(path_str, &key).unwrap();
        assert_eq!(reloaded, "deadbeefcafebabe");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = throwaway_key();
        let ciphertext = encrypt("super-secret-key-material", &key).unwrap();
        let plain = decrypt(&ciphertext, &key).unwrap();
        assert_eq!(plain, "super-secret-key-material");
    }

    #[test]
    fn decrypt_rejects_truncated_ciphertext() {
        let key = throwaway_key();
        assert!(decrypt("ab", &key).is_err());
    }
}
