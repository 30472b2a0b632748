// Sealed-box encryption for GitHub Actions secrets. GitHub hands out a
// base64 X25519 public key per repository and expects every secret value
// sealed against it (libsodium `crypto_box_seal`) and base64 encoded.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, KEY_SIZE};

/// Decode a base64 repository public key.
pub fn decode_public_key(key_b64: &str) -> Result<PublicKey> {
    let raw = STANDARD
        .decode(key_b64.trim())
        .map_err(|e| Error::PublicKey(e.to_string()))?;
    let bytes: [u8; KEY_SIZE] = raw
        .as_slice()
        .try_into()
        .map_err(|_| Error::PublicKey(format!("expected {} bytes, got {}", KEY_SIZE, raw.len())))?;
    Ok(PublicKey::from(bytes))
}

/// Seal `plaintext` for the holder of `key_b64` and return the base64
/// ciphertext. Output differs on every call.
pub fn seal_secret(key_b64: &str, plaintext: &str) -> Result<String> {
    let key = decode_public_key(key_b64)?;
    let sealed = key.seal(&mut OsRng, plaintext.as_bytes()).map_err(|_| Error::Seal)?;
    Ok(STANDARD.encode(sealed))
}
