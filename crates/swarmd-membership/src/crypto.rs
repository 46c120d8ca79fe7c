//! Payload encryption and join-token hashing. Kept as a narrow sub-module,
//! separate from the gossip and handshake logic that uses it.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use swarmd_core::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Hashes an arbitrary-length shared secret down to the 32 bytes AES-256
/// needs, leaving an already-32-byte secret untouched.
pub fn derive_key(secret: &[u8]) -> [u8; 32] {
    if secret.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(secret);
        return key;
    }
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.finalize().into()
}

/// Generates a fresh 32-byte shared secret for first-node bootstrap.
pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Seals `plaintext` with a fresh random nonce, returning
/// `nonce(12) || ciphertext || gcm_tag`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // AES-256-GCM with a random 96-bit nonce and a key never reused across
    // processes only fails to encrypt on allocation failure; any crypto
    // error here means the frame could not be authenticated, never a case
    // we silently retry.
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption failed");
    let mut frame = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(&ciphertext);
    frame
}

/// Opens a sealed frame. Any malformed or tampered frame returns
/// [`Error::DecryptFailure`] and must never be forwarded to the message
/// handler.
pub fn open(key: &[u8; 32], frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < NONCE_LEN {
        return Err(Error::DecryptFailure);
    }
    let (nonce_bytes, ciphertext) = frame.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::DecryptFailure)
}

/// Generates a fresh join token: 24 random bytes, shown to the operator as
/// URL-safe text.
pub fn generate_token() -> (Vec<u8>, String) {
    let mut raw = vec![0u8; 24];
    OsRng.fill_bytes(&mut raw);
    let text = URL_SAFE_NO_PAD.encode(&raw);
    (raw, text)
}

type HmacSha256 = Hmac<Sha256>;

/// Keyed hash of a token's raw bytes under the shared secret, used to
/// validate a token without needing to keep every issued token's plaintext
/// around.
pub fn hash_token(secret: &[u8; 32], raw_token: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(raw_token);
    mac.finalize().into_bytes().into()
}

/// Decodes a URL-safe, unpadded base64 token as shown to operators back to
/// its raw bytes.
pub fn decode_token_text(text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| Error::InvalidInput(format!("malformed join token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = derive_key(b"a short secret");
        let plaintext = b"hello cluster";
        let frame = seal(&key, plaintext);
        assert_eq!(open(&key, &frame).unwrap(), plaintext);
    }

    #[test]
    fn tampered_frame_fails_to_decrypt() {
        let key = derive_key(b"another secret");
        let mut frame = seal(&key, b"payload");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(open(&key, &frame), Err(Error::DecryptFailure)));
    }

    #[test]
    fn truncated_frame_fails_to_decrypt() {
        let key = derive_key(b"yet another secret");
        assert!(matches!(open(&key, &[0u8; 4]), Err(Error::DecryptFailure)));
    }

    #[test]
    fn token_hash_is_reproducible_from_decoded_text() {
        let secret = generate_secret();
        let (raw, text) = generate_token();
        let decoded = decode_token_text(&text).unwrap();
        assert_eq!(decoded, raw);
        assert_eq!(hash_token(&secret, &raw), hash_token(&secret, &decoded));
    }
}
