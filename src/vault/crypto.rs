use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

pub type ContextKey = Zeroizing<[u8; KEY_LEN]>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encrypted payload is corrupt: {0}")]
    Corrupt(String),
    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

pub fn random_key_32() -> ContextKey {
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    rand::thread_rng().fill_bytes(&mut out[..]);
    out
}

pub fn key_from_slice(raw: &[u8]) -> Result<ContextKey, CryptoError> {
    if raw.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(raw.len()));
    }
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(raw);
    Ok(out)
}

/// Seal `plaintext` as `nonce || ciphertext || tag`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Corrupt(format!(
            "payload is {} bytes, shorter than the {NONCE_LEN}-byte nonce",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
