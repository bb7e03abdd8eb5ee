use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Encryption failed")]
    EncryptionError,
    #[error("Decryption failed")]
    DecryptionError,
}

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

// Tests hash a handful of passwords per case; keep them fast.
const PBKDF2_ROUNDS: u32 = if cfg!(test) { 1_000 } else { 100_000 };

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn generate_secret() -> [u8; KEY_LEN] {
    let mut secret = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    // Only fails on an invalid output length, which KEY_LEN is not.
    let _ = pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Returns `(hash_hex, salt_hex)` for storage.
pub fn hash_password(password: &str) -> (String, String) {
    let salt = generate_salt();
    let hash = derive_key(password, &salt);
    (hex::encode(hash), hex::encode(salt))
}

pub fn verify_password(password: &str, salt_hex: &str, hash_hex: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    let actual = derive_key(password, &salt);
    constant_time_eq(&actual, &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn encrypt_data(data: &[u8], key: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|_| SecurityError::EncryptionError)?;

    // Nonce travels in front of the ciphertext
    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend(ciphertext);

    Ok(result)
}

pub fn decrypt_data(encrypted_data: &[u8], key: &[u8]) -> Result<Vec<u8>, SecurityError> {
    if encrypted_data.len() < NONCE_LEN {
        return Err(SecurityError::DecryptionError);
    }

    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let nonce = Nonce::from_slice(&encrypted_data[..NONCE_LEN]);
    let ciphertext = &encrypted_data[NONCE_LEN..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SecurityError::DecryptionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let (hash, salt) = hash_password("correct horse");
        assert!(verify_password("correct horse", &salt, &hash));
        assert!(!verify_password("Correct horse", &salt, &hash));
        assert!(!verify_password("correct horse", "zz", &hash));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = generate_secret();
        let mut sealed = encrypt_data(b"payload", &key).expect("encrypt");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt_data(&sealed, &key).is_err());
        assert!(decrypt_data(&sealed[..4], &key).is_err());
    }
}
