//! AES-256-GCM primitives shared by the field/file encryptor and the key manager.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::LabGuardError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// 256-bit symmetric key. Debug output never includes key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LabGuardError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            LabGuardError::Crypto(format!("expected {KEY_LEN}-byte key, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// PBKDF2-HMAC-SHA256 into a 256-bit key.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> SecretKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut out);
    SecretKey(out)
}

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypt with a fresh random nonce. Returns `(nonce, ciphertext || tag)`.
pub fn seal(
    key: &SecretKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), LabGuardError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| LabGuardError::Crypto("encryption failed".to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok((nonce_bytes, ciphertext))
}

pub fn open(
    key: &SecretKey,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, LabGuardError> {
    if nonce.len() != NONCE_LEN {
        return Err(LabGuardError::Crypto(format!(
            "expected {NONCE_LEN}-byte nonce, got {}",
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| LabGuardError::Crypto("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let a = derive_key(b"secret", b"salt-one", 1_000);
        let b = derive_key(b"secret", b"salt-one", 1_000);
        let c = derive_key(b"secret", b"salt-two", 1_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn aad_mismatch_is_rejected() {
        let key = SecretKey::generate();
        let (nonce, ct) = seal(&key, b"payload", b"key-a").unwrap();
        assert_eq!(open(&key, &nonce, &ct, b"key-a").unwrap(), b"payload");
        assert!(matches!(
            open(&key, &nonce, &ct, b"key-b"),
            Err(LabGuardError::Crypto(_))
        ));
    }

    #[test]
    fn debug_hides_key_material() {
        assert_eq!(format!("{:?}", SecretKey::generate()), "SecretKey(..)");
    }
}
