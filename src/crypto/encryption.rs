use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::cipher::{self, NONCE_LEN, SALT_LEN};
use crate::error::LabGuardError;

const FIELD_PREFIX: &str = "lg1";
const FILE_MAGIC: &[u8; 4] = b"LGE1";

/// Passphrase-based AES-256-GCM encryption. Every payload carries its own
/// PBKDF2 salt and nonce, so equal plaintexts never produce equal output.
#[derive(Clone)]
pub struct EncryptionService {
    secret: Arc<[u8]>,
    iterations: u32,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    pub fn new(secret: impl AsRef<[u8]>, iterations: u32) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            iterations: iterations.max(1),
        }
    }

    /// `encrypt_field` on the blocking pool; PBKDF2 is too slow for a runtime worker.
    pub async fn seal_field(&self, plaintext: String) -> Result<String, LabGuardError> {
        self.blocking(move |svc| svc.encrypt_field(&plaintext)).await
    }

    /// `decrypt_field` on the blocking pool.
    pub async fn open_field(&self, token: String) -> Result<String, LabGuardError> {
        self.blocking(move |svc| svc.decrypt_field(&token)).await
    }

    /// Encrypt a single field into a `lg1.<salt>.<nonce>.<ciphertext>` token.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String, LabGuardError> {
        let salt = cipher::random_salt();
        let key = cipher::derive_key(&self.secret, &salt, self.iterations);
        let (nonce, ct) = cipher::seal(&key, plaintext.as_bytes(), FIELD_PREFIX.as_bytes())?;
        Ok(format!(
            "{FIELD_PREFIX}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ct)
        ))
    }

    pub fn decrypt_field(&self, token: &str) -> Result<String, LabGuardError> {
        let mut parts = token.split('.');
        let (Some(prefix), Some(salt), Some(nonce), Some(ct), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(LabGuardError::Crypto("malformed field token".to_string()));
        };
        if prefix != FIELD_PREFIX {
            return Err(LabGuardError::Crypto(format!(
                "unsupported field token version `{prefix}`"
            )));
        }
        let salt = decode_b64(salt)?;
        let nonce = decode_b64(nonce)?;
        let ct = decode_b64(ct)?;

        let key = cipher::derive_key(&self.secret, &salt, self.iterations);
        let plain = cipher::open(&key, &nonce, &ct, FIELD_PREFIX.as_bytes())?;
        String::from_utf8(plain)
            .map_err(|_| LabGuardError::Crypto("decrypted field is not UTF-8".to_string()))
    }

    /// Binary envelope: `LGE1 || salt(16) || nonce(12) || ciphertext+tag`.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, LabGuardError> {
        let salt = cipher::random_salt();
        let key = cipher::derive_key(&self.secret, &salt, self.iterations);
        let (nonce, ct) = cipher::seal(&key, plaintext, FILE_MAGIC)?;

        let mut out = Vec::with_capacity(FILE_MAGIC.len() + SALT_LEN + NONCE_LEN + ct.len());
        out.extend_from_slice(FILE_MAGIC);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    pub fn decrypt_bytes(&self, envelope: &[u8]) -> Result<Vec<u8>, LabGuardError> {
        let header = FILE_MAGIC.len() + SALT_LEN + NONCE_LEN;
        if envelope.len() < header || &envelope[..FILE_MAGIC.len()] != FILE_MAGIC {
            return Err(LabGuardError::Crypto(
                "not a LabGuard encrypted envelope".to_string(),
            ));
        }
        let salt = &envelope[FILE_MAGIC.len()..FILE_MAGIC.len() + SALT_LEN];
        let nonce = &envelope[FILE_MAGIC.len() + SALT_LEN..header];
        let key = cipher::derive_key(&self.secret, salt, self.iterations);
        cipher::open(&key, nonce, &envelope[header..], FILE_MAGIC)
    }

    pub async fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<u64, LabGuardError> {
        let plain = tokio::fs::read(src).await?;
        let bytes = plain.len();
        let sealed = self.blocking(move |svc| svc.encrypt_bytes(&plain)).await?;
        tokio::fs::write(dst, &sealed).await?;
        info!(
            src = %src.display(),
            dst = %dst.display(),
            bytes,
            "file encrypted"
        );
        Ok(sealed.len() as u64)
    }

    pub async fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<u64, LabGuardError> {
        let sealed = tokio::fs::read(src).await?;
        let plain = self.blocking(move |svc| svc.decrypt_bytes(&sealed)).await?;
        tokio::fs::write(dst, &plain).await?;
        debug!(src = %src.display(), dst = %dst.display(), "file decrypted");
        Ok(plain.len() as u64)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, LabGuardError>
    where
        F: FnOnce(EncryptionService) -> Result<T, LabGuardError> + Send + 'static,
        T: Send + 'static,
    {
        let svc = self.clone();
        tokio::task::spawn_blocking(move || f(svc))
            .await
            .map_err(|e| LabGuardError::Internal(format!("crypto task failed: {e}")))?
    }
}

fn decode_b64(s: &str) -> Result<Vec<u8>, LabGuardError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| LabGuardError::Crypto(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new("unit-test-secret", 1_000)
    }

    #[test]
    fn field_tokens_are_salted() {
        let svc = service();
        let a = svc.encrypt_field("patient-123").unwrap();
        let b = svc.encrypt_field("patient-123").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("lg1."));
        assert_eq!(svc.decrypt_field(&a).unwrap(), "patient-123");
    }

    #[test]
    fn wrong_secret_cannot_decrypt() {
        let token = service().encrypt_field("sensitive").unwrap();
        let other = EncryptionService::new("another-secret", 1_000);
        assert!(matches!(
            other.decrypt_field(&token),
            Err(LabGuardError::Crypto(_))
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let svc = service();
        assert!(svc.decrypt_field("lg1.only.three").is_err());
        assert!(svc.decrypt_field("lg2.a.b.c").is_err());
        assert!(svc.decrypt_field("lg1.!!.b.c").is_err());
    }

    #[test]
    fn tampered_envelope_fails_authentication() {
        let svc = service();
        let mut sealed = svc.encrypt_bytes(b"calibration certificate").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(svc.decrypt_bytes(&sealed).is_err());
        assert!(svc.decrypt_bytes(b"LGE1short").is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn field_tokens_round_trip_off_the_runtime() {
        let svc = service();
        let token = svc.seal_field("patient-123".to_string()).await.unwrap();
        assert_eq!(svc.decrypt_field(&token).unwrap(), "patient-123");
        assert_eq!(svc.open_field(token).await.unwrap(), "patient-123");

        let err = svc.open_field("lg1.a.b".to_string()).await.unwrap_err();
        assert!(matches!(err, LabGuardError::Crypto(_)));
    }

    #[tokio::test]
    async fn file_encryption_writes_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("report.csv");
        let enc = dir.path().join("report.csv.enc");
        let out = dir.path().join("report.out.csv");
        tokio::fs::write(&src, b"id,temp\n1,37.0\n").await.unwrap();

        let svc = service();
        svc.encrypt_file(&src, &enc).await.unwrap();
        let sealed = tokio::fs::read(&enc).await.unwrap();
        assert_eq!(&sealed[..4], b"LGE1");

        svc.decrypt_file(&enc, &out).await.unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"id,temp\n1,37.0\n");
    }
}
