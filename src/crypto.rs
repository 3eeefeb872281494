//! Hybrid encryption for run artifacts and source documents.
//!
//! # Scheme
//!
//! Every pipeline run mints one fresh random AES-256 key (the run key) and
//! one 96-bit nonce. Every output artifact of the run — page screenshots,
//! extracted embedded images, the OCR JSON blob — is AES-256-GCM encrypted
//! under that single key and nonce, and the key itself is wrapped through
//! the external key-management service so only the wrapped form and the
//! nonce are ever persisted.
//!
//! Reusing one nonce across a run's artifacts is deliberate and safe here:
//! the run key exists for exactly one run and is never reused. A new run
//! gets a new key, so no two distinct runs ever share a (key, nonce) pair.
//!
//! The unwrapped key never leaves process memory: [`ArtifactKeyMaterial`]
//! zeroizes it on drop and only the wrapped form is serializable.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::adapters::{KeyManagementClient, ObjectStore};
use crate::error::{PipelineError, Result};
use crate::types::SourceRef;

/// Key material for one run: the ephemeral symmetric key, the run nonce,
/// and the key's wrapped form as returned by the KMS.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ArtifactKeyMaterial {
    key: [u8; 32],
    #[zeroize(skip)]
    nonce: [u8; 12],
    #[zeroize(skip)]
    wrapped_key: String,
}

impl ArtifactKeyMaterial {
    /// The wrapped key, safe to persist alongside the encrypted outputs.
    pub fn wrapped_key(&self) -> &str {
        &self.wrapped_key
    }

    /// The run nonce, base64-encoded for the notification message.
    pub fn nonce_b64(&self) -> String {
        STANDARD.encode(self.nonce)
    }
}

impl std::fmt::Debug for ArtifactKeyMaterial {
    // Key bytes must never reach logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactKeyMaterial")
            .field("key", &"<redacted>")
            .field("nonce", &STANDARD.encode(self.nonce))
            .field("wrapped_key", &self.wrapped_key)
            .finish()
    }
}

/// Mints per-run key material and seals output artifacts with it.
pub struct ArtifactEncryptor {
    kms: Arc<dyn KeyManagementClient>,
}

impl ArtifactEncryptor {
    pub fn new(kms: Arc<dyn KeyManagementClient>) -> Self {
        Self { kms }
    }

    /// Generate a fresh 256-bit run key and 96-bit nonce, and wrap the key
    /// under the tenant's `key_id`.
    pub async fn new_run_key(&self, key_id: &str) -> Result<ArtifactKeyMaterial> {
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 12];
        {
            let mut rng = rand::thread_rng();
            rng.fill_bytes(&mut key);
            rng.fill_bytes(&mut nonce);
        }

        let mut key_b64 = STANDARD.encode(key);
        let wrapped = self.kms.wrap(&key_b64, key_id).await;
        key_b64.zeroize();
        let wrapped_key = wrapped?;

        Ok(ArtifactKeyMaterial {
            key,
            nonce,
            wrapped_key,
        })
    }

    /// AEAD-encrypt one artifact with the run's key material.
    pub fn encrypt(&self, material: &ArtifactKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&material.key)
            .map_err(|e| PipelineError::Encryption {
                detail: e.to_string(),
            })?;
        cipher
            .encrypt(Nonce::from_slice(&material.nonce), plaintext)
            .map_err(|e| PipelineError::Encryption {
                detail: e.to_string(),
            })
    }

    /// AEAD-decrypt one artifact. Used by consumer-side tooling and tests;
    /// the pipeline itself only encrypts.
    pub fn decrypt(&self, material: &ArtifactKeyMaterial, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt_with(&material.key, &material.nonce, ciphertext)
    }
}

/// AEAD-decrypt `ciphertext` with a raw key and nonce. A tag mismatch maps
/// to [`PipelineError::Decryption`], which the orchestrator treats as
/// permanent.
fn decrypt_with(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| PipelineError::Decryption {
        detail: e.to_string(),
    })?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| PipelineError::Decryption {
            detail: "wrong key or tampered ciphertext".to_string(),
        })
}

/// Downloads the original encrypted document and decrypts it with a key
/// unwrapped through the KMS.
pub struct SourceDecryptor {
    kms: Arc<dyn KeyManagementClient>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl SourceDecryptor {
    pub fn new(
        kms: Arc<dyn KeyManagementClient>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            kms,
            store,
            bucket: bucket.into(),
        }
    }

    /// Unwrap the source's content key, download the ciphertext, and
    /// AEAD-decrypt it.
    ///
    /// A KMS failure here is raised as [`PipelineError::KeyUnwrap`] and is
    /// retryable at the orchestrator level (it is usually a network blip).
    /// An authentication-tag failure is [`PipelineError::Decryption`] and is
    /// permanent: no retry fixes a bad key/nonce pairing.
    pub async fn fetch_and_decrypt(&self, source: &SourceRef, key_id: &str) -> Result<Vec<u8>> {
        let key_b64 = self.kms.unwrap(&source.wrapped_key, key_id).await?;
        let key = decode_key(&key_b64)?;
        let nonce = decode_nonce(&source.nonce)?;

        let ciphertext = self.store.get(&self.bucket, &source.object_key).await?;
        decrypt_with(&key, &nonce, &ciphertext)
    }
}

fn decode_key(key_b64: &str) -> Result<[u8; 32]> {
    let mut bytes = STANDARD.decode(key_b64).map_err(|e| PipelineError::Decryption {
        detail: format!("unwrapped key is not valid base64: {e}"),
    })?;
    if bytes.len() != 32 {
        bytes.zeroize();
        return Err(PipelineError::Decryption {
            detail: format!("unwrapped key has {} bytes, expected 32", bytes.len()),
        });
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

fn decode_nonce(nonce_b64: &str) -> Result<[u8; 12]> {
    let bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|e| PipelineError::Decryption {
            detail: format!("nonce is not valid base64: {e}"),
        })?;
    if bytes.len() != 12 {
        return Err(PipelineError::Decryption {
            detail: format!("nonce has {} bytes, expected 12", bytes.len()),
        });
    }
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}
