//! Package signing keys.
//!
//! The process-wide Ed25519 key is loaded once at startup into a [`SigningKeyring`]. Rotation
//! follows the same stage/commit protocol as device keys: a staged key can be published before
//! it starts signing.

use crate::error::{Result, WardenError};
use base64::{engine::general_purpose::STANDARD, Engine};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// An Ed25519 key able to sign manifests.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    pair: Arc<Ed25519KeyPair>,
    pkcs8: Arc<Vec<u8>>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a new key.
    pub fn generate() -> Result<Self> {
        Self::from_pkcs8(&generate_pkcs8()?)
    }

    /// Load a key from PKCS#8 v2 DER bytes.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self> {
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| WardenError::Crypto(format!("invalid Ed25519 PKCS#8 key: {}", e)))?;
        let key_id = key_id_for(pair.public_key().as_ref());
        Ok(Self {
            key_id,
            pair: Arc::new(pair),
            pkcs8: Arc::new(pkcs8.to_vec()),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.pair.public_key().as_ref().to_vec()
    }

    /// PKCS#8 document, for persisting the key.
    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.pair.sign(message).as_ref().to_vec()
    }
}

/// Generate a PKCS#8 v2 encoded Ed25519 key.
pub fn generate_pkcs8() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let document = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| WardenError::Crypto("failed to generate Ed25519 key".to_string()))?;
    Ok(document.as_ref().to_vec())
}

/// Short identifier of a public key: the first 16 hex characters of its SHA-256.
pub fn key_id_for(public_key: &[u8]) -> String {
    crate::hash::sha256_hex(public_key)[..16].to_string()
}

/// Verify an Ed25519 signature.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(message, signature)
        .is_ok()
}

/// Encode a public key for distribution.
pub fn encode_public_key(public_key: &[u8]) -> String {
    STANDARD.encode(public_key)
}

/// Decode a distributed public key: base64 text or the raw 32 bytes.
pub fn decode_public_key(contents: &[u8]) -> Result<Vec<u8>> {
    if contents.len() == PUBLIC_KEY_LEN {
        return Ok(contents.to_vec());
    }
    let text = std::str::from_utf8(contents)
        .map_err(|_| WardenError::Crypto("public key is neither raw nor base64".to_string()))?;
    let decoded = STANDARD.decode(text.trim())?;
    if decoded.len() != PUBLIC_KEY_LEN {
        return Err(WardenError::Crypto(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            decoded.len()
        )));
    }
    Ok(decoded)
}

struct KeyringState {
    active: SigningKey,
    staged: Option<SigningKey>,
}

/// Active package signing key plus an optional staged successor.
pub struct SigningKeyring {
    state: parking_lot::RwLock<KeyringState>,
}

impl SigningKeyring {
    pub fn new(active: SigningKey) -> Self {
        Self {
            state: parking_lot::RwLock::new(KeyringState {
                active,
                staged: None,
            }),
        }
    }

    /// Keyring with a freshly generated key.
    pub fn generate() -> Result<Self> {
        Ok(Self::new(SigningKey::generate()?))
    }

    /// Load the key at `path`, generating and persisting one first if allowed.
    pub async fn load_or_generate(path: &Path, generate_if_missing: bool) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(pkcs8) => {
                let key = SigningKey::from_pkcs8(&pkcs8)?;
                info!(path = %path.display(), key_id = key.key_id(), "Loaded signing key");
                Ok(Self::new(key))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && generate_if_missing => {
                let key = SigningKey::generate()?;
                write_key_file(path, key.pkcs8()).await?;
                warn!(path = %path.display(), key_id = key.key_id(), "Generated new signing key");
                Ok(Self::new(key))
            }
            Err(e) => Err(WardenError::Config(format!(
                "cannot read signing key {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Key currently used for signing.
    pub fn active(&self) -> SigningKey {
        self.state.read().active.clone()
    }

    pub fn key_id(&self) -> String {
        self.state.read().active.key_id.clone()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.state.read().active.public_key()
    }

    pub fn staged(&self) -> Option<SigningKey> {
        self.state.read().staged.clone()
    }

    /// Stage a successor key, or return the one already staged.
    pub fn stage_next(&self) -> Result<SigningKey> {
        let mut state = self.state.write();
        if let Some(staged) = &state.staged {
            return Ok(staged.clone());
        }
        let key = SigningKey::generate()?;
        info!(key_id = key.key_id(), "Staged next signing key");
        state.staged = Some(key.clone());
        Ok(key)
    }

    /// Make the staged key the active one.
    pub fn commit(&self) -> Result<SigningKey> {
        let mut state = self.state.write();
        let staged = state
            .staged
            .take()
            .ok_or_else(|| WardenError::NothingStaged("signing keyring".to_string()))?;
        info!(
            previous = state.active.key_id(),
            key_id = staged.key_id(),
            "Rotated signing key"
        );
        state.active = staged.clone();
        Ok(staged)
    }
}

/// Write a private key file readable only by the owner.
pub async fn write_key_file(path: &Path, pkcs8: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, pkcs8).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate().unwrap();
        let signature = key.sign(b"manifest");
        assert!(verify_signature(&key.public_key(), b"manifest", &signature));
        assert!(!verify_signature(&key.public_key(), b"manifest!", &signature));

        let other = SigningKey::generate().unwrap();
        assert!(!verify_signature(&other.public_key(), b"manifest", &signature));
        assert_ne!(key.key_id(), other.key_id());
    }

    #[test]
    fn test_pkcs8_round_trip_keeps_identity() {
        let key = SigningKey::generate().unwrap();
        let reloaded = SigningKey::from_pkcs8(key.pkcs8()).unwrap();
        assert_eq!(key.public_key(), reloaded.public_key());
        assert_eq!(key.key_id(), reloaded.key_id());
        assert!(SigningKey::from_pkcs8(b"junk").is_err());
    }

    #[test]
    fn test_keyring_stage_and_commit() {
        let keyring = SigningKeyring::generate().unwrap();
        let original = keyring.key_id();

        assert!(matches!(keyring.commit(), Err(WardenError::NothingStaged(_))));

        let staged = keyring.stage_next().unwrap();
        assert_eq!(keyring.stage_next().unwrap().key_id(), staged.key_id());
        assert_eq!(keyring.key_id(), original);

        keyring.commit().unwrap();
        assert_eq!(keyring.key_id(), staged.key_id());
        assert!(keyring.staged().is_none());
    }

    #[test]
    fn test_public_key_encoding() {
        let key = SigningKey::generate().unwrap();
        let encoded = encode_public_key(&key.public_key());
        assert_eq!(decode_public_key(encoded.as_bytes()).unwrap(), key.public_key());
        assert_eq!(decode_public_key(format!("{}\n", encoded).as_bytes()).unwrap(), key.public_key());
        assert_eq!(decode_public_key(&key.public_key()).unwrap(), key.public_key());
        assert!(decode_public_key(b"c2hvcnQ=").is_err());
    }

    #[tokio::test]
    async fn test_load_or_generate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/signing.pk8");

        assert!(SigningKeyring::load_or_generate(&path, false).await.is_err());

        let generated = SigningKeyring::load_or_generate(&path, true).await.unwrap();
        let loaded = SigningKeyring::load_or_generate(&path, false).await.unwrap();
        assert_eq!(generated.key_id(), loaded.key_id());
    }
}
