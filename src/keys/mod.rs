//! Per-device shared key rotation.
//!
//! Every monitored device shares a symmetric key with the service, used to authenticate what the
//! device uploads. Rotation is staged: [`KeyRotationManager::stage_next_key`] mints the next key
//! so it can be delivered to the device, and [`KeyRotationManager::commit_rotated_key`] promotes
//! it once the device confirms. Until the commit only the active key authenticates.

use crate::error::{Result, WardenError};
use crate::types::DeviceId;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Size of device shared keys in bytes.
pub const SHARED_KEY_LEN: usize = 32;

/// A key minted for the next version but not yet in use.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedKey {
    pub version: u32,
    pub key: Vec<u8>,
}

impl fmt::Debug for StagedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedKey")
            .field("version", &self.version)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Key state of one device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey {
    pub device_id: DeviceId,
    pub key_version: u32,
    pub shared_key: Vec<u8>,
    /// Next key, present only between staging and commit.
    pub staged: Option<StagedKey>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("device_id", &self.device_id)
            .field("key_version", &self.key_version)
            .field("shared_key", &"<redacted>")
            .field("staged", &self.staged)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}

/// Key manager for device shared keys.
#[derive(Clone, Default)]
pub struct KeyRotationManager {
    devices: Arc<RwLock<HashMap<DeviceId, DeviceKey>>>,
}

impl KeyRotationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate random key material.
    fn generate_key_material() -> Vec<u8> {
        let mut key = vec![0u8; SHARED_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    fn not_found(device_id: &str) -> WardenError {
        WardenError::NotFound(format!("device {}", device_id))
    }

    /// Register a device with a fresh version 1 key.
    pub async fn register_device(&self, device_id: &str) -> Result<DeviceKey> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(device_id) {
            return Err(WardenError::Conflict(format!(
                "device {} already registered",
                device_id
            )));
        }

        let key = DeviceKey {
            device_id: device_id.to_string(),
            key_version: 1,
            shared_key: Self::generate_key_material(),
            staged: None,
            created_at: crate::types::now(),
            rotated_at: None,
        };
        devices.insert(device_id.to_string(), key.clone());

        info!(device_id, "Registered device key");
        Ok(key)
    }

    /// Mint the next key, or return the one already staged.
    pub async fn stage_next_key(&self, device_id: &str) -> Result<StagedKey> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| Self::not_found(device_id))?;

        if let Some(staged) = &device.staged {
            debug!(device_id, version = staged.version, "Key already staged");
            return Ok(staged.clone());
        }

        let staged = StagedKey {
            version: device.key_version + 1,
            key: Self::generate_key_material(),
        };
        device.staged = Some(staged.clone());

        info!(device_id, next_version = staged.version, "Staged next device key");
        Ok(staged)
    }

    /// Promote the staged key.
    pub async fn commit_rotated_key(&self, device_id: &str) -> Result<DeviceKey> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| Self::not_found(device_id))?;

        let staged = device
            .staged
            .take()
            .ok_or_else(|| WardenError::NothingStaged(device_id.to_string()))?;
        device.key_version = staged.version;
        device.shared_key = staged.key;
        device.rotated_at = Some(crate::types::now());

        info!(device_id, version = device.key_version, "Rotated device key");
        Ok(device.clone())
    }

    /// Drop a staged key without rotating.
    pub async fn discard_staged(&self, device_id: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| Self::not_found(device_id))?;
        if device.staged.take().is_none() {
            return Err(WardenError::NothingStaged(device_id.to_string()));
        }
        warn!(device_id, "Discarded staged device key");
        Ok(())
    }

    /// Version and material of the key in use.
    pub async fn active_key(&self, device_id: &str) -> Result<(u32, Vec<u8>)> {
        let devices = self.devices.read().await;
        let device = devices.get(device_id).ok_or_else(|| Self::not_found(device_id))?;
        Ok((device.key_version, device.shared_key.clone()))
    }

    pub async fn get(&self, device_id: &str) -> Result<DeviceKey> {
        self.devices
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| Self::not_found(device_id))
    }

    /// Check an HMAC-SHA256 tag over `message` against the active key only.
    pub async fn authenticate(&self, device_id: &str, message: &[u8], tag: &[u8]) -> Result<bool> {
        let (_, key) = self.active_key(device_id).await?;
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| WardenError::Crypto(e.to_string()))?;
        mac.update(message);
        Ok(mac.verify_slice(tag).is_ok())
    }
}
