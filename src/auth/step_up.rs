//! Step-up authentication tokens.
//!
//! A step-up token proves that an actor re-entered their PIN moments ago. Tokens are
//! HMAC-SHA256 signed, bound to the actor and session that requested them, expire after a short
//! TTL, and are accepted exactly once.
//!
//! Wire format: `su1.<base64url claims json>.<base64url signature>`.

use super::Actor;
use crate::config::{StepUpConfig, MAX_STEP_UP_TTL};
use crate::error::{Result, WardenError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "su1";

/// Minimum secret length for security.
const MIN_SECRET_LENGTH: usize = 32;

/// Claims carried by a step-up token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepUpClaims {
    /// Token id, used for single-use tracking.
    jti: String,
    /// Actor id.
    sub: String,
    /// Session id, empty when the actor had none.
    sid: String,
    /// Expiry, unix milliseconds.
    exp: i64,
}

/// An issued step-up credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpToken {
    /// Bearer string to present to an execute call.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and redeems step-up tokens.
pub struct StepUpAuthenticator {
    secret: Vec<u8>,
    ttl: Duration,
    /// actor id -> keyed digest of the enrolled PIN.
    pins: parking_lot::RwLock<HashMap<String, Vec<u8>>>,
    /// Consumed token ids with their expiry, pruned once expired.
    consumed: parking_lot::Mutex<HashMap<String, i64>>,
}

impl StepUpAuthenticator {
    /// Create an authenticator.
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(WardenError::Config("step-up secret must not be empty".to_string()));
        }
        if secret.len() < MIN_SECRET_LENGTH {
            warn!(
                "Step-up secret is shorter than {} bytes. Consider using a longer secret for production.",
                MIN_SECRET_LENGTH
            );
        }
        if ttl.is_zero() || ttl > MAX_STEP_UP_TTL {
            return Err(WardenError::Config(format!(
                "step-up ttl must be within (0, {}s]",
                MAX_STEP_UP_TTL.as_secs()
            )));
        }

        Ok(Self {
            secret,
            ttl,
            pins: parking_lot::RwLock::new(HashMap::new()),
            consumed: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Create from configuration.
    pub fn from_config(config: &StepUpConfig) -> Result<Self> {
        Self::new(config.secret.as_bytes().to_vec(), config.ttl)
    }

    fn mac(&self, parts: &[&[u8]]) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC can take key of any size"),
        };
        for part in parts {
            mac.update(&(part.len() as u64).to_be_bytes());
            mac.update(part);
        }
        mac
    }

    fn pin_digest(&self, actor_id: &str, secret: &str) -> Vec<u8> {
        self.mac(&[b"pin", actor_id.as_bytes(), secret.as_bytes()])
            .finalize()
            .into_bytes()
            .to_vec()
    }

    fn check_secret_format(secret: &str) -> Result<()> {
        if secret.len() < 4 {
            return Err(WardenError::Validation(
                "step-up secret must be at least 4 characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Enroll an actor's first step-up PIN.
    ///
    /// Fails with [`WardenError::Conflict`] when a PIN is already enrolled; use
    /// [`change_secret`](Self::change_secret) to replace it.
    pub fn enroll(&self, actor_id: &str, secret: &str) -> Result<()> {
        Self::check_secret_format(secret)?;
        let digest = self.pin_digest(actor_id, secret);
        match self.pins.write().entry(actor_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(actor = actor_id, "Step-up enrolment refused: secret already set");
                return Err(WardenError::Conflict(
                    "step-up secret already enrolled".to_string(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(digest);
            }
        }
        info!(actor = actor_id, "Enrolled step-up secret");
        Ok(())
    }

    /// Replace an enrolled PIN. The current PIN must be presented.
    pub fn change_secret(&self, actor_id: &str, current: &str, secret: &str) -> Result<()> {
        Self::check_secret_format(secret)?;
        let presented = self.pin_digest(actor_id, current);
        let digest = self.pin_digest(actor_id, secret);

        let mut pins = self.pins.write();
        let enrolled = pins
            .get_mut(actor_id)
            .ok_or_else(|| WardenError::StepUpInvalid("no step-up secret enrolled".to_string()))?;
        if !constant_time_compare(enrolled, &presented) {
            warn!(actor = actor_id, "Step-up secret change rejected");
            return Err(WardenError::StepUpInvalid("current secret rejected".to_string()));
        }
        *enrolled = digest;
        info!(actor = actor_id, "Changed step-up secret");
        Ok(())
    }

    /// Check the actor's PIN and issue a single-use token bound to actor and session.
    pub fn verify_step_up(&self, actor: &Actor, secret: &str) -> Result<StepUpToken> {
        let expected = self
            .pins
            .read()
            .get(&actor.id)
            .cloned()
            .ok_or_else(|| WardenError::StepUpInvalid("no step-up secret enrolled".to_string()))?;

        let presented = self.pin_digest(&actor.id, secret);
        if !constant_time_compare(&expected, &presented) {
            warn!(actor = %actor.id, "Step-up secret rejected");
            return Err(WardenError::StepUpInvalid("secret rejected".to_string()));
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.ttl)
                .map_err(|e| WardenError::Internal(e.to_string()))?;
        let claims = StepUpClaims {
            jti: crate::types::new_id(),
            sub: actor.id.clone(),
            sid: actor.session_id.clone().unwrap_or_default(),
            exp: expires_at.timestamp_millis(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = self
            .mac(&[TOKEN_PREFIX.as_bytes(), payload.as_bytes()])
            .finalize()
            .into_bytes();
        let token = format!(
            "{}.{}.{}",
            TOKEN_PREFIX,
            payload,
            URL_SAFE_NO_PAD.encode(signature)
        );

        info!(actor = %actor.id, expires_at = %expires_at, "Issued step-up token");
        Ok(StepUpToken { token, expires_at })
    }

    /// Validate and consume a token for `actor`.
    ///
    /// Fails with [`WardenError::StepUpInvalid`] if the token is malformed, forged, expired,
    /// bound to another actor or session, or was already consumed.
    pub fn consume(&self, token: &str, actor: &Actor) -> Result<()> {
        let claims = self.parse(token)?;

        if claims.sub != actor.id || claims.sid != actor.session_id.clone().unwrap_or_default() {
            return Err(WardenError::StepUpInvalid(
                "token is bound to another actor or session".to_string(),
            ));
        }

        let now = Utc::now().timestamp_millis();
        if claims.exp <= now {
            return Err(WardenError::StepUpInvalid("token expired".to_string()));
        }

        let mut consumed = self.consumed.lock();
        consumed.retain(|_, exp| *exp > now);
        if consumed.contains_key(&claims.jti) {
            warn!(actor = %actor.id, "Step-up token replayed");
            return Err(WardenError::StepUpInvalid("token already used".to_string()));
        }
        consumed.insert(claims.jti, claims.exp);

        Ok(())
    }

    fn parse(&self, token: &str) -> Result<StepUpClaims> {
        let malformed = || WardenError::StepUpInvalid("malformed token".to_string());

        let mut parts = token.split('.');
        let (Some(prefix), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if prefix != TOKEN_PREFIX {
            return Err(malformed());
        }

        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| malformed())?;
        self.mac(&[TOKEN_PREFIX.as_bytes(), payload.as_bytes()])
            .verify_slice(&signature)
            .map_err(|_| WardenError::StepUpInvalid("signature invalid".to_string()))?;

        let claims = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
        serde_json::from_slice(&claims).map_err(|_| malformed())
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
