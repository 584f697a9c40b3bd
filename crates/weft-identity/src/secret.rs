//! Master key handling and session secret derivation.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use weft_core::AgentId;

use crate::error::{IdentityError, IdentityResult};

/// Environment variable carrying the master key as 64 hex characters.
pub const MASTER_KEY_ENV: &str = "WEFT_MASTER_KEY";

/// Environment variable naming a file holding the master key.
pub const MASTER_KEY_FILE_ENV: &str = "WEFT_MASTER_KEY_FILE";

const KEY_LEN: usize = 32;
const SESSION_INFO: &[u8] = b"weft/session/v1";

/// The process master key. Seeds token MACs and session secret derivation.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Generate a fresh random master key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Load the master key from the environment.
    ///
    /// `WEFT_MASTER_KEY` (64 hex characters) takes precedence; otherwise
    /// `WEFT_MASTER_KEY_FILE` names a file containing the hex key. A missing
    /// master key is fatal at boot.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MasterKeyMissing`] when neither source is
    /// set or the material is not 32 bytes of hex.
    pub fn from_env() -> IdentityResult<Self> {
        let hex_key = if let Ok(inline) = std::env::var(MASTER_KEY_ENV) {
            inline
        } else if let Ok(path) = std::env::var(MASTER_KEY_FILE_ENV) {
            std::fs::read_to_string(&path)
                .map_err(|e| IdentityError::MasterKeyMissing(format!("{path}: {e}")))?
                .trim()
                .to_string()
        } else {
            return Err(IdentityError::MasterKeyMissing(format!(
                "neither {MASTER_KEY_ENV} nor {MASTER_KEY_FILE_ENV} is set"
            )));
        };
        Self::from_hex(&hex_key)
    }

    /// Parse a 64-character hex key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MasterKeyMissing`] for malformed input.
    pub fn from_hex(hex_key: &str) -> IdentityResult<Self> {
        let raw = hex::decode(hex_key)
            .map_err(|e| IdentityError::MasterKeyMissing(format!("invalid hex: {e}")))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|_| IdentityError::MasterKeyMissing("key must be 32 bytes".into()))?;
        Ok(Self { bytes })
    }

    /// Raw key bytes, for MAC computation inside this crate.
    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Short key identifier for token headers: first four bytes of
    /// SHA-256 over the key, hex-encoded.
    #[must_use]
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..4])
    }

    /// Derive the session secret for an agent.
    ///
    /// `generation` increments on key rotation so a rotated binding gets a
    /// fresh secret; generation 0 is the deterministic post-restart value.
    #[must_use]
    pub fn derive_session_secret(&self, agent: AgentId, generation: u32) -> SessionSecret {
        let hk = Hkdf::<Sha256>::new(Some(SESSION_INFO), &self.bytes);
        let mut info = [0u8; 6];
        info[0..2].copy_from_slice(&agent.raw().to_le_bytes());
        info[2..6].copy_from_slice(&generation.to_le_bytes());
        let mut okm = [0u8; KEY_LEN];
        // Infallible: 32 bytes is well under HKDF-SHA256's output cap.
        let _ = hk.expand(&info, &mut okm);
        SessionSecret::from_bytes(okm)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(kid={})", self.key_id())
    }
}

/// Per-agent 32-byte HMAC key for message authentication.
///
/// Lifetime equals the binding's lifetime; zeroized when the binding is
/// replaced or dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    bytes: [u8; KEY_LEN],
}

impl SessionSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw secret bytes, for MAC computation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let a = key.derive_session_secret(AgentId::new(10), 0);
        let b = key.derive_session_secret(AgentId::new(10), 0);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derivation_varies_by_agent_and_generation() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let base = key.derive_session_secret(AgentId::new(10), 0);
        let other_agent = key.derive_session_secret(AgentId::new(11), 0);
        let rotated = key.derive_session_secret(AgentId::new(10), 1);
        assert_ne!(base.as_bytes(), other_agent.as_bytes());
        assert_ne!(base.as_bytes(), rotated.as_bytes());
    }

    #[test]
    fn test_hex_round_trip() {
        let key = MasterKey::generate();
        let hex_key = hex::encode(key.bytes());
        let reloaded = MasterKey::from_hex(&hex_key).unwrap();
        assert_eq!(key.bytes(), reloaded.bytes());
        assert_eq!(key.key_id(), reloaded.key_id());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(MasterKey::from_hex("zz").is_err());
        assert!(MasterKey::from_hex("aabb").is_err());
    }
}
