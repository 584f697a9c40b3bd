//! Bearer tokens for session establishment.
//!
//! A token is three dot-separated segments, each base64url without padding:
//! a header `{alg, typ, kid}`, the claims, and an HMAC-SHA-256 over the
//! first two segments keyed by the master key. Tokens are verified once, at
//! session establishment; per-message authentication uses session secrets.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use weft_core::{AgentId, PermissionSet, Role};

use crate::error::{IdentityError, IdentityResult};
use crate::secret::MasterKey;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALG: &str = "HS256";
const TOKEN_TYP: &str = "weft";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
    kid: String,
}

/// Verified token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject agent.
    #[serde(rename = "sub")]
    pub subject: AgentId,
    /// Role at issue time.
    pub role: Role,
    /// Permission mask at issue time.
    #[serde(rename = "perms")]
    pub permissions: PermissionSet,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Unique token id.
    pub jti: Uuid,
}

/// An encoded bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Sign `claims` under the master key.
    pub(crate) fn sign(claims: &Claims, key: &MasterKey) -> IdentityResult<Self> {
        let header = TokenHeader {
            alg: TOKEN_ALG.to_string(),
            typ: TOKEN_TYP.to_string(),
            kid: key.key_id(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|_| IdentityError::MalformedToken("header serialization"))?;
        let claims_json = serde_json::to_vec(claims)
            .map_err(|_| IdentityError::MalformedToken("claims serialization"))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let mac = mac_over(key, signing_input.as_bytes());
        Ok(Self(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(mac)
        )))
    }

    /// Decode and authenticate, returning the claims.
    ///
    /// Expiry and revocation are the store's responsibility; this checks
    /// structure and MAC only. The MAC comparison is constant-time.
    pub(crate) fn verify_mac(&self, key: &MasterKey) -> IdentityResult<Claims> {
        let mut segments = self.0.split('.');
        let (Some(header_b64), Some(claims_b64), Some(mac_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(IdentityError::MalformedToken("expected three segments"));
        };

        let header_json = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| IdentityError::MalformedToken("header base64"))?;
        let header: TokenHeader = serde_json::from_slice(&header_json)
            .map_err(|_| IdentityError::MalformedToken("header json"))?;
        if header.alg != TOKEN_ALG || header.typ != TOKEN_TYP {
            return Err(IdentityError::MalformedToken("unknown alg or typ"));
        }

        let presented_mac = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| IdentityError::MalformedToken("mac base64"))?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let expected = mac_over(key, signing_input.as_bytes());
        if expected.ct_eq(presented_mac.as_slice()).unwrap_u8() != 1 {
            return Err(IdentityError::BadMac);
        }

        let claims_json = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| IdentityError::MalformedToken("claims base64"))?;
        serde_json::from_slice(&claims_json)
            .map_err(|_| IdentityError::MalformedToken("claims json"))
    }

    /// The encoded token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap token text received from a peer.
    #[must_use]
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are bearer credentials; display only the tail for logs.
        let tail = self.0.len().saturating_sub(8);
        write!(f, "token:..{}", &self.0[tail..])
    }
}

fn mac_over(key: &MasterKey, input: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key.bytes()).expect("HMAC accepts any key length");
    mac.update(input);
    mac.finalize().into_bytes().into()
}
