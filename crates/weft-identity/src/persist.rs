//! Binding persistence: length-prefixed records, atomic replace.
//!
//! Record body layout (little-endian):
//! `agent_id: u16 | name_len: u8 | name | role: u8 | permissions: u8 |
//! issued_at: i64 | expires_at: i64 (0 = none) | revoked: u8`.
//! Each record is prefixed with its `u32` body length. Session secrets are
//! never persisted; they are re-derived from the master key at load.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use weft_core::{AgentId, AgentName, PermissionSet, Role};

use crate::error::{IdentityError, IdentityResult};

/// One persisted binding record, secrets excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PersistedBinding {
    pub(crate) agent_id: AgentId,
    pub(crate) name: AgentName,
    pub(crate) role: Role,
    pub(crate) permissions: PermissionSet,
    pub(crate) issued_at: DateTime<Utc>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) revoked: bool,
}

impl PersistedBinding {
    fn encode(&self) -> Vec<u8> {
        let name = self.name.as_str().as_bytes();
        let mut body = Vec::with_capacity(2 + 1 + name.len() + 1 + 1 + 8 + 8 + 1);
        body.extend_from_slice(&self.agent_id.raw().to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        body.push(name.len() as u8);
        body.extend_from_slice(name);
        body.push(self.role.discriminant());
        body.push(self.permissions.bits());
        body.extend_from_slice(&self.issued_at.timestamp().to_le_bytes());
        let expires = self.expires_at.map_or(0, |t| t.timestamp());
        body.extend_from_slice(&expires.to_le_bytes());
        body.push(u8::from(self.revoked));
        body
    }

    fn decode(body: &[u8]) -> IdentityResult<Self> {
        let fail = |what: &str| IdentityError::MalformedState(what.to_string());
        if body.len() < 3 {
            return Err(fail("record shorter than fixed prefix"));
        }
        let agent_id = AgentId::new(u16::from_le_bytes([body[0], body[1]]));
        let name_len = usize::from(body[2]);
        let rest = &body[3..];
        if rest.len() != name_len + 1 + 1 + 8 + 8 + 1 {
            return Err(fail("record length inconsistent with name length"));
        }
        let name = std::str::from_utf8(&rest[..name_len])
            .map_err(|_| fail("name is not UTF-8"))?;
        let name = AgentName::new(name)?;
        let rest = &rest[name_len..];
        let role = Role::from_discriminant(rest[0])
            .ok_or_else(|| fail("unknown role discriminant"))?;
        let permissions = PermissionSet::from_bits(rest[1]);
        let issued_secs = i64::from_le_bytes(
            rest[2..10]
                .try_into()
                .map_err(|_| fail("issued_at truncated"))?,
        );
        let expires_secs = i64::from_le_bytes(
            rest[10..18]
                .try_into()
                .map_err(|_| fail("expires_at truncated"))?,
        );
        let revoked = match rest[18] {
            0 => false,
            1 => true,
            _ => return Err(fail("revoked flag out of range")),
        };
        let issued_at = DateTime::from_timestamp(issued_secs, 0)
            .ok_or_else(|| fail("issued_at out of range"))?;
        let expires_at = if expires_secs == 0 {
            None
        } else {
            Some(
                DateTime::from_timestamp(expires_secs, 0)
                    .ok_or_else(|| fail("expires_at out of range"))?,
            )
        };
        Ok(Self {
            agent_id,
            name,
            role,
            permissions,
            issued_at,
            expires_at,
            revoked,
        })
    }
}

/// Serialize all bindings and atomically replace the file at `path`.
pub(crate) fn save_bindings(path: &Path, records: &[PersistedBinding]) -> IdentityResult<()> {
    let mut out = Vec::new();
    for record in records {
        let body = record.encode();
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &out)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), records = records.len(), "bindings persisted");
    Ok(())
}

/// Load bindings from `path`. A missing file is an empty store; a malformed
/// file is fatal at boot.
pub(crate) fn load_bindings(path: &Path) -> IdentityResult<Vec<PersistedBinding>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    let mut cursor = &bytes[..];
    while !cursor.is_empty() {
        if cursor.len() < 4 {
            return Err(IdentityError::MalformedState(
                "trailing bytes shorter than a length prefix".into(),
            ));
        }
        let len = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
        cursor = &cursor[4..];
        if cursor.len() < len {
            return Err(IdentityError::MalformedState(format!(
                "record claims {len} bytes, {} present",
                cursor.len()
            )));
        }
        records.push(PersistedBinding::decode(&cursor[..len])?);
        cursor = &cursor[len..];
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u16, revoked: bool) -> PersistedBinding {
        PersistedBinding {
            agent_id: AgentId::new(id),
            name: AgentName::new(format!("agent-{id}")).unwrap(),
            role: Role::Agent,
            permissions: Role::Agent.permissions(),
            issued_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            expires_at: Some(DateTime::from_timestamp(1_700_003_600, 0).unwrap()),
            revoked,
        }
    }

    #[test]
    fn test_record_round_trip() {
        let record = sample(10, false);
        assert_eq!(PersistedBinding::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.dat");
        let records = vec![sample(1, false), sample(2, true)];
        save_bindings(&path, &records).unwrap();
        assert_eq!(load_bindings(&path).unwrap(), records);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_bindings(&dir.path().join("absent.dat")).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.dat");
        save_bindings(&path, &[sample(1, false)]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load_bindings(&path),
            Err(IdentityError::MalformedState(_))
        ));
    }

    #[test]
    fn test_unknown_role_is_fatal() {
        let record = sample(1, false);
        let mut body = record.encode();
        let name_len = record.name.as_str().len();
        body[3 + name_len] = 0xFF;
        assert!(matches!(
            PersistedBinding::decode(&body),
            Err(IdentityError::MalformedState(_))
        ));
    }

    #[test]
    fn test_replace_is_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.dat");
        save_bindings(&path, &[sample(1, false)]).unwrap();
        save_bindings(&path, &[sample(1, true), sample(2, false)]).unwrap();
        let loaded = load_bindings(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].revoked);
        assert!(!path.with_extension("tmp").exists());
    }
}
