//! The key and identity store: single writer, wait-free readers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use weft_core::{AgentId, AgentName, Permission, PermissionSet, Role};

use crate::binding::IdentityBinding;
use crate::error::{IdentityError, IdentityResult};
use crate::pattern::ResourcePattern;
use crate::persist::{PersistedBinding, load_bindings, save_bindings};
use crate::secret::{MasterKey, SessionSecret};
use crate::token::{Claims, Token};

/// Bindings indexed by agent id, plus the name acceleration map.
///
/// The table is immutable once published; every mutation builds a new table
/// and swaps the `Arc`, so readers work on a consistent snapshot without
/// blocking the writer.
#[derive(Debug, Default, Clone)]
struct BindingTable {
    slots: Vec<Option<Arc<IdentityBinding>>>,
    by_name: HashMap<String, AgentId>,
}

impl BindingTable {
    fn get(&self, agent: AgentId) -> Option<&Arc<IdentityBinding>> {
        self.slots.get(usize::from(agent.raw()))?.as_ref()
    }
}

/// The key and identity store (KIS).
///
/// Owns agent identities, role assignments, session secrets, and token
/// material. Mutations are serialized through the write half of the lock
/// and published copy-on-write; readers clone the current snapshot `Arc`.
pub struct IdentityStore {
    master: MasterKey,
    table: RwLock<Arc<BindingTable>>,
    persist_path: Option<PathBuf>,
}

impl IdentityStore {
    /// Create an empty store over a master key.
    #[must_use]
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            table: RwLock::new(Arc::new(BindingTable::default())),
            persist_path: None,
        }
    }

    /// Create a store backed by a binding file, loading any existing
    /// records. Session secrets are re-derived from the master key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedState`] (fatal at boot) when the
    /// file exists but cannot be parsed.
    pub fn with_persistence(master: MasterKey, path: impl Into<PathBuf>) -> IdentityResult<Self> {
        let path = path.into();
        let records = load_bindings(&path)?;
        let mut table = BindingTable::default();
        for record in records {
            let slot = usize::from(record.agent_id.raw());
            if table.slots.len() <= slot {
                table.slots.resize(slot + 1, None);
            }
            if table.slots[slot].is_some() {
                return Err(IdentityError::MalformedState(format!(
                    "duplicate record for {}",
                    record.agent_id
                )));
            }
            let secret = master.derive_session_secret(record.agent_id, 0);
            table
                .by_name
                .insert(record.name.as_str().to_string(), record.agent_id);
            table.slots[slot] = Some(Arc::new(IdentityBinding {
                agent_id: record.agent_id,
                name: record.name,
                role: record.role,
                permissions: record.permissions,
                resource_scope: None,
                session_secret: Arc::new(secret),
                generation: 0,
                issued_at: record.issued_at,
                expires_at: record.expires_at,
                revoked: record.revoked,
            }));
        }
        info!(
            path = %path.display(),
            bindings = table.slots.iter().filter(|s| s.is_some()).count(),
            "identity store loaded"
        );
        Ok(Self {
            master,
            table: RwLock::new(Arc::new(table)),
            persist_path: Some(path),
        })
    }

    /// Register a new agent, assigning the next free id (1 upward; id 0 is
    /// reserved for the administrative endpoint).
    ///
    /// # Errors
    ///
    /// `NameInUse` when the display name is bound, `OutOfIds` when the
    /// 16-bit id space is exhausted.
    pub fn register(
        &self,
        name: impl Into<String>,
        role: Role,
    ) -> IdentityResult<(AgentId, Arc<SessionSecret>)> {
        self.register_inner(name.into(), role, None, false)
    }

    /// Register an agent scoped to a resource subtree.
    ///
    /// # Errors
    ///
    /// As [`IdentityStore::register`], plus `InvalidPattern`.
    pub fn register_scoped(
        &self,
        name: impl Into<String>,
        role: Role,
        scope: ResourcePattern,
    ) -> IdentityResult<(AgentId, Arc<SessionSecret>)> {
        self.register_inner(name.into(), role, Some(scope), false)
    }

    /// Register the reserved administrative endpoint (agent id 0).
    ///
    /// # Errors
    ///
    /// `NameInUse` when id 0 is already bound.
    pub fn register_admin(
        &self,
        name: impl Into<String>,
    ) -> IdentityResult<(AgentId, Arc<SessionSecret>)> {
        self.register_inner(name.into(), Role::Admin, None, true)
    }

    fn register_inner(
        &self,
        name: String,
        role: Role,
        scope: Option<ResourcePattern>,
        admin_slot: bool,
    ) -> IdentityResult<(AgentId, Arc<SessionSecret>)> {
        let name = AgentName::new(name)?;
        let mut guard = self.write_table();
        let mut table = BindingTable::clone(&guard);

        if table.by_name.contains_key(name.as_str()) {
            return Err(IdentityError::NameInUse(name.as_str().to_string()));
        }
        let agent_id = if admin_slot {
            if table.get(AgentId::ADMIN).is_some() {
                return Err(IdentityError::NameInUse(name.as_str().to_string()));
            }
            AgentId::ADMIN
        } else {
            self.next_free_id(&table)?
        };

        let secret = Arc::new(self.master.derive_session_secret(agent_id, 0));
        let binding = Arc::new(IdentityBinding {
            agent_id,
            name: name.clone(),
            role,
            permissions: role.permissions(),
            resource_scope: scope,
            session_secret: Arc::clone(&secret),
            generation: 0,
            issued_at: Utc::now(),
            expires_at: None,
            revoked: false,
        });

        let slot = usize::from(agent_id.raw());
        if table.slots.len() <= slot {
            table.slots.resize(slot + 1, None);
        }
        table.slots[slot] = Some(binding);
        table.by_name.insert(name.as_str().to_string(), agent_id);
        let table = Arc::new(table);
        self.persist(&table)?;
        *guard = table;
        debug!(agent = %agent_id, name = %name, role = %role, "agent registered");
        Ok((agent_id, secret))
    }

    /// Revoke an agent's binding. Idempotent: revoking an already revoked
    /// agent succeeds without effect. Revocation is terminal.
    ///
    /// # Errors
    ///
    /// `UnknownAgent` when no binding exists for the id.
    pub fn revoke(&self, agent: AgentId) -> IdentityResult<()> {
        let mut guard = self.write_table();
        let Some(existing) = guard.get(agent) else {
            return Err(IdentityError::UnknownAgent(agent));
        };
        if existing.revoked {
            return Ok(());
        }
        let mut revoked = IdentityBinding::clone(existing);
        revoked.revoked = true;
        let mut table = BindingTable::clone(&guard);
        table.slots[usize::from(agent.raw())] = Some(Arc::new(revoked));
        let table = Arc::new(table);
        self.persist(&table)?;
        *guard = table;
        warn!(agent = %agent, "identity revoked");
        Ok(())
    }

    /// Rotate an agent's session secret. The old binding (and its secret)
    /// is replaced atomically; in-flight messages stamped with the old
    /// secret will fail verification.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`, `IdentityRevoked`.
    pub fn rotate_key(&self, agent: AgentId) -> IdentityResult<Arc<SessionSecret>> {
        let mut guard = self.write_table();
        let Some(existing) = guard.get(agent) else {
            return Err(IdentityError::UnknownAgent(agent));
        };
        if existing.revoked {
            return Err(IdentityError::IdentityRevoked(agent));
        }
        let generation = existing.generation + 1;
        let secret = Arc::new(self.master.derive_session_secret(agent, generation));
        let mut rotated = IdentityBinding::clone(existing);
        rotated.generation = generation;
        rotated.session_secret = Arc::clone(&secret);
        rotated.issued_at = Utc::now();
        let mut table = BindingTable::clone(&guard);
        table.slots[usize::from(agent.raw())] = Some(Arc::new(rotated));
        *guard = Arc::new(table);
        info!(agent = %agent, generation, "session key rotated");
        Ok(secret)
    }

    /// Replace an agent's permission mask. Creates a new binding atomically,
    /// preserving the stable id and session secret.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`, `IdentityRevoked`.
    pub fn set_permissions(&self, agent: AgentId, permissions: PermissionSet) -> IdentityResult<()> {
        let mut guard = self.write_table();
        let Some(existing) = guard.get(agent) else {
            return Err(IdentityError::UnknownAgent(agent));
        };
        if existing.revoked {
            return Err(IdentityError::IdentityRevoked(agent));
        }
        let mut updated = IdentityBinding::clone(existing);
        updated.permissions = permissions;
        let mut table = BindingTable::clone(&guard);
        table.slots[usize::from(agent.raw())] = Some(Arc::new(updated));
        let table = Arc::new(table);
        self.persist(&table)?;
        *guard = table;
        Ok(())
    }

    /// Issue a bearer token for session establishment.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`, `IdentityRevoked`.
    pub fn issue_token(&self, agent: AgentId, ttl: Duration) -> IdentityResult<Token> {
        let binding = self.binding(agent).ok_or(IdentityError::UnknownAgent(agent))?;
        if binding.revoked {
            return Err(IdentityError::IdentityRevoked(agent));
        }
        let now = Utc::now();
        let claims = Claims {
            subject: agent,
            role: binding.role,
            permissions: binding.permissions,
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(ttl)
                .map_or(i64::MAX, |t| t.timestamp()),
            jti: Uuid::new_v4(),
        };
        Token::sign(&claims, &self.master)
    }

    /// Verify a bearer token: MAC, expiry, and binding liveness.
    ///
    /// # Errors
    ///
    /// `BadMac`, `MalformedToken`, `Expired`, `UnknownAgent`,
    /// `IdentityRevoked`.
    pub fn verify_token(&self, token: &Token) -> IdentityResult<Claims> {
        let claims = token.verify_mac(&self.master)?;
        if Utc::now().timestamp() > claims.exp {
            return Err(IdentityError::Expired {
                expired_at: claims.exp,
            });
        }
        let binding = self
            .binding(claims.subject)
            .ok_or(IdentityError::UnknownAgent(claims.subject))?;
        if binding.revoked {
            return Err(IdentityError::IdentityRevoked(claims.subject));
        }
        Ok(claims)
    }

    /// The agent's current session secret. Slot lookup is a bounds check
    /// plus an array index; it does not branch on secret data.
    ///
    /// # Errors
    ///
    /// `UnknownAgent`, `IdentityRevoked`.
    pub fn session_secret(&self, agent: AgentId) -> IdentityResult<Arc<SessionSecret>> {
        let binding = self.binding(agent).ok_or(IdentityError::UnknownAgent(agent))?;
        if binding.revoked {
            return Err(IdentityError::IdentityRevoked(agent));
        }
        Ok(Arc::clone(&binding.session_secret))
    }

    /// The current binding snapshot for an agent, revoked or not.
    #[must_use]
    pub fn binding(&self, agent: AgentId) -> Option<Arc<IdentityBinding>> {
        self.read_table().get(agent).cloned()
    }

    /// Pure permission gate: bitmask AND plus optional anchored resource
    /// match. Unknown and revoked agents hold no permissions.
    #[must_use]
    pub fn check_permission(
        &self,
        agent: AgentId,
        permission: Permission,
        resource: Option<&str>,
    ) -> bool {
        let Some(binding) = self.binding(agent) else {
            return false;
        };
        if binding.revoked || !binding.permissions.contains(permission) {
            return false;
        }
        match (resource, &binding.resource_scope) {
            (Some(resource), Some(scope)) => scope.matches(resource),
            _ => true,
        }
    }

    /// Ids of all non-revoked bindings.
    #[must_use]
    pub fn active_ids(&self) -> Vec<AgentId> {
        self.read_table()
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|binding| !binding.revoked)
            .map(|binding| binding.agent_id)
            .collect()
    }

    fn next_free_id(&self, table: &BindingTable) -> IdentityResult<AgentId> {
        // Slot 0 is the admin endpoint; ids are append-only and stable.
        for raw in 1..=u16::MAX as usize {
            if table.slots.get(raw).is_none_or(Option::is_none) {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(AgentId::new(raw as u16));
            }
        }
        Err(IdentityError::OutOfIds)
    }

    fn persist(&self, table: &BindingTable) -> IdentityResult<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let records: Vec<PersistedBinding> = table
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(|binding| PersistedBinding {
                agent_id: binding.agent_id,
                name: binding.name.clone(),
                role: binding.role,
                permissions: binding.permissions,
                issued_at: binding.issued_at,
                expires_at: binding.expires_at,
                revoked: binding.revoked,
            })
            .collect();
        save_bindings(path, &records)
    }

    fn read_table(&self) -> Arc<BindingTable> {
        match self.table.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, Arc<BindingTable>> {
        match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.read_table();
        f.debug_struct("IdentityStore")
            .field("bindings", &table.slots.iter().filter(|s| s.is_some()).count())
            .field("kid", &self.master.key_id())
            .finish()
    }
}
