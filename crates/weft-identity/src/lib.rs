//! Weft Identity - Key and identity store (KIS) for the agent fabric.
//!
//! This crate provides:
//! - Agent identity bindings with role-derived permission masks
//! - HKDF-derived per-agent session secrets under a process master key
//! - Bearer tokens for session establishment (HMAC-SHA-256, three segments)
//! - Permission checks with anchored glob resource patterns
//! - Binding persistence as length-prefixed records with atomic replace
//!
//! # Security model
//!
//! The master key never leaves this crate. Session secrets are derived, not
//! stored, so restart recovery needs only the master key plus the persisted
//! role assignments. All secret material is zeroized on drop, and every MAC
//! comparison is constant-time.
//!
//! # Example
//!
//! ```
//! use weft_core::{Permission, Role};
//! use weft_identity::{IdentityStore, MasterKey};
//!
//! let store = IdentityStore::new(MasterKey::generate());
//! let (id, _secret) = store.register("worker-1", Role::Agent).unwrap();
//!
//! assert!(store.check_permission(id, Permission::Write, None));
//! assert!(!store.check_permission(id, Permission::Admin, None));
//!
//! let token = store.issue_token(id, chrono::Duration::minutes(5)).unwrap();
//! let claims = store.verify_token(&token).unwrap();
//! assert_eq!(claims.subject, id);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod binding;
mod error;
mod pattern;
mod persist;
mod secret;
mod store;
mod token;

pub use binding::IdentityBinding;
pub use error::{IdentityError, IdentityResult};
pub use pattern::ResourcePattern;
pub use secret::{MasterKey, SessionSecret};
pub use store::IdentityStore;
pub use token::{Claims, Token};
