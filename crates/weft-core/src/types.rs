//! Identity, role, and message classification primitives.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Stable 16-bit agent identifier, unique for the process lifetime.
///
/// Id 0 is reserved for the administrative control endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct AgentId(pub u16);

impl AgentId {
    /// The reserved administrative agent.
    pub const ADMIN: Self = Self(0);

    /// Create an agent id from its raw value.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Whether this is the reserved administrative id.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent:{}", self.0)
    }
}

impl From<u16> for AgentId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Human-readable agent name, at most 31 UTF-8 bytes. Used in logs only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentName(String);

impl AgentName {
    /// Maximum name length in bytes.
    pub const MAX_LEN: usize = 31;

    /// Validate and wrap a display name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NameTooLong`] when the name exceeds 31 bytes.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.len() > Self::MAX_LEN {
            return Err(CoreError::NameTooLong { len: name.len() });
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read messages and fabric state.
    Read,
    /// Send ordinary messages.
    Write,
    /// Dispatch tasks for execution.
    Execute,
    /// Administrative control operations.
    Admin,
    /// Observe metrics and audit streams.
    Monitor,
    /// Internal system traffic.
    System,
}

impl Permission {
    const fn bit(self) -> u8 {
        match self {
            Self::Read => 1 << 0,
            Self::Write => 1 << 1,
            Self::Execute => 1 << 2,
            Self::Admin => 1 << 3,
            Self::Monitor => 1 << 4,
            Self::System => 1 << 5,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Admin => "admin",
            Self::Monitor => "monitor",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// Bitmask of [`Permission`] values attached to an identity binding.
///
/// Permission checks are a pure bitmask AND; behavioral differences between
/// roles are resolved through this set, never through type hierarchies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct PermissionSet(u8);

impl PermissionSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);
    /// Every permission bit set.
    pub const ALL: Self = Self(0b0011_1111);

    /// Build a set from individual permissions.
    #[must_use]
    pub fn of(perms: &[Permission]) -> Self {
        let mut set = Self::EMPTY;
        for p in perms {
            set.0 |= p.bit();
        }
        set
    }

    /// Whether the set contains `perm`.
    #[must_use]
    pub const fn contains(self, perm: Permission) -> bool {
        self.0 & perm.bit() != 0
    }

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Add a permission, returning the extended set.
    #[must_use]
    pub const fn with(self, perm: Permission) -> Self {
        Self(self.0 | perm.bit())
    }

    /// Raw bits, as persisted in binding records.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct from raw bits; unknown bits are discarded.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }
}

impl std::fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "perms:{:#08b}", self.0)
    }
}

/// Closed set of agent roles. Each role maps to a fixed permission mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control, including registration and key rotation.
    Admin,
    /// Internal fabric services.
    System,
    /// Ordinary worker agent.
    Agent,
    /// Read-only observer of metrics and audit streams.
    Monitor,
    /// Unprivileged visitor; may read only.
    Guest,
}

impl Role {
    /// The permission mask this role grants.
    #[must_use]
    pub fn permissions(self) -> PermissionSet {
        use Permission::{Admin, Execute, Monitor, Read, System, Write};
        match self {
            Self::Admin => PermissionSet::ALL,
            Self::System => PermissionSet::of(&[Read, Write, Execute, System]),
            Self::Agent => PermissionSet::of(&[Read, Write, Execute]),
            Self::Monitor => PermissionSet::of(&[Read, Monitor]),
            Self::Guest => PermissionSet::of(&[Read]),
        }
    }

    /// Stable discriminant used in persisted binding records.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::Admin => 0,
            Self::System => 1,
            Self::Agent => 2,
            Self::Monitor => 3,
            Self::Guest => 4,
        }
    }

    /// Reconstruct a role from its persisted discriminant.
    #[must_use]
    pub const fn from_discriminant(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Admin),
            1 => Some(Self::System),
            2 => Some(Self::Agent),
            3 => Some(Self::Monitor),
            4 => Some(Self::Guest),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admin => "admin",
            Self::System => "system",
            Self::Agent => "agent",
            Self::Monitor => "monitor",
            Self::Guest => "guest",
        };
        f.write_str(s)
    }
}

/// Priority class, 0 (Emergency) through 5 (Bulk). Each class owns a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// Never dropped; a full Emergency ring is a fatal invariant violation.
    Emergency = 0,
    /// Latency-critical control traffic.
    Critical = 1,
    /// Interactive request/response traffic.
    High = 2,
    /// Default class.
    Medium = 3,
    /// Background chatter.
    Low = 4,
    /// Throughput-oriented batch traffic.
    Bulk = 5,
}

impl Priority {
    /// Number of priority classes.
    pub const COUNT: usize = 6;

    /// All classes, highest priority first.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Emergency,
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Bulk,
    ];

    /// Wire discriminant.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Index into per-class arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decode a wire discriminant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriority`] for values outside 0..=5.
    pub const fn from_u8(raw: u8) -> CoreResult<Self> {
        match raw {
            0 => Ok(Self::Emergency),
            1 => Ok(Self::Critical),
            2 => Ok(Self::High),
            3 => Ok(Self::Medium),
            4 => Ok(Self::Low),
            5 => Ok(Self::Bulk),
            other => Err(CoreError::InvalidPriority(other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Emergency => "emergency",
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Bulk => "bulk",
        };
        f.write_str(s)
    }
}

/// Message type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MsgType {
    /// RPC request; carries a correlation id when a reply is expected.
    Request = 0,
    /// RPC response; correlation id mandatory.
    Response = 1,
    /// Pub/sub event; routed by topic prefix.
    Event = 2,
    /// Work-queue task.
    Task = 3,
    /// Work-queue completion; correlation id mandatory.
    Result = 4,
    /// Delivered to every registered agent except the source.
    Broadcast = 5,
    /// Directed emergency traffic.
    Emergency = 6,
}

impl MsgType {
    /// Wire discriminant.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire discriminant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMsgType`] for unknown values.
    pub const fn from_u8(raw: u8) -> CoreResult<Self> {
        match raw {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Event),
            3 => Ok(Self::Task),
            4 => Ok(Self::Result),
            5 => Ok(Self::Broadcast),
            6 => Ok(Self::Emergency),
            other => Err(CoreError::InvalidMsgType(other)),
        }
    }

    /// Name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Task => "task",
            Self::Result => "result",
            Self::Broadcast => "broadcast",
            Self::Emergency => "emergency",
        }
    }

    /// Whether the fabric resolves the recipients itself (no explicit targets).
    #[must_use]
    pub const fn is_fanout(self) -> bool {
        matches!(self, Self::Broadcast | Self::Event)
    }

    /// Whether a non-zero correlation id is mandatory.
    #[must_use]
    pub const fn requires_correlation(self) -> bool {
        matches!(self, Self::Response | Self::Result)
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-message flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MsgFlags(u8);

impl MsgFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Sender expects a response to this message's correlation id.
    pub const REPLY_EXPECTED: Self = Self(1 << 0);
    /// Payload is compressed (codec chosen by the application).
    pub const COMPRESSED: Self = Self(1 << 1);
    /// Payload begins with fragment metadata.
    pub const FRAGMENTED: Self = Self(1 << 2);
    /// Message addresses an inline or externalized target list.
    pub const MULTICAST: Self = Self(1 << 3);

    const KNOWN: u8 = 0b0000_1111;

    /// Whether every bit of `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    /// Raw wire byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct from a wire byte; unknown bits are preserved for
    /// forward compatibility but never interpreted.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The flag bits this build understands.
    #[must_use]
    pub const fn known_bits() -> u8 {
        Self::KNOWN
    }
}
