//! The fixed 64-byte message header and its little-endian wire codec.
//!
//! Layout (offsets in bytes):
//!
//! | 0..4 magic | 4 version | 5 priority | 6 msg_type | 7 flags |
//! | 8..16 msg_id | 16..24 correlation_id | 24..26 source |
//! | 26 target_count | 27 reserved | 28..36 timestamp_ns |
//! | 36..40 payload_len | 40..56 auth_tag | 56..64 inline targets |

use crate::error::{CoreError, CoreResult};
use crate::types::{AgentId, MsgFlags, MsgType, Priority};

/// Wire magic, first four header bytes.
pub const MAGIC: u32 = 0x4147_454E;

/// Wire format version this build speaks.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes. Cache-line sized.
pub const HEADER_LEN: usize = 64;

/// Maximum payload length carried by a single message.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// Targets stored inline in the header; larger lists go to the payload prefix.
pub const MAX_INLINE_TARGETS: usize = 4;

/// Read a little-endian u64 at `off`. Caller has bounds-checked `buf`.
fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// Parsed message header.
///
/// `magic` and `version` are implicit: they are written on encode and
/// checked on decode, so a value of this type always represents a header
/// this build can speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Priority class selecting the ring.
    pub priority: Priority,
    /// Message type discriminant.
    pub msg_type: MsgType,
    /// Flag bits.
    pub flags: MsgFlags,
    /// Monotonically increasing per-source message id; assigned at stamp.
    pub msg_id: u64,
    /// Links a response or result to its request; 0 when absent.
    pub correlation_id: u64,
    /// Sending agent.
    pub source: AgentId,
    /// Number of addressed targets; 0 only for fabric-resolved fan-out.
    pub target_count: u8,
    /// Monotonic nanoseconds; assigned at stamp.
    pub timestamp_ns: u64,
    /// Payload length in bytes, at most [`MAX_PAYLOAD_LEN`].
    pub payload_len: u32,
    /// Truncated HMAC-SHA-256 over the canonical form; zeroed until stamped.
    pub auth_tag: [u8; 16],
    /// Inline target slots; unused entries are 0.
    pub targets: [AgentId; MAX_INLINE_TARGETS],
}

impl MessageHeader {
    /// Encode to the bit-exact 64-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4] = VERSION;
        buf[5] = self.priority.as_u8();
        buf[6] = self.msg_type.as_u8();
        buf[7] = self.flags.bits();
        buf[8..16].copy_from_slice(&self.msg_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.correlation_id.to_le_bytes());
        buf[24..26].copy_from_slice(&self.source.raw().to_le_bytes());
        buf[26] = self.target_count;
        // byte 27 reserved, stays 0
        buf[28..36].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[36..40].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[40..56].copy_from_slice(&self.auth_tag);
        for (i, target) in self.targets.iter().enumerate() {
            let off = 56 + i * 2;
            buf[off..off + 2].copy_from_slice(&target.raw().to_le_bytes());
        }
        buf
    }

    /// Encode the canonical MAC input: the wire form with `auth_tag` zeroed.
    ///
    /// Every implementation must match this form bit-for-bit; the tag is
    /// computed over it followed by the payload.
    #[must_use]
    pub fn encode_for_mac(&self) -> [u8; HEADER_LEN] {
        let mut buf = self.encode();
        buf[40..56].fill(0);
        buf
    }

    /// Decode and validate a 64-byte wire header.
    ///
    /// # Errors
    ///
    /// Rejects wrong magic or version, unknown priority/type discriminants,
    /// over-long payload claims, and structurally invalid combinations of
    /// type, targets, and correlation id.
    pub fn decode(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::TruncatedHeader {
                len: buf.len(),
                need: HEADER_LEN,
            });
        }
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(CoreError::BadMagic {
                expected: MAGIC,
                found: magic,
            });
        }
        if buf[4] != VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: buf[4],
                supported: VERSION,
            });
        }
        let priority = Priority::from_u8(buf[5])?;
        let msg_type = MsgType::from_u8(buf[6])?;
        let flags = MsgFlags::from_bits(buf[7]);
        let msg_id = read_u64(buf, 8);
        let correlation_id = read_u64(buf, 16);
        let source = AgentId::new(u16::from_le_bytes([buf[24], buf[25]]));
        let target_count = buf[26];
        let timestamp_ns = read_u64(buf, 28);
        let payload_len = u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]);
        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(CoreError::PayloadTooLarge {
                len: payload_len as usize,
                max: MAX_PAYLOAD_LEN,
            });
        }
        let mut auth_tag = [0u8; 16];
        auth_tag.copy_from_slice(&buf[40..56]);
        let mut targets = [AgentId::default(); MAX_INLINE_TARGETS];
        for (i, target) in targets.iter_mut().enumerate() {
            let off = 56 + i * 2;
            *target = AgentId::new(u16::from_le_bytes([buf[off], buf[off + 1]]));
        }

        let header = Self {
            priority,
            msg_type,
            flags,
            msg_id,
            correlation_id,
            source,
            target_count,
            timestamp_ns,
            payload_len,
            auth_tag,
            targets,
        };
        header.validate()?;
        Ok(header)
    }

    /// Structural invariants beyond field ranges.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.target_count == 0 && !self.msg_type.is_fanout() {
            return Err(CoreError::MissingTargets(self.msg_type.name()));
        }
        if self.msg_type.requires_correlation() && self.correlation_id == 0 {
            return Err(CoreError::InvalidCorrelation {
                correlation_id: 0,
                msg_type: self.msg_type.name(),
            });
        }
        // Fan-out types carry no request linkage.
        if self.msg_type.is_fanout() && self.correlation_id != 0 {
            return Err(CoreError::InvalidCorrelation {
                correlation_id: self.correlation_id,
                msg_type: self.msg_type.name(),
            });
        }
        // A reply-expecting request or task must carry the id its reply
        // will echo.
        if self.flags.contains(MsgFlags::REPLY_EXPECTED)
            && matches!(self.msg_type, MsgType::Request | MsgType::Task)
            && self.correlation_id == 0
        {
            return Err(CoreError::InvalidCorrelation {
                correlation_id: 0,
                msg_type: self.msg_type.name(),
            });
        }
        Ok(())
    }

    /// The inline targets actually in use, when the list is not externalized.
    #[must_use]
    pub fn inline_targets(&self) -> &[AgentId] {
        let n = usize::from(self.target_count).min(MAX_INLINE_TARGETS);
        if usize::from(self.target_count) > MAX_INLINE_TARGETS {
            // Externalized list lives in the payload prefix.
            &[]
        } else {
            &self.targets[..n]
        }
    }
}
