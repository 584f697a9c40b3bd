//! Fragmentation of oversized payloads and bounded reassembly.
//!
//! Payloads above the per-message cap are split into fragments. Each
//! fragment's payload begins with 8 bytes of metadata:
//! `(total_fragments: u16, this_fragment: u16, fragment_group_id: u32)`,
//! little-endian. Reassembly memory is bounded; when the bound is reached
//! the oldest incomplete group is discarded.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::types::AgentId;

/// Default reassembly memory bound: 16 MiB per fabric.
pub(crate) const DEFAULT_REASSEMBLY_BOUND: usize = 16 * 1024 * 1024;

/// Fragment metadata carried in the first 8 payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentMeta {
    /// Total fragments in the group.
    pub total: u16,
    /// This fragment's index, 0-based.
    pub index: u16,
    /// Group id, unique per (source, reassembly window).
    pub group: u32,
}

impl FragmentMeta {
    /// Wire length of the metadata prefix.
    pub const WIRE_LEN: usize = 8;

    /// Encode to the 8-byte wire prefix.
    #[must_use]
    pub fn encode(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..2].copy_from_slice(&self.total.to_le_bytes());
        buf[2..4].copy_from_slice(&self.index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.group.to_le_bytes());
        buf
    }

    /// Decode from a payload prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFragment`] for zero totals or an index
    /// outside the group.
    pub fn decode(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < Self::WIRE_LEN {
            return Err(CoreError::InvalidFragment { index: 0, total: 0 });
        }
        let meta = Self {
            total: u16::from_le_bytes([buf[0], buf[1]]),
            index: u16::from_le_bytes([buf[2], buf[3]]),
            group: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        };
        if meta.total == 0 || meta.index >= meta.total {
            return Err(CoreError::InvalidFragment {
                index: meta.index,
                total: meta.total,
            });
        }
        Ok(meta)
    }
}

/// Split `payload` into fragment payloads of at most `chunk` data bytes,
/// each prefixed with its [`FragmentMeta`].
///
/// # Errors
///
/// Returns [`CoreError::InvalidFragment`] when the payload would need more
/// than `u16::MAX` fragments at the given chunk size.
pub fn fragment_payload(payload: &[u8], chunk: usize, group: u32) -> CoreResult<Vec<Vec<u8>>> {
    let chunk = chunk.max(1);
    let total = payload.len().div_ceil(chunk).max(1);
    if total > usize::from(u16::MAX) {
        return Err(CoreError::InvalidFragment {
            index: 0,
            total: u16::MAX,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let total_u16 = total as u16;
    let mut out = Vec::with_capacity(total);
    for (index, data) in payload.chunks(chunk).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let meta = FragmentMeta {
            total: total_u16,
            index: index as u16,
            group,
        };
        let mut frag = Vec::with_capacity(FragmentMeta::WIRE_LEN + data.len());
        frag.extend_from_slice(&meta.encode());
        frag.extend_from_slice(data);
        out.push(frag);
    }
    if out.is_empty() {
        // Zero-length payloads still produce one empty fragment.
        let meta = FragmentMeta {
            total: 1,
            index: 0,
            group,
        };
        out.push(meta.encode().to_vec());
    }
    Ok(out)
}

struct PartialGroup {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    bytes: usize,
    arrival: u64,
}

/// Bounded reassembly buffer for fragmented payloads.
///
/// Groups are keyed by `(source, group_id)`. When the configured memory
/// bound would be exceeded, the oldest incomplete group is evicted first.
pub struct Reassembler {
    groups: HashMap<(AgentId, u32), PartialGroup>,
    bound: usize,
    in_use: usize,
    tick: u64,
}

impl Reassembler {
    /// Create a reassembler with the default 16 MiB bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bound(DEFAULT_REASSEMBLY_BOUND)
    }

    /// Create a reassembler with an explicit memory bound in bytes.
    #[must_use]
    pub fn with_bound(bound: usize) -> Self {
        Self {
            groups: HashMap::new(),
            bound,
            in_use: 0,
            tick: 0,
        }
    }

    /// Offer one fragment payload (metadata prefix included).
    ///
    /// Returns the reassembled payload once every fragment of the group has
    /// arrived, `None` while the group is incomplete. Duplicate fragments
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFragment`] for malformed metadata or a
    /// total that disagrees with earlier fragments of the same group.
    pub fn offer(&mut self, source: AgentId, payload: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let meta = FragmentMeta::decode(payload)?;
        let data = &payload[FragmentMeta::WIRE_LEN..];
        self.tick += 1;

        let key = (source, meta.group);
        let arrival = self.tick;
        let entry = self.groups.entry(key).or_insert_with(|| PartialGroup {
            fragments: vec![None; usize::from(meta.total)],
            received: 0,
            bytes: 0,
            arrival,
        });
        if entry.fragments.len() != usize::from(meta.total) {
            return Err(CoreError::InvalidFragment {
                index: meta.index,
                total: meta.total,
            });
        }
        let slot = &mut entry.fragments[usize::from(meta.index)];
        if slot.is_some() {
            // Duplicate fragment; replay protection already audited it.
            return Ok(None);
        }
        *slot = Some(data.to_vec());
        entry.received += 1;
        entry.bytes += data.len();
        self.in_use += data.len();

        if entry.received == entry.fragments.len() {
            let group = self
                .groups
                .remove(&key)
                .ok_or(CoreError::InvalidFragment {
                    index: meta.index,
                    total: meta.total,
                })?;
            self.in_use -= group.bytes;
            let mut assembled = Vec::with_capacity(group.bytes);
            for frag in group.fragments.into_iter().flatten() {
                assembled.extend_from_slice(&frag);
            }
            return Ok(Some(assembled));
        }

        self.evict_to_bound();
        Ok(None)
    }

    /// Bytes currently buffered across incomplete groups.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.in_use
    }

    fn evict_to_bound(&mut self) {
        while self.in_use > self.bound {
            let Some((&key, _)) = self
                .groups
                .iter()
                .min_by_key(|(_, group)| group.arrival)
            else {
                break;
            };
            if let Some(group) = self.groups.remove(&key) {
                self.in_use -= group.bytes;
                warn!(
                    source = %key.0,
                    group = key.1,
                    bytes = group.bytes,
                    "reassembly bound reached, dropping oldest incomplete group"
                );
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_round_trip() {
        let meta = FragmentMeta {
            total: 3,
            index: 1,
            group: 0xDEAD_BEEF,
        };
        assert_eq!(FragmentMeta::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn test_meta_rejects_out_of_range_index() {
        let meta = FragmentMeta {
            total: 2,
            index: 2,
            group: 1,
        };
        assert!(FragmentMeta::decode(&meta.encode()).is_err());
    }

    #[test]
    fn test_fragment_and_reassemble() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let frags = fragment_payload(&payload, 4096, 7).unwrap();
        assert_eq!(frags.len(), 3);

        let mut reasm = Reassembler::new();
        let source = AgentId::new(5);
        // Deliver out of order; the window tolerates reordering.
        assert!(reasm.offer(source, &frags[2]).unwrap().is_none());
        assert!(reasm.offer(source, &frags[0]).unwrap().is_none());
        let assembled = reasm.offer(source, &frags[1]).unwrap().unwrap();
        assert_eq!(assembled, payload);
        assert_eq!(reasm.buffered_bytes(), 0);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let frags = fragment_payload(&[1, 2, 3, 4], 2, 1).unwrap();
        let mut reasm = Reassembler::new();
        let source = AgentId::new(5);
        assert!(reasm.offer(source, &frags[0]).unwrap().is_none());
        assert!(reasm.offer(source, &frags[0]).unwrap().is_none());
        assert!(reasm.offer(source, &frags[1]).unwrap().is_some());
    }

    #[test]
    fn test_groups_keyed_by_source() {
        let frags = fragment_payload(&[9; 8], 4, 1).unwrap();
        let mut reasm = Reassembler::new();
        assert!(reasm.offer(AgentId::new(1), &frags[0]).unwrap().is_none());
        // Same group id from a different source is a distinct group.
        assert!(reasm.offer(AgentId::new(2), &frags[1]).unwrap().is_none());
        assert!(reasm.offer(AgentId::new(1), &frags[1]).unwrap().is_some());
    }

    #[test]
    fn test_bound_evicts_oldest_group() {
        let mut reasm = Reassembler::with_bound(40);
        let source = AgentId::new(1);
        let old = fragment_payload(&[1; 60], 30, 1).unwrap();
        let new = fragment_payload(&[2; 60], 30, 2).unwrap();
        assert!(reasm.offer(source, &old[0]).unwrap().is_none());
        assert!(reasm.offer(source, &new[0]).unwrap().is_none());
        assert!(reasm.buffered_bytes() <= 40);
        // Group 1 was evicted; completing it now restarts the group.
        assert!(reasm.offer(source, &old[1]).unwrap().is_none());
    }

    #[test]
    fn test_empty_payload_single_fragment() {
        let frags = fragment_payload(&[], 1024, 3).unwrap();
        assert_eq!(frags.len(), 1);
        let mut reasm = Reassembler::new();
        let assembled = reasm.offer(AgentId::new(1), &frags[0]).unwrap().unwrap();
        assert!(assembled.is_empty());
    }
}
