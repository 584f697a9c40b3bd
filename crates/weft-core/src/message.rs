//! Message construction, target addressing, and payload layout.
//!
//! A message is the fixed header plus an immutable payload. The payload may
//! begin with structural prefixes, in this order when present:
//!
//! 1. fragment metadata (8 bytes, when `FRAGMENTED` is set),
//! 2. an externalized target list (when `target_count > 4`),
//! 3. a NUL-terminated topic string (events only),
//!
//! followed by the application bytes. Messages are never mutated after they
//! enter the fabric; fan-out shares handles, not copies.

use std::borrow::Cow;

use crate::error::{CoreError, CoreResult};
use crate::header::{HEADER_LEN, MAX_INLINE_TARGETS, MAX_PAYLOAD_LEN, MessageHeader};
use crate::types::{AgentId, MsgFlags, MsgType, Priority};

/// Maximum topic prefix length in bytes, including the NUL terminator.
pub const TOPIC_MAX_LEN: usize = 32;

/// A fabric message: fixed header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl Message {
    /// Start building a message of the given type and priority.
    #[must_use]
    pub fn builder(msg_type: MsgType, priority: Priority) -> MessageBuilder {
        MessageBuilder::new(msg_type, priority)
    }

    /// The message header.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Mutable header access, for stamping before enqueue.
    ///
    /// The fabric never calls this after a message has been enqueued.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// The full payload, including any structural prefixes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Source agent shorthand.
    #[must_use]
    pub fn source(&self) -> AgentId {
        self.header.source
    }

    /// Priority class shorthand.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.header.priority
    }

    /// Message type shorthand.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type
    }

    /// The addressed targets: inline from the header, or parsed from the
    /// payload prefix when the list was externalized.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TruncatedTargets`] when the header claims more
    /// externalized targets than the payload prefix holds.
    pub fn targets(&self) -> CoreResult<Cow<'_, [AgentId]>> {
        let count = usize::from(self.header.target_count);
        if count <= MAX_INLINE_TARGETS {
            return Ok(Cow::Borrowed(self.header.inline_targets()));
        }
        let prefix = self.after_fragment_meta();
        let need = count * 2;
        if prefix.len() < need {
            return Err(CoreError::TruncatedTargets {
                need,
                have: prefix.len(),
            });
        }
        let mut targets = Vec::with_capacity(count);
        for chunk in prefix[..need].chunks_exact(2) {
            targets.push(AgentId::new(u16::from_le_bytes([chunk[0], chunk[1]])));
        }
        Ok(Cow::Owned(targets))
    }

    /// Payload bytes after fragment metadata and any externalized target
    /// list. For events this still begins with the topic prefix.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        let rest = self.after_fragment_meta();
        let count = usize::from(self.header.target_count);
        if count > MAX_INLINE_TARGETS {
            let skip = (count * 2).min(rest.len());
            &rest[skip..]
        } else {
            rest
        }
    }

    /// The topic prefix of an event: the NUL-terminated UTF-8 string in the
    /// first [`TOPIC_MAX_LEN`] bytes of the body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTopic`] when the terminator is missing
    /// within bounds or the prefix is not valid UTF-8.
    pub fn topic(&self) -> CoreResult<&str> {
        let body = self.body();
        let window = &body[..body.len().min(TOPIC_MAX_LEN)];
        let nul = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(CoreError::InvalidTopic("missing NUL terminator"))?;
        std::str::from_utf8(&window[..nul]).map_err(|_| CoreError::InvalidTopic("not UTF-8"))
    }

    /// Application bytes of an event, after the topic prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTopic`] when the topic prefix is malformed.
    pub fn event_data(&self) -> CoreResult<&[u8]> {
        let topic_len = self.topic()?.len();
        Ok(&self.body()[topic_len + 1..])
    }

    /// Encode to wire bytes: header followed by payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode wire bytes into a message.
    ///
    /// # Errors
    ///
    /// Propagates header validation errors and rejects payloads shorter
    /// than the header's `payload_len` claim.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let header = MessageHeader::decode(bytes)?;
        let expected = header.payload_len as usize;
        let actual = bytes.len() - HEADER_LEN;
        if actual < expected {
            return Err(CoreError::TruncatedPayload { expected, actual });
        }
        let payload = bytes[HEADER_LEN..HEADER_LEN + expected].to_vec();
        let msg = Self { header, payload };
        // Force a parse of the externalized list so a truncated prefix is
        // caught at the boundary, not at dispatch.
        msg.targets()?;
        Ok(msg)
    }

    /// Reconstruct a message from parts already validated elsewhere.
    pub(crate) fn from_parts(header: MessageHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    fn after_fragment_meta(&self) -> &[u8] {
        if self.header.flags.contains(MsgFlags::FRAGMENTED) {
            let skip = crate::fragment::FragmentMeta::WIRE_LEN.min(self.payload.len());
            &self.payload[skip..]
        } else {
            &self.payload
        }
    }
}

/// Builder for [`Message`] values.
///
/// The builder assembles the payload prefixes and validates the structural
/// invariants; `msg_id`, `timestamp_ns`, and `auth_tag` stay zero until the
/// envelope stamps the message.
#[derive(Debug)]
pub struct MessageBuilder {
    msg_type: MsgType,
    priority: Priority,
    flags: MsgFlags,
    source: AgentId,
    targets: Vec<AgentId>,
    correlation_id: u64,
    topic: Option<String>,
    payload: Vec<u8>,
}

impl MessageBuilder {
    fn new(msg_type: MsgType, priority: Priority) -> Self {
        Self {
            msg_type,
            priority,
            flags: MsgFlags::NONE,
            source: AgentId::default(),
            targets: Vec::new(),
            correlation_id: 0,
            topic: None,
            payload: Vec::new(),
        }
    }

    /// Set the sending agent.
    #[must_use]
    pub fn source(mut self, source: AgentId) -> Self {
        self.source = source;
        self
    }

    /// Add a target.
    #[must_use]
    pub fn target(mut self, target: AgentId) -> Self {
        self.targets.push(target);
        self
    }

    /// Add multiple targets.
    #[must_use]
    pub fn targets(mut self, targets: impl IntoIterator<Item = AgentId>) -> Self {
        self.targets.extend(targets);
        self
    }

    /// Set the correlation id linking this message to a request.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: u64) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Merge additional flag bits.
    #[must_use]
    pub fn flags(mut self, flags: MsgFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    /// Mark the message as expecting a reply.
    #[must_use]
    pub fn reply_expected(self) -> Self {
        self.flags(MsgFlags::REPLY_EXPECTED)
    }

    /// Set the event topic prefix.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the application payload bytes.
    #[must_use]
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Assemble and validate the message.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] when the combination of type, targets,
    /// correlation id, topic, or payload size violates the wire invariants.
    pub fn build(self) -> CoreResult<Message> {
        let mut flags = self.flags;
        let target_count = self.targets.len();
        if target_count > usize::from(u8::MAX) {
            return Err(CoreError::TruncatedTargets {
                need: target_count * 2,
                have: usize::from(u8::MAX) * 2,
            });
        }
        if target_count > 1 {
            flags = flags.with(MsgFlags::MULTICAST);
        }

        let mut payload = Vec::new();
        if target_count > MAX_INLINE_TARGETS {
            payload.reserve(target_count * 2);
            for target in &self.targets {
                payload.extend_from_slice(&target.raw().to_le_bytes());
            }
        }
        if let Some(topic) = &self.topic {
            if topic.len() + 1 > TOPIC_MAX_LEN {
                return Err(CoreError::InvalidTopic("longer than 31 bytes"));
            }
            if topic.as_bytes().contains(&0) {
                return Err(CoreError::InvalidTopic("embedded NUL"));
            }
            payload.extend_from_slice(topic.as_bytes());
            payload.push(0);
        }
        payload.extend_from_slice(&self.payload);
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CoreError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut inline = [AgentId::default(); MAX_INLINE_TARGETS];
        if target_count <= MAX_INLINE_TARGETS {
            inline[..target_count].copy_from_slice(&self.targets);
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = MessageHeader {
            priority: self.priority,
            msg_type: self.msg_type,
            flags,
            msg_id: 0,
            correlation_id: self.correlation_id,
            source: self.source,
            target_count: target_count as u8,
            timestamp_ns: 0,
            payload_len: payload.len() as u32,
            auth_tag: [0u8; 16],
            targets: inline,
        };
        header.validate()?;
        Ok(Message { header, payload })
    }
}
