//! Newline-delimited JSON control envelope (§3, §4.1).
//!
//! Each message is one JSON object per line. Decoding is tag-free: we try
//! each variant in the fixed order below and accept the first that parses
//! structurally — exactly what `#[serde(untagged)]` does, which is why
//! [`ControlMessage`] is declared that way rather than with a `#[serde(tag =
//! "type")]` discriminant (contrast the teacher's `TeacherMessage`/
//! `StudentMessage`, which do tag). `Heartbeat.hb` is a required field
//! specifically so arbitrary unrelated JSON objects can't be mis-decoded as
//! heartbeats (§9).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;

/// A pairing/media-parameter/heartbeat message, decoded without a type tag.
///
/// Variant declaration order is the decode order and is load-bearing: do not
/// reorder without re-checking for structural overlap between variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlMessage {
    /// Viewer → host: initiates pairing.
    HandshakeRequest {
        /// Application identifier; always `"beamroom"`.
        app: String,
        /// Protocol version; currently always `1`.
        ver: u32,
        /// Requested role; only `"viewer"` is accepted by a host.
        role: String,
        /// The pairing code the viewer was given out of band.
        code: String,
    },
    /// Host → viewer: the handshake outcome.
    HandshakeResponse {
        /// Whether the handshake was accepted.
        ok: bool,
        /// The new session id, present iff `ok`.
        #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none", default)]
        session_id: Option<Uuid>,
        /// The media UDP port, if already known.
        #[serde(rename = "udpPort", skip_serializing_if = "Option::is_none", default)]
        udp_port: Option<u16>,
        /// A human-readable reason, typically present when `!ok`.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },
    /// Host → viewer: the media plane's UDP port (may be re-sent at most
    /// once more per connection if it changes).
    MediaParams {
        /// The port the host's media listener is bound to.
        #[serde(rename = "udpPort")]
        udp_port: u16,
    },
    /// Host → viewer: whether the host is currently broadcasting.
    BroadcastStatus {
        /// Broadcast flag.
        on: bool,
    },
    /// Either direction: an application-level liveness heartbeat.
    Heartbeat {
        /// Monotonically increasing heartbeat counter. Required: its
        /// presence is what distinguishes a heartbeat from any other object
        /// shaped JSON value (§9).
        hb: i64,
    },
}

impl ControlMessage {
    /// Encodes this message as one line: JSON followed by `\n`.
    ///
    /// # Errors
    /// Returns [`TransportError::Encode`] if serialization fails (it
    /// shouldn't, for any value constructible through this enum, but the
    /// caller's connection-closing policy treats it as the encode error kind
    /// from §7).
    pub fn encode_line(&self) -> Result<Vec<u8>, TransportError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Attempts to decode a single line (without its terminator) as a
    /// control message. Any parse failure — malformed JSON, or JSON that
    /// doesn't structurally match any variant — yields `None`, per §7's
    /// resilience policy: invalid lines are dropped, not fatal.
    #[must_use]
    pub fn decode_line(line: &[u8]) -> Option<Self> {
        serde_json::from_slice(line).ok()
    }
}

/// A suggested cap on unterminated buffered bytes before a connection should
/// be failed for overflow (§4.1: the framer itself imposes no limit).
pub const RECOMMENDED_MAX_BUFFERED: usize = 64 * 1024;

/// Per-connection line framer.
///
/// Maintains a receive buffer across calls to [`Self::push`]; each call
/// appends newly arrived bytes and extracts every complete `\n`-terminated
/// line found so far (terminator excluded). Empty lines are silently
/// discarded. The framer does not enforce [`RECOMMENDED_MAX_BUFFERED`] —
/// callers that want the overflow guard should check
/// [`Self::buffered_len`] themselves.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every complete line extracted so far, in
    /// order. Incomplete trailing data remains buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1]; // drop the '\n'
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
        }
        lines
    }

    /// Bytes currently buffered without having seen a terminating `\n` yet.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}
