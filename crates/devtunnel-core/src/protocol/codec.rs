//! Envelope codec: payload fragmentation and reassembly.
//!
//! Encoding serializes the `Payload` once; when it exceeds the frame limit it
//! is cut into consecutive slices (never inside a UTF-8 sequence) that share
//! the message id. Reassembly buffers slices per id and glues them in
//! `fragmentNo` order before the payload JSON is parsed.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, TunnelError};

use super::envelope::{Envelope, Message, Payload, NO_FRAGMENT};

/// Encode a message into one or more envelopes.
pub fn encode(msg: &Message, max_frame_bytes: usize) -> Result<Vec<Envelope>> {
    let payload = serde_json::to_string(&msg.payload())
        .map_err(|e| TunnelError::Encode(format!("payload json: {e}")))?;

    if payload.len() <= max_frame_bytes {
        return Ok(vec![msg.envelope(payload)]);
    }

    let slices = split_payload(&payload, max_frame_bytes);
    let count = slices.len() as i64;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(i, slice)| {
            let mut env = msg.envelope(slice.to_string());
            env.fragmented = true;
            env.fragment_no = i as i64;
            env.fragment_count = count;
            env
        })
        .collect())
}

/// Decode a complete (non-fragmented or reassembled) envelope.
///
/// Fragments must go through [`Reassembler`] first.
pub fn decode(env: Envelope) -> Result<Message> {
    if env.fragmented {
        return Err(TunnelError::Decode(format!(
            "fragment {}/{} of {} decoded without reassembly",
            env.fragment_no, env.fragment_count, env.id
        )));
    }
    let payload = match env.payload.as_deref() {
        Some(p) if !p.is_empty() => parse_payload(p)?,
        _ => return Err(TunnelError::Decode("empty payload".into())),
    };
    Ok(Message::from_parts(env, payload))
}

/// Serialize an envelope into a text frame.
pub fn to_frame(env: &Envelope) -> Result<String> {
    serde_json::to_string(env).map_err(|e| TunnelError::Encode(format!("envelope json: {e}")))
}

/// Parse a text frame into an envelope (payload left serialized).
pub fn parse_frame(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| TunnelError::Decode(format!("invalid envelope json: {e}")))
}

fn parse_payload(s: &str) -> Result<Payload> {
    serde_json::from_str(s).map_err(|e| TunnelError::Decode(format!("invalid payload json: {e}")))
}

/// Cut `s` into slices of at most `max` bytes on char boundaries.
///
/// A single char wider than `max` is emitted whole so the split always
/// makes progress.
fn split_payload(s: &str, max: usize) -> Vec<&str> {
    let max = max.max(1);
    let mut parts = Vec::with_capacity(s.len() / max + 1);
    let mut rest = s;
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        parts.push(head);
        rest = tail;
    }
    parts
}

/// Per-id fragment buffer.
///
/// Entries are created on the first fragment of an id and discarded once the
/// set is complete. `clear` drops every partial set (connection reset).
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<String, BTreeMap<i64, Envelope>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one envelope.
    ///
    /// Non-fragmented envelopes decode immediately. Fragments are buffered;
    /// `Ok(None)` means "wait for more". The message is emitted exactly once,
    /// when the last missing fragment arrives.
    pub fn push(&mut self, env: Envelope) -> Result<Option<Message>> {
        if !env.fragmented {
            return decode(env).map(Some);
        }

        let count = env.fragment_count;
        let no = env.fragment_no;
        if count < 1 || no < 0 || no >= count {
            return Err(TunnelError::Decode(format!(
                "invalid fragment {no}/{count} for {}",
                env.id
            )));
        }
        if env.payload.is_none() {
            return Err(TunnelError::Decode(format!(
                "fragment {no}/{count} of {} has no payload",
                env.id
            )));
        }

        let id = env.id.clone();
        let set = self.partial.entry(id.clone()).or_default();
        set.insert(no, env);
        tracing::trace!(%id, fragment = no, count, buffered = set.len(), "buffered fragment");

        if (set.len() as i64) < count {
            return Ok(None);
        }

        let Some(set) = self.partial.remove(&id) else {
            return Ok(None);
        };
        let mut glued = String::new();
        let mut last = None;
        for (_, frag) in set {
            if let Some(p) = frag.payload.as_deref() {
                glued.push_str(p);
            }
            last = Some(frag);
        }
        let Some(mut whole) = last else {
            return Ok(None);
        };
        whole.payload = Some(glued);
        whole.fragmented = false;
        whole.fragment_no = NO_FRAGMENT;
        whole.fragment_count = NO_FRAGMENT;
        decode(whole).map(Some)
    }

    /// Number of ids with an incomplete fragment set.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}
