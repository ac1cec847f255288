//! Receiver-side reassembly, pruning, and loss accounting (§4.2, C2).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::wire::media_header::MediaHeader;
use crate::wire::param_sets::ParamSets;

/// Default staleness bound for partial access units (§4.2, §5).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(1);

/// A fully reassembled access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Access-unit sequence number.
    pub seq: u32,
    /// Whether this access unit is a keyframe (IDR).
    pub keyframe: bool,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Parameter sets, present iff the keyframe carried `HAS_PARAM_SET`.
    pub param_sets: Option<ParamSets>,
    /// AVCC-formatted (length-prefixed NAL units) payload.
    pub avcc_data: Vec<u8>,
}

struct Partial {
    created_at: Instant,
    part_count: u16,
    received: Vec<bool>,
    chunks: Vec<Option<Vec<u8>>>,
    cfg: Option<ParamSets>,
    keyframe: bool,
    width: u16,
    height: u16,
}

impl Partial {
    fn new(part_count: u16, now: Instant) -> Self {
        Self {
            created_at: now,
            part_count,
            received: vec![false; part_count as usize],
            chunks: vec![None; part_count as usize],
            cfg: None,
            keyframe: false,
            width: 0,
            height: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }
}

/// Reassembles media datagrams into access units, tracking loss and evicting
/// stale partials.
pub struct Assembler {
    partials: HashMap<u32, Partial>,
    max_age: Duration,
    last_seq: Option<u32>,
    drops: u64,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl Assembler {
    /// Creates an assembler with the given staleness bound.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self { partials: HashMap::new(), max_age, last_seq: None, drops: 0 }
    }

    /// Cumulative count of access units inferred lost by sequence-number
    /// gaps in completed units (§4.2 loss accounting).
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Number of access units currently awaiting more parts.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.partials.len()
    }

    /// Ingests one datagram, pruning stale partials first. Returns a
    /// completed [`Unit`] if this datagram was the last missing part of its
    /// access unit.
    pub fn ingest(&mut self, datagram: &[u8], now: Instant) -> Option<Unit> {
        self.prune(now);

        let (header, offset) = MediaHeader::parse(datagram)?;
        if header.part_count == 0 || header.part_index >= header.part_count {
            return None;
        }

        if let Some(existing) = self.partials.get(&header.seq) {
            if existing.part_count != header.part_count {
                self.partials.remove(&header.seq);
            }
        }

        let mut body = &datagram[offset..];

        let complete = {
            let partial = self.partials.entry(header.seq).or_insert_with(|| Partial::new(header.part_count, now));

            let mut cfg = None;
            if header.part_index == 0 && header.has_param_set() {
                let cfg_len = header.config_bytes as usize;
                if body.len() < cfg_len {
                    return None;
                }
                cfg = ParamSets::decode(&body[..cfg_len]);
                body = &body[cfg_len..];
            }

            let idx = header.part_index as usize;
            if !partial.received[idx] {
                partial.chunks[idx] = Some(body.to_vec());
                partial.received[idx] = true;
            }
            if let Some(c) = cfg {
                partial.cfg = Some(c);
            }
            partial.keyframe = header.is_keyframe();
            partial.width = header.width;
            partial.height = header.height;

            partial.is_complete()
        };

        if !complete {
            return None;
        }

        let partial = self.partials.remove(&header.seq)?;
        let mut avcc_data = Vec::new();
        for chunk in partial.chunks {
            avcc_data.extend(chunk.unwrap_or_default());
        }

        self.account_loss(header.seq);

        Some(Unit {
            seq: header.seq,
            keyframe: partial.keyframe,
            width: partial.width,
            height: partial.height,
            param_sets: partial.cfg,
            avcc_data,
        })
    }

    /// Removes every partial whose first datagram arrived more than
    /// `max_age` before `now`.
    pub fn prune(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.partials.retain(|_, p| now.duration_since(p.created_at) <= max_age);
    }

    fn account_loss(&mut self, seq: u32) {
        if let Some(last) = self.last_seq {
            // Wraparound-safe forward distance: treat `seq`/`last` as points on
            // a 32-bit ring and take the signed interpretation of the
            // unsigned difference, matching serial-number arithmetic (RFC
            // 1982). A plain `seq > last` comparison breaks exactly at the
            // wrap boundary (e.g. `last = u32::MAX - 1`, `seq = 0`).
            let diff = seq.wrapping_sub(last) as i32;
            if diff > 0 {
                let gap = diff as u32 - 1;
                self.drops = self.drops.wrapping_add(u64::from(gap));
            }
        }
        self.last_seq = Some(seq);
    }
}
