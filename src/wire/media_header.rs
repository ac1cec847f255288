//! Fixed 20-byte big-endian media datagram header (§3, §4.1).

/// Magic value identifying a beamroom media datagram: ASCII `"BMRV"`.
pub const MAGIC: u32 = 0x424D_5256;

/// Size of the fixed header, in bytes.
pub const MEDIA_HEADER_LEN: usize = 20;

/// `flags` bit: this part belongs to a keyframe access unit.
pub const KEYFRAME: u16 = 1 << 0;
/// `flags` bit: part 0 carries a parameter-set blob immediately after the
/// header.
pub const HAS_PARAM_SET: u16 = 1 << 1;

/// A parsed media datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    /// Access-unit sequence number. Increments by one per access unit and is
    /// allowed to wrap.
    pub seq: u32,
    /// Index of this part within the access unit, `0..part_count`.
    pub part_index: u16,
    /// Total number of parts in the access unit.
    pub part_count: u16,
    /// `KEYFRAME` / `HAS_PARAM_SET` bit flags.
    pub flags: u16,
    /// Frame width in pixels, repeated on every part of the access unit.
    pub width: u16,
    /// Frame height in pixels, repeated on every part of the access unit.
    pub height: u16,
    /// Length in bytes of the parameter-set blob following this header.
    /// Non-zero only on part 0 of a keyframe that carries parameter sets.
    pub config_bytes: u16,
}

impl MediaHeader {
    /// Whether this part's access unit is a keyframe.
    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        self.flags & KEYFRAME != 0
    }

    /// Whether this part carries a parameter-set blob.
    #[must_use]
    pub fn has_param_set(&self) -> bool {
        self.flags & HAS_PARAM_SET != 0
    }

    /// Serializes the header to its 20-byte wire representation.
    #[must_use]
    pub fn to_bytes(self) -> [u8; MEDIA_HEADER_LEN] {
        let mut buf = [0u8; MEDIA_HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..10].copy_from_slice(&self.part_index.to_be_bytes());
        buf[10..12].copy_from_slice(&self.part_count.to_be_bytes());
        buf[12..14].copy_from_slice(&self.flags.to_be_bytes());
        buf[14..16].copy_from_slice(&self.width.to_be_bytes());
        buf[16..18].copy_from_slice(&self.height.to_be_bytes());
        buf[18..20].copy_from_slice(&self.config_bytes.to_be_bytes());
        buf
    }

    /// Parses a header from the front of `data`, returning the header and
    /// the offset of the payload that follows it (always
    /// [`MEDIA_HEADER_LEN`] on success). Returns `None` if `data` is too
    /// short or the magic doesn't match.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < MEDIA_HEADER_LEN {
            return None;
        }
        let magic = u32::from_be_bytes(data[0..4].try_into().ok()?);
        if magic != MAGIC {
            return None;
        }
        let header = Self {
            seq: u32::from_be_bytes(data[4..8].try_into().ok()?),
            part_index: u16::from_be_bytes(data[8..10].try_into().ok()?),
            part_count: u16::from_be_bytes(data[10..12].try_into().ok()?),
            flags: u16::from_be_bytes(data[12..14].try_into().ok()?),
            width: u16::from_be_bytes(data[14..16].try_into().ok()?),
            height: u16::from_be_bytes(data[16..18].try_into().ok()?),
            config_bytes: u16::from_be_bytes(data[18..20].try_into().ok()?),
        };
        Some((header, MEDIA_HEADER_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MediaHeader {
        MediaHeader {
            seq: 0xDEAD_BEEF,
            part_index: 2,
            part_count: 5,
            flags: KEYFRAME | HAS_PARAM_SET,
            width: 1920,
            height: 1080,
            config_bytes: 37,
        }
    }

    #[test]
    fn round_trip() {
        let h = sample();
        let bytes = h.to_bytes();
        let (parsed, offset) = MediaHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(offset, MEDIA_HEADER_LEN);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0xFF;
        assert!(MediaHeader::parse(&bytes).is_none());
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = sample().to_bytes();
        assert!(MediaHeader::parse(&bytes[..MEDIA_HEADER_LEN - 1]).is_none());
    }

    #[test]
    fn flag_helpers() {
        let h = sample();
        assert!(h.is_keyframe());
        assert!(h.has_param_set());

        let delta = MediaHeader { flags: 0, ..h };
        assert!(!delta.is_keyframe());
        assert!(!delta.has_param_set());
    }

    #[test]
    fn trailing_payload_is_untouched_by_parse() {
        let h = sample();
        let mut bytes = h.to_bytes().to_vec();
        bytes.extend_from_slice(b"payload-goes-here");
        let (parsed, offset) = MediaHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(&bytes[offset..], b"payload-goes-here");
    }
}
