//! SPS/PPS parameter-set blob (§3), carried on part 0 of keyframes that have
//! `HAS_PARAM_SET` set.
//!
//! Wire format: `u8 spsCount, u8 ppsCount, (u16 len, bytes) × spsCount,
//! (u16 len, bytes) × ppsCount`, all lengths big-endian.

use crate::error::TransportError;

/// A decoded (or to-be-encoded) set of H.264 SPS/PPS NAL units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSets {
    /// Sequence parameter sets.
    pub sps: Vec<Vec<u8>>,
    /// Picture parameter sets.
    pub pps: Vec<Vec<u8>>,
}

fn encode_list(list: &[Vec<u8>], out: &mut Vec<u8>) -> Result<(), TransportError> {
    for item in list {
        let len: u16 = item
            .len()
            .try_into()
            .map_err(|_| TransportError::Encode(format!("parameter set of {} bytes exceeds u16", item.len())))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(item);
    }
    Ok(())
}

impl ParamSets {
    /// Encodes this parameter set list to its wire representation.
    ///
    /// # Errors
    /// Fails if either list has more than 255 entries, or any entry is
    /// longer than `u16::MAX` bytes — both are outside what the 1-byte count
    /// / 2-byte length fields can represent.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let sps_count: u8 = self
            .sps
            .len()
            .try_into()
            .map_err(|_| TransportError::Encode("more than 255 SPS entries".into()))?;
        let pps_count: u8 = self
            .pps
            .len()
            .try_into()
            .map_err(|_| TransportError::Encode("more than 255 PPS entries".into()))?;

        let mut out = Vec::with_capacity(2);
        out.push(sps_count);
        out.push(pps_count);
        encode_list(&self.sps, &mut out)?;
        encode_list(&self.pps, &mut out)?;
        Ok(out)
    }

    /// Decodes a parameter-set blob. Returns `None` on any structural
    /// inconsistency (truncated length-prefixed entries).
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let sps_count = data[0] as usize;
        let pps_count = data[1] as usize;
        let mut cursor = 2usize;

        let mut read_list = |count: usize, cursor: &mut usize| -> Option<Vec<Vec<u8>>> {
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let len_bytes = data.get(*cursor..*cursor + 2)?;
                let len = u16::from_be_bytes(len_bytes.try_into().ok()?) as usize;
                *cursor += 2;
                let bytes = data.get(*cursor..*cursor + len)?;
                *cursor += len;
                list.push(bytes.to_vec());
            }
            Some(list)
        };

        let sps = read_list(sps_count, &mut cursor)?;
        let pps = read_list(pps_count, &mut cursor)?;
        Some(Self { sps, pps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        let p = ParamSets {
            sps: vec![vec![0x67, 0x42, 0x00, 0x1e]],
            pps: vec![vec![0x68, 0xce, 0x3c, 0x80]],
        };
        let encoded = p.encode().unwrap();
        assert_eq!(ParamSets::decode(&encoded), Some(p));
    }

    #[test]
    fn round_trip_empty() {
        let p = ParamSets::default();
        let encoded = p.encode().unwrap();
        assert_eq!(encoded, vec![0, 0]);
        assert_eq!(ParamSets::decode(&encoded), Some(p));
    }

    #[test]
    fn round_trip_multiple_entries() {
        let p = ParamSets {
            sps: vec![vec![1, 2, 3], vec![4, 5]],
            pps: vec![vec![6], vec![7, 8, 9, 10]],
        };
        let encoded = p.encode().unwrap();
        assert_eq!(ParamSets::decode(&encoded), Some(p));
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        let p = ParamSets { sps: vec![vec![1, 2, 3, 4, 5]], pps: vec![] };
        let mut encoded = p.encode().unwrap();
        encoded.truncate(encoded.len() - 1);
        assert_eq!(ParamSets::decode(&encoded), None);
    }

    #[test]
    fn encode_rejects_too_many_entries() {
        let p = ParamSets { sps: vec![vec![]; 256], pps: vec![] };
        assert!(p.encode().is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trips_for_arbitrary_sps_pps(
            sps in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32), 0..8),
            pps in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32), 0..8),
        ) {
            let p = ParamSets { sps, pps };
            let encoded = p.encode().unwrap();
            proptest::prop_assert_eq!(ParamSets::decode(&encoded), Some(p));
        }
    }
}
