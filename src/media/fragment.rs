//! Sender-side fragmentation (§4.2, C2).
//!
//! Splits one access unit into MTU-safe datagrams, each carrying the shared
//! 20-byte header plus, on part 0 of a keyframe, the parameter-set blob.

use crate::error::TransportError;
use crate::wire::media_header::{MediaHeader, HAS_PARAM_SET, KEYFRAME, MEDIA_HEADER_LEN};
use crate::wire::param_sets::ParamSets;

/// Fragments `data` (an AVCC access unit) into a sequence of ready-to-send
/// datagrams.
///
/// `mtu` bounds the total datagram size, including the 20-byte header and
/// (on part 0) the parameter-set blob. `param_sets` is only carried when
/// `keyframe` is true; passing it for a non-keyframe is a caller error and is
/// ignored (the encoder only produces parameter sets on keyframes per the
/// invariant in §3).
///
/// # Errors
/// Returns [`TransportError::Encode`] if the parameter-set blob itself can't
/// be encoded, if it (plus the header) would leave no room for any payload
/// at the given MTU, or if the access unit would require more than 65535
/// parts.
pub fn fragment_access_unit(
    seq: u32,
    data: &[u8],
    keyframe: bool,
    width: u16,
    height: u16,
    param_sets: Option<&ParamSets>,
    mtu: u16,
) -> Result<Vec<Vec<u8>>, TransportError> {
    let blob = match (keyframe, param_sets) {
        (true, Some(ps)) => Some(ps.encode()?),
        _ => None,
    };
    let cfg_len: u16 = blob
        .as_ref()
        .map(|b| b.len())
        .unwrap_or(0)
        .try_into()
        .map_err(|_| TransportError::Encode("parameter-set blob exceeds u16".into()))?;

    let mtu = mtu as usize;
    let header_len = MEDIA_HEADER_LEN;
    let budget_part0 = mtu
        .checked_sub(header_len)
        .and_then(|b| b.checked_sub(cfg_len as usize))
        .filter(|&b| b > 0)
        .ok_or_else(|| TransportError::Encode("MTU too small for header and parameter-set blob".into()))?;
    let budget_rest = mtu
        .checked_sub(header_len)
        .filter(|&b| b > 0)
        .ok_or_else(|| TransportError::Encode("MTU too small for header".into()))?;

    // Slice the payload into consecutive chunks; part 0 gets the smaller
    // (param-set-shrunk) budget, every later part gets the full budget.
    let mut chunks: Vec<&[u8]> = Vec::new();
    let mut offset = 0usize;
    let mut first = true;
    loop {
        let budget = if first { budget_part0 } else { budget_rest };
        let end = (offset + budget).min(data.len());
        chunks.push(&data[offset..end]);
        offset = end;
        first = false;
        if offset >= data.len() {
            break;
        }
    }

    let part_count: u16 = chunks
        .len()
        .try_into()
        .map_err(|_| TransportError::Encode("access unit fragments into more than 65535 parts".into()))?;

    let flags_base = if keyframe { KEYFRAME } else { 0 };

    let mut datagrams = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        let part_index = i as u16;
        let is_part0 = part_index == 0;
        let flags = flags_base | if is_part0 && blob.is_some() { HAS_PARAM_SET } else { 0 };

        let header = MediaHeader {
            seq,
            part_index,
            part_count,
            flags,
            width,
            height,
            config_bytes: if is_part0 { cfg_len } else { 0 },
        };

        let mut datagram = Vec::with_capacity(header_len + chunk.len() + if is_part0 { cfg_len as usize } else { 0 });
        datagram.extend_from_slice(&header.to_bytes());
        if is_part0 {
            if let Some(ref b) = blob {
                datagram.extend_from_slice(b);
            }
        }
        datagram.extend_from_slice(chunk);
        datagrams.push(datagram);
    }

    Ok(datagrams)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_sets() -> ParamSets {
        ParamSets { sps: vec![vec![0x67, 0x42, 0x00, 0x1e]], pps: vec![vec![0x68, 0xce, 0x3c, 0x80]] }
    }

    #[test]
    fn single_datagram_when_small() {
        let data = vec![1, 2, 3, 4, 5];
        let datagrams = fragment_access_unit(7, &data, false, 640, 480, None, 1200).unwrap();
        assert_eq!(datagrams.len(), 1);
        let (h, off) = MediaHeader::parse(&datagrams[0]).unwrap();
        assert_eq!(h.seq, 7);
        assert_eq!(h.part_index, 0);
        assert_eq!(h.part_count, 1);
        assert!(!h.is_keyframe());
        assert_eq!(&datagrams[0][off..], data.as_slice());
    }

    #[test]
    fn five_kilobyte_keyframe_at_1200_mtu_yields_five_parts() {
        let data = vec![0xAAu8; 5000];
        let ps = param_sets();
        let datagrams = fragment_access_unit(1, &data, true, 1920, 1080, Some(&ps), 1200).unwrap();
        assert_eq!(datagrams.len(), 5);

        let (h0, off0) = MediaHeader::parse(&datagrams[0]).unwrap();
        assert!(h0.is_keyframe());
        assert!(h0.has_param_set());
        assert_eq!(h0.config_bytes as usize, ps.encode().unwrap().len());
        assert_eq!(&datagrams[0][off0..off0 + h0.config_bytes as usize], ps.encode().unwrap().as_slice());

        for (i, dg) in datagrams.iter().enumerate() {
            let (h, _) = MediaHeader::parse(dg).unwrap();
            assert_eq!(h.part_index, i as u16);
            assert_eq!(h.part_count, 5);
            assert_eq!(h.width, 1920);
            assert_eq!(h.height, 1080);
            if i != 0 {
                assert_eq!(h.config_bytes, 0);
                assert!(!h.has_param_set());
            }
        }
    }

    #[test]
    fn rejects_mtu_too_small_for_header() {
        assert!(fragment_access_unit(1, &[1, 2, 3], false, 1, 1, None, 10).is_err());
    }

    #[test]
    fn empty_access_unit_yields_one_empty_part() {
        let datagrams = fragment_access_unit(0, &[], true, 1, 1, None, 1200).unwrap();
        assert_eq!(datagrams.len(), 1);
        let (h, off) = MediaHeader::parse(&datagrams[0]).unwrap();
        assert_eq!(h.part_count, 1);
        assert_eq!(datagrams[0].len(), off);
    }
}
