//! Annex-B NAL unit inspection
//!
//! Used to decide the keyframe flag for access units produced by external
//! H.264 / HEVC encoders, and by the relay to sanity-check pushed keyframes.

use crate::codec::CodecKind;

const H264_NAL_IDR: u8 = 5;

const HEVC_NAL_IDR_W_RADL: u8 = 19;
const HEVC_NAL_IDR_N_LP: u8 = 20;
const HEVC_NAL_CRA: u8 = 21;

/// Iterate over NAL unit payloads separated by 3- or 4-byte start codes
pub fn split_annex_b(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => data.len(),
        };
        // A 4-byte start code leaves one trailing zero on the previous unit.
        if starts.get(n + 1).is_some() && end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units.into_iter()
}

/// NAL unit type from its first header byte
pub fn nal_type(codec: CodecKind, unit: &[u8]) -> Option<u8> {
    let first = *unit.first()?;
    match codec {
        CodecKind::H264 => Some(first & 0x1f),
        CodecKind::Hevc => Some((first >> 1) & 0x3f),
        _ => None,
    }
}

/// Whether an access unit contains a random access point
///
/// Codecs without NAL structure report `false`.
pub fn is_keyframe(codec: CodecKind, access_unit: &[u8]) -> bool {
    split_annex_b(access_unit).any(|unit| match (codec, nal_type(codec, unit)) {
        (CodecKind::H264, Some(t)) => t == H264_NAL_IDR,
        (CodecKind::Hevc, Some(t)) => {
            t == HEVC_NAL_IDR_W_RADL || t == HEVC_NAL_IDR_N_LP || t == HEVC_NAL_CRA
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_mixed_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0, 0, 0, 1, 0x65, 0xCC];
        let units: Vec<&[u8]> = split_annex_b(&data).collect();

        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x67, 0xAA]);
        assert_eq!(units[1], &[0x68, 0xBB]);
        assert_eq!(units[2], &[0x65, 0xCC]);
    }

    #[test]
    fn test_h264_idr_detection() {
        let idr = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x65, 0x88];
        let p_slice = [0, 0, 0, 1, 0x41, 0x9a];

        assert!(is_keyframe(CodecKind::H264, &idr));
        assert!(!is_keyframe(CodecKind::H264, &p_slice));
    }

    #[test]
    fn test_hevc_irap_detection() {
        // type 19 (IDR_W_RADL) => header byte 19 << 1
        let idr = [0, 0, 1, 19 << 1, 0x01, 0xAF];
        let cra = [0, 0, 1, 21 << 1, 0x01];
        let trail = [0, 0, 1, 1 << 1, 0x01];

        assert!(is_keyframe(CodecKind::Hevc, &idr));
        assert!(is_keyframe(CodecKind::Hevc, &cra));
        assert!(!is_keyframe(CodecKind::Hevc, &trail));
    }

    #[test]
    fn test_non_nal_codecs() {
        assert!(!is_keyframe(CodecKind::RawVideo, &[0, 0, 1, 0x65]));
        assert!(!is_keyframe(CodecKind::H264, &[]));
    }
}
