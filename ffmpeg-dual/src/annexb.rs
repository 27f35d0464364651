use bytes::{Bytes, BytesMut};
use ffmpeg_next::codec::Parameters;

/// Annex B start code (4-byte)
const START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

/// Reads extradata from codec parameters via the raw AVCodecParameters pointer.
/// Returns None if extradata is null or empty.
pub fn extradata(codec_params: &Parameters) -> Option<&[u8]> {
    unsafe {
        let p = codec_params.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
        let extradata_ptr = (*p).extradata;
        if extradata_ptr.is_null() {
            return None;
        }
        let size = (*p).extradata_size;
        if size <= 0 {
            return None;
        }
        Some(std::slice::from_raw_parts(extradata_ptr, size as usize))
    }
}

/// True when `extradata` is an avcC record, i.e. the stream carries
/// length-prefixed NAL units that decoders fed raw fragments cannot parse.
pub fn needs_annexb_conversion(extradata: &[u8]) -> bool {
    if extradata.len() < 7 || is_annexb_packet(extradata) {
        return false;
    }
    // configurationVersion = 1
    extradata[0] == 0x01
}

/// Check if packet data is in Annex B format by looking at the start codes.
pub fn is_annexb_packet(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    data.starts_with(START_CODE) || data.starts_with(&START_CODE[1..])
}

/// Converts H.264 from AVCC (4-byte length + NAL) to Annex B (start code + NAL).
/// Stops at the first truncated or zero-length unit.
pub fn convert_avcc_to_annexb(avcc: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(avcc.len() + 16);
    let mut i = 0;
    while i + 4 <= avcc.len() {
        let len = u32::from_be_bytes([avcc[i], avcc[i + 1], avcc[i + 2], avcc[i + 3]]) as usize;
        i += 4;
        if len == 0 || i + len > avcc.len() {
            break;
        }
        out.extend_from_slice(START_CODE);
        out.extend_from_slice(&avcc[i..i + len]);
        i += len;
    }
    out.freeze()
}

/// Extracts the SPS and PPS units of an avcC record as Annex B.
pub fn avcc_parameter_sets(extradata: &[u8]) -> Option<Bytes> {
    if !needs_annexb_conversion(extradata) {
        return None;
    }

    let mut out = BytesMut::new();
    let mut i = 5;
    let sps_count = (extradata[i] & 0x1f) as usize;
    i += 1;
    i = copy_parameter_sets(extradata, i, sps_count, &mut out)?;

    let pps_count = *extradata.get(i)? as usize;
    i += 1;
    copy_parameter_sets(extradata, i, pps_count, &mut out)?;

    if out.is_empty() { None } else { Some(out.freeze()) }
}

fn copy_parameter_sets(data: &[u8], mut i: usize, count: usize, out: &mut BytesMut) -> Option<usize> {
    for _ in 0..count {
        let len = u16::from_be_bytes([*data.get(i)?, *data.get(i + 1)?]) as usize;
        i += 2;
        let unit = data.get(i..i + len)?;
        out.extend_from_slice(START_CODE);
        out.extend_from_slice(unit);
        i += len;
    }
    Some(i)
}

/// Normalizes demuxed H.264 packets to the Annex B fragments a live source
/// would deliver: start codes instead of length prefixes, parameter sets in
/// front of every key frame.
pub struct AnnexBFilter {
    parameter_sets: Option<Bytes>,
}

impl AnnexBFilter {
    pub fn new(extradata: &[u8]) -> Self {
        Self {
            parameter_sets: avcc_parameter_sets(extradata),
        }
    }

    pub fn filter(&self, data: &[u8], is_key: bool) -> Bytes {
        let body = if is_annexb_packet(data) {
            Bytes::copy_from_slice(data)
        } else {
            convert_avcc_to_annexb(data)
        };

        match (&self.parameter_sets, is_key) {
            (Some(parameter_sets), true) => {
                let mut out = BytesMut::with_capacity(parameter_sets.len() + body.len());
                out.extend_from_slice(parameter_sets);
                out.extend_from_slice(&body);
                out.freeze()
            }
            _ => body,
        }
    }
}
