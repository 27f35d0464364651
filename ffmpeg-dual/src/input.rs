use std::path::Path;

use anyhow::Context as _;
use bytes::Bytes;
use ffmpeg_next::Rational;

use crate::annexb::{AnnexBFilter, extradata, needs_annexb_conversion};

/// One compressed video packet read from an input, before it is tagged with
/// a stream id.
#[derive(Debug, Clone)]
pub struct SourceFragment {
    pub data: Bytes,
    pub timestamp_ms: i64,
    pub is_key: bool,
}

/// Reads the best video stream of a file (or anything else FFmpeg can open)
/// as a sequence of compressed fragments.
pub struct FragmentInput {
    inner: ffmpeg_next::format::context::Input,
    stream_index: usize,
    time_base: Rational,
    codec_id: ffmpeg_next::codec::Id,
    filter: Option<AnnexBFilter>,
}

impl FragmentInput {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(Path::new(url))
            .with_context(|| format!("open input {}", url))?;

        let (stream_index, time_base, codec_id, filter) = {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| anyhow::anyhow!("no video stream in {}", url))?;
            let parameters = stream.parameters();
            let codec_id = parameters.id();
            let filter = match extradata(&parameters) {
                Some(data)
                    if codec_id == ffmpeg_next::codec::Id::H264
                        && needs_annexb_conversion(data) =>
                {
                    Some(AnnexBFilter::new(data))
                }
                _ => None,
            };
            (stream.index(), stream.time_base(), codec_id, filter)
        };

        log::info!(
            "input opened: {}, stream index: {}, codec: {:?}, annexb conversion: {}",
            url,
            stream_index,
            codec_id,
            filter.is_some()
        );

        Ok(Self {
            inner: input,
            stream_index,
            time_base,
            codec_id,
            filter,
        })
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.codec_id
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Next fragment of the selected stream, or None at end of input.
    pub fn read_fragment(&mut self) -> Option<SourceFragment> {
        loop {
            let (stream, packet) = self.inner.packets().next()?;
            if stream.index() != self.stream_index {
                continue;
            }
            let Some(data) = packet.data() else {
                continue;
            };

            let is_key = packet.is_key();
            let data = match &self.filter {
                Some(filter) => filter.filter(data, is_key),
                None => Bytes::copy_from_slice(data),
            };
            let timestamp_ms = packet
                .pts()
                .or(packet.dts())
                .map(|ts| to_millis(ts, self.time_base))
                .unwrap_or(0);

            return Some(SourceFragment {
                data,
                timestamp_ms,
                is_key,
            });
        }
    }
}

fn to_millis(ts: i64, time_base: Rational) -> i64 {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator() as i128;
    if den == 0 {
        return ts;
    }
    (ts as i128 * num * 1000 / den) as i64
}
