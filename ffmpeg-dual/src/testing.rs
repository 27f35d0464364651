//! Test fixtures: synthetic frames and compressed fragments produced with
//! FFmpeg's built-in MPEG-4 Part 2 encoder.

use ffmpeg_next::{Rational, format::Pixel};

use crate::packet::CompressedFragment;

/// Decoder name matching the fragments from [`encode_clip`].
pub(crate) const TEST_CODEC: &str = "mpeg4";

/// Luma values outside the video range so decoded output clips to exact
/// black/white even after lossy compression.
pub(crate) const LUMA_WHITE: u8 = 255;
pub(crate) const LUMA_BLACK: u8 = 0;

pub(crate) fn yuv_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> ffmpeg_next::frame::Video {
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, width, height);
    frame.data_mut(0).fill(y);
    frame.data_mut(1).fill(u);
    frame.data_mut(2).fill(v);
    frame
}

/// Encodes `count` flat frames whose luma is `luma(i)` into fragments tagged
/// with `stream_id`. `gop == 1` yields intra-only fragments.
///
/// Returns `None` when this FFmpeg build has no MPEG-4 encoder.
pub(crate) fn encode_clip(
    stream_id: u32,
    width: u32,
    height: u32,
    count: usize,
    gop: u32,
    luma: impl Fn(usize) -> u8,
) -> anyhow::Result<Option<Vec<CompressedFragment>>> {
    crate::init()?;
    let Some(codec) = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4) else {
        eprintln!("skip: mpeg4 encoder not available");
        return Ok(None);
    };

    let context = ffmpeg_next::codec::Context::new_with_codec(codec);
    let mut encoder = context.encoder().video()?;
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(Rational::new(1, 25));
    encoder.set_gop(gop);
    encoder.set_max_b_frames(0);
    encoder.set_bit_rate(400_000);
    let mut encoder = encoder.open_as(codec)?;

    let mut fragments = Vec::with_capacity(count);
    for i in 0..count {
        let mut frame = yuv_frame(width, height, luma(i), 128, 128);
        frame.set_pts(Some(i as i64));
        encoder.send_frame(&frame)?;
        receive_packets(&mut encoder, stream_id, &mut fragments)?;
    }
    encoder.send_eof()?;
    receive_packets(&mut encoder, stream_id, &mut fragments)?;

    Ok(Some(fragments))
}

/// Same luma for every frame.
pub(crate) fn encode_solid(
    stream_id: u32,
    width: u32,
    height: u32,
    count: usize,
    gop: u32,
    luma: u8,
) -> anyhow::Result<Option<Vec<CompressedFragment>>> {
    encode_clip(stream_id, width, height, count, gop, |_| luma)
}

fn receive_packets(
    encoder: &mut ffmpeg_next::codec::encoder::Video,
    stream_id: u32,
    out: &mut Vec<CompressedFragment>,
) -> anyhow::Result<()> {
    let mut packet = ffmpeg_next::Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                if let Some(data) = packet.data() {
                    out.push(CompressedFragment::from_slice(
                        data,
                        packet.pts().unwrap_or(0),
                        stream_id,
                        0,
                    ));
                }
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Ok(());
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

/// Payload without any MPEG start code.
pub(crate) fn garbage_fragment(stream_id: u32, timestamp: i64) -> CompressedFragment {
    CompressedFragment::from_slice(&[0xAB; 64], timestamp, stream_id, 0)
}
