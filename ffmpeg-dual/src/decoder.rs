use anyhow::Context as _;

use crate::{
    frame::DecodedFrame,
    hw::find_hw_decoder,
    packet::CompressedFragment,
    scaler::{ConversionSettings, ConversionStage},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSettings {
    // FFmpeg decoder name, e.g. "h264"
    pub codec: String,
    pub prefer_hardware: bool,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            prefer_hardware: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Ready,
    TornDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Fragments handed to the decoder.
    pub fragments: u64,
    pub frames: u64,
    pub feed_errors: u64,
}

struct UnitResources {
    decoder: ffmpeg_next::codec::decoder::Video,
    frame: ffmpeg_next::frame::Video,
    packet: ffmpeg_next::Packet,
    conversion: ConversionStage,
}

/// Result of one drain pass over the decoder output.
struct Drained {
    frames: usize,
    error: Option<ffmpeg_next::Error>,
}

/// Decode pipeline for exactly one stream.
///
/// Owns the decoder context (and with it the reference-frame state carried
/// across fragments), a frame slot that every decode cycle overwrites, the
/// packet handle the payload is copied into and the conversion stage bound
/// to this stream. None of it is shared; callers serialize access.
pub struct DecoderUnit {
    stream_id: u32,
    codec_name: String,
    resources: Option<UnitResources>,
    stats: UnitStats,
}

impl DecoderUnit {
    /// Resolves the codec and allocates the decoder, frame slot and packet
    /// handle. The conversion context stays absent until the first frame.
    pub fn open(
        stream_id: u32,
        settings: &DecoderSettings,
        conversion: ConversionSettings,
    ) -> anyhow::Result<Self> {
        let (decoder, codec_name) = open_decoder(settings)?;
        log::info!(
            "decoder unit ready, stream id: {}, codec: {}",
            stream_id,
            codec_name
        );

        Ok(Self {
            stream_id,
            codec_name,
            resources: Some(UnitResources {
                decoder,
                frame: ffmpeg_next::frame::Video::empty(),
                packet: ffmpeg_next::Packet::empty(),
                conversion: ConversionStage::new(conversion),
            }),
            stats: UnitStats::default(),
        })
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn state(&self) -> UnitState {
        if self.resources.is_some() {
            UnitState::Ready
        } else {
            UnitState::TornDown
        }
    }

    pub fn stats(&self) -> UnitStats {
        self.stats
    }

    pub fn conversion(&self) -> Option<&ConversionStage> {
        self.resources.as_ref().map(|r| &r.conversion)
    }

    /// Feeds one fragment and hands every frame the decoder can produce right
    /// now to `on_frame`, in decode order. Returns the number of frames.
    ///
    /// A rejected payload is reported as an error after any output the
    /// decoder had already buffered has been drained. The decoder stays
    /// usable for the next fragment either way.
    pub fn decode<F>(&mut self, fragment: &CompressedFragment, mut on_frame: F) -> anyhow::Result<usize>
    where
        F: FnMut(DecodedFrame<'_>, &mut ConversionStage),
    {
        let stream_id = self.stream_id;
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder unit {} is torn down", stream_id))?;

        // An empty packet is an end-of-stream signal to the decoder.
        if fragment.is_empty() {
            self.stats.feed_errors += 1;
            anyhow::bail!("stream {}: empty fragment at {}", stream_id, fragment.timestamp());
        }

        self.stats.fragments += 1;
        resources.packet = ffmpeg_next::Packet::copy(fragment.payload());
        resources.packet.set_pts(Some(fragment.timestamp()));

        let fed = resources.decoder.send_packet(&resources.packet);
        if fed.is_err() {
            self.stats.feed_errors += 1;
        }

        let drained = drain(resources, &mut on_frame);
        self.stats.frames += drained.frames as u64;

        if let Err(e) = fed {
            return Err(anyhow::anyhow!(
                "stream {}: send packet ({} bytes at {}): {}",
                stream_id,
                fragment.size(),
                fragment.timestamp(),
                e
            ));
        }
        if let Some(e) = drained.error {
            return Err(anyhow::anyhow!("stream {}: receive frame: {}", stream_id, e));
        }
        Ok(drained.frames)
    }

    /// Signals end of stream and drains every frame still held in the
    /// decoder's reorder buffer, then resets the decoder so it accepts new
    /// fragments again.
    pub fn flush<F>(&mut self, mut on_frame: F) -> anyhow::Result<usize>
    where
        F: FnMut(DecodedFrame<'_>, &mut ConversionStage),
    {
        let stream_id = self.stream_id;
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder unit {} is torn down", stream_id))?;

        resources
            .decoder
            .send_eof()
            .with_context(|| format!("stream {}: send eof", stream_id))?;
        let drained = drain(resources, &mut on_frame);
        self.stats.frames += drained.frames as u64;
        resources.decoder.flush();

        match drained.error {
            Some(e) => Err(anyhow::anyhow!("stream {}: drain on eof: {}", stream_id, e)),
            None => Ok(drained.frames),
        }
    }

    /// Releases the decoder, frame slot, packet handle and conversion context,
    /// in that order. Only the first call succeeds.
    pub fn teardown(&mut self) -> anyhow::Result<()> {
        let resources = self
            .resources
            .take()
            .ok_or_else(|| anyhow::anyhow!("decoder unit {} already torn down", self.stream_id))?;

        let UnitResources {
            decoder,
            frame,
            packet,
            mut conversion,
        } = resources;
        drop(decoder);
        drop(frame);
        drop(packet);
        conversion.release();

        log::info!(
            "decoder unit torn down, stream id: {}, fragments: {}, frames: {}, feed errors: {}",
            self.stream_id,
            self.stats.fragments,
            self.stats.frames,
            self.stats.feed_errors
        );
        Ok(())
    }
}

fn drain<F>(resources: &mut UnitResources, on_frame: &mut F) -> Drained
where
    F: FnMut(DecodedFrame<'_>, &mut ConversionStage),
{
    let mut frames = 0;
    loop {
        match resources.decoder.receive_frame(&mut resources.frame) {
            Ok(()) => {
                frames += 1;
                on_frame(DecodedFrame::new(&resources.frame), &mut resources.conversion);
            }
            Err(ffmpeg_next::Error::Eof) => return Drained { frames, error: None },
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Drained { frames, error: None };
            }
            Err(err) => {
                return Drained {
                    frames,
                    error: Some(err),
                };
            }
        }
    }
}

fn open_decoder(
    settings: &DecoderSettings,
) -> anyhow::Result<(ffmpeg_next::codec::decoder::Video, String)> {
    let codec = ffmpeg_next::decoder::find_by_name(&settings.codec)
        .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;

    if settings.prefer_hardware {
        if let Some(hw_codec) = find_hw_decoder(codec.id()) {
            let hw_name = hw_codec.name().to_string();
            log::info!("attempting hardware decoder: {}", hw_name);
            match open_with_codec(hw_codec) {
                Ok(decoder) => return Ok((decoder, hw_name)),
                Err(e) => {
                    log::warn!(
                        "hardware decoder {} failed: {:#}, falling back to {}",
                        hw_name,
                        e,
                        settings.codec
                    );
                }
            }
        } else {
            log::info!(
                "no hardware decoder found, using software decoder: {}",
                settings.codec
            );
        }
    }

    let decoder = open_with_codec(codec)
        .with_context(|| format!("could not open decoder {}", settings.codec))?;
    Ok((decoder, codec.name().to_string()))
}

fn open_with_codec(
    codec: ffmpeg_next::Codec,
) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
    let context = ffmpeg_next::codec::Context::new_with_codec(codec);
    let decoder = context.decoder().open_as(codec)?.video()?;
    Ok(decoder)
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
