/// Registers FFmpeg components. Call once at startup before opening
/// decoders or inputs.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod annexb;
pub mod decoder;
pub mod frame;
pub mod hw;
pub mod input;
pub mod packet;
pub mod router;
pub mod scaler;
pub mod sink;

#[cfg(test)]
mod testing;
