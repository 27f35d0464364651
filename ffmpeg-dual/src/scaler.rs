use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, flag::Flags};

use crate::frame::{DecodedFrame, PresentableImage};

/// Output layout every conversion produces.
pub const OUTPUT_FORMAT: Pixel = Pixel::BGR24;

pub struct Scaler {
    context: scaling::Context,
}

impl Scaler {
    pub fn new(context: scaling::Context) -> Self {
        Self { context }
    }

    /// Bilinear scaler from `src` to `dst`.
    pub fn bilinear(
        src_format: Pixel,
        src_width: u32,
        src_height: u32,
        dst_format: Pixel,
        dst_width: u32,
        dst_height: u32,
    ) -> anyhow::Result<Self> {
        let context = scaling::Context::get(
            src_format,
            src_width,
            src_height,
            dst_format,
            dst_width,
            dst_height,
            Flags::BILINEAR,
        )
        .map_err(|e| {
            anyhow::anyhow!(
                "scaling context {:?} {}x{} -> {:?} {}x{}: {}",
                src_format,
                src_width,
                src_height,
                dst_format,
                dst_width,
                dst_height,
                e
            )
        })?;
        Ok(Self::new(context))
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSettings {
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            display_width: 640,
            display_height: 360,
        }
    }
}

/// Source geometry a conversion context was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceKey {
    pub width: u32,
    pub height: u32,
    pub format: Pixel,
}

impl SourceKey {
    fn of(frame: &DecodedFrame<'_>) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
        }
    }
}

/// Native -> BGR24 at source size, plus the display resize when the display
/// size differs from the source.
pub struct ConversionContext {
    key: SourceKey,
    color: Scaler,
    resize: Option<Scaler>,
}

impl ConversionContext {
    fn new(key: SourceKey, settings: ConversionSettings) -> anyhow::Result<Self> {
        if key.width == 0 || key.height == 0 {
            anyhow::bail!("invalid frame size {}x{}", key.width, key.height);
        }
        if key.format == Pixel::None {
            anyhow::bail!("frame has no pixel format");
        }
        if settings.display_width == 0 || settings.display_height == 0 {
            anyhow::bail!(
                "invalid display size {}x{}",
                settings.display_width,
                settings.display_height
            );
        }

        let color = Scaler::bilinear(
            key.format,
            key.width,
            key.height,
            OUTPUT_FORMAT,
            key.width,
            key.height,
        )?;
        let resize = if (settings.display_width, settings.display_height) != (key.width, key.height)
        {
            Some(Scaler::bilinear(
                OUTPUT_FORMAT,
                key.width,
                key.height,
                OUTPUT_FORMAT,
                settings.display_width,
                settings.display_height,
            )?)
        } else {
            None
        };

        Ok(Self { key, color, resize })
    }

    pub fn key(&self) -> SourceKey {
        self.key
    }
}

/// Pixel conversion bound to one decoder unit. The context is created lazily
/// from the first frame and reused while the source geometry stays the same.
pub struct ConversionStage {
    settings: ConversionSettings,
    context: Option<ConversionContext>,
    contexts_created: u64,
}

impl ConversionStage {
    pub fn new(settings: ConversionSettings) -> Self {
        Self {
            settings,
            context: None,
            contexts_created: 0,
        }
    }

    pub fn settings(&self) -> ConversionSettings {
        self.settings
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn context_key(&self) -> Option<SourceKey> {
        self.context.as_ref().map(ConversionContext::key)
    }

    pub fn contexts_created(&self) -> u64 {
        self.contexts_created
    }

    /// Makes sure a context matching `frame` exists. Returns `true` when one
    /// was built by this call.
    ///
    /// A context built for different dimensions or pixel format is replaced
    /// rather than reused; swscale would reject the frame otherwise.
    pub fn ensure_context(&mut self, frame: &DecodedFrame<'_>) -> anyhow::Result<bool> {
        let key = SourceKey::of(frame);
        match &self.context {
            Some(context) if context.key == key => return Ok(false),
            Some(context) => {
                log::warn!(
                    "source changed from {}x{} {:?} to {}x{} {:?}, rebuilding conversion context",
                    context.key.width,
                    context.key.height,
                    context.key.format,
                    key.width,
                    key.height,
                    key.format
                );
                self.context = None;
            }
            None => {}
        }

        self.context = Some(ConversionContext::new(key, self.settings)?);
        self.contexts_created += 1;
        log::debug!(
            "conversion context created: {}x{} {:?} -> {}x{} {:?}",
            key.width,
            key.height,
            key.format,
            self.settings.display_width,
            self.settings.display_height,
            OUTPUT_FORMAT
        );
        Ok(true)
    }

    /// Converts `frame` to a display-sized BGR24 image owned by the caller.
    /// Requires a prior successful [`Self::ensure_context`] for this frame.
    pub fn convert(&mut self, frame: &DecodedFrame<'_>) -> anyhow::Result<PresentableImage> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("convert called without a conversion context"))?;
        if context.key != SourceKey::of(frame) {
            anyhow::bail!(
                "frame {}x{} {:?} does not match conversion context {}x{} {:?}",
                frame.width(),
                frame.height(),
                frame.format(),
                context.key.width,
                context.key.height,
                context.key.format
            );
        }

        // width * height * 3 at source resolution
        let mut bgr = ffmpeg_next::frame::Video::new(OUTPUT_FORMAT, frame.width(), frame.height());
        context.color.run(frame.as_video(), &mut bgr)?;

        match context.resize.as_mut() {
            Some(resize) => {
                let mut display = ffmpeg_next::frame::Video::new(
                    OUTPUT_FORMAT,
                    self.settings.display_width,
                    self.settings.display_height,
                );
                resize.run(&bgr, &mut display)?;
                PresentableImage::from_bgr24(&display, frame.pts())
            }
            None => PresentableImage::from_bgr24(&bgr, frame.pts()),
        }
    }

    /// Drops the conversion context, if any.
    pub fn release(&mut self) {
        self.context = None;
    }
}

#[cfg(test)]
#[path = "scaler_test.rs"]
mod scaler_test;
