use std::fmt::{Display, Formatter};

use bytes::{Bytes, BytesMut};

/// Bytes per pixel of the packed BGR24 layout handed to presentation sinks.
pub const BGR24_BYTES_PER_PIXEL: usize = 3;

/// Borrowed view of a decoder unit's frame slot.
///
/// The slot is overwritten by the next decode cycle, so the view is tied to
/// the borrow of the unit that produced it. Anything that must outlive the
/// cycle has to be copied out (see [`crate::scaler::ConversionStage::convert`]).
#[derive(Clone, Copy)]
pub struct DecodedFrame<'a> {
    frame: &'a ffmpeg_next::frame::Video,
}

impl<'a> DecodedFrame<'a> {
    pub fn new(frame: &'a ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    /// Codec-native pixel layout, may differ between streams.
    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn planes(&self) -> usize {
        self.frame.planes()
    }

    pub fn data(&self, plane: usize) -> &'a [u8] {
        self.frame.data(plane)
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.frame.stride(plane)
    }

    pub fn as_video(&self) -> &'a ffmpeg_next::frame::Video {
        self.frame
    }
}

impl Display for DecodedFrame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedFrame width: {}, height: {}, format: {:?}, pts: {:?}",
            self.width(),
            self.height(),
            self.format(),
            self.pts()
        )
    }
}

/// Display-ready image: packed BGR24, rows without padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentableImage {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub pts: Option<i64>,
}

impl PresentableImage {
    /// Copies a BGR24 frame into a tightly packed buffer, dropping the
    /// per-row padding FFmpeg may allocate.
    pub fn from_bgr24(frame: &ffmpeg_next::frame::Video, pts: Option<i64>) -> anyhow::Result<Self> {
        if frame.format() != ffmpeg_next::format::Pixel::BGR24 {
            anyhow::bail!("expected BGR24 frame, got {:?}", frame.format());
        }
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let row = width * BGR24_BYTES_PER_PIXEL;
        let stride = frame.stride(0);
        let src = frame.data(0);
        if stride < row || src.len() < stride * height.saturating_sub(1) + row {
            anyhow::bail!(
                "BGR24 plane too small: stride {}, len {}, {}x{}",
                stride,
                src.len(),
                width,
                height
            );
        }

        let mut out = BytesMut::with_capacity(row * height);
        for y in 0..height {
            let start = y * stride;
            out.extend_from_slice(&src[start..start + row]);
        }

        Ok(Self {
            width: frame.width(),
            height: frame.height(),
            data: out.freeze(),
            pts,
        })
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BGR24_BYTES_PER_PIXEL
    }

    /// Returns the `[b, g, r]` triple at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * BGR24_BYTES_PER_PIXEL;
        self.data
            .get(offset..offset + BGR24_BYTES_PER_PIXEL)
            .map(|p| [p[0], p[1], p[2]])
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(BGR24_BYTES_PER_PIXEL)
    }
}

impl Display for PresentableImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "PresentableImage width: {}, height: {}, data_len: {}, pts: {:?}",
            self.width,
            self.height,
            self.data.len(),
            self.pts
        )
    }
}
