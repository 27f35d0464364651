use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

use crate::frame::PresentableImage;

/// Receives display-ready images. Called on the decoding thread, so
/// implementations must return quickly; a slow sink stalls its stream.
pub trait PresentationSink: Send + Sync {
    fn present(&self, image: PresentableImage, label: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct PresentedImage {
    pub label: String,
    pub image: PresentableImage,
}

/// Sink backed by a bounded channel. Never blocks: when the consumer lags
/// behind, the image is dropped and `present` reports it.
pub struct ChannelSink {
    writer: tokio::sync::mpsc::Sender<PresentedImage>,
}

impl ChannelSink {
    pub fn new() -> (Self, PresentedStream) {
        Self::with_capacity(8)
    }

    pub fn with_capacity(buffer_size: usize) -> (Self, PresentedStream) {
        let (writer, receiver) = tokio::sync::mpsc::channel(buffer_size.max(1));
        (
            Self { writer },
            PresentedStream {
                inner: ReceiverStream::new(receiver),
            },
        )
    }
}

impl PresentationSink for ChannelSink {
    fn present(&self, image: PresentableImage, label: &str) -> anyhow::Result<()> {
        let item = PresentedImage {
            label: label.to_string(),
            image,
        };
        self.writer.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => {
                anyhow::anyhow!("presentation queue full, dropped {} image", item.label)
            }
            TrySendError::Closed(_) => anyhow::anyhow!("presentation stream closed"),
        })
    }
}

/// Consumer side of a [`ChannelSink`]. Ends once every sink handle is dropped.
pub struct PresentedStream {
    inner: ReceiverStream<PresentedImage>,
}

impl Stream for PresentedStream {
    type Item = PresentedImage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    fn image(value: u8) -> PresentableImage {
        PresentableImage {
            width: 2,
            height: 1,
            data: Bytes::from(vec![value; 6]),
            pts: Some(value as i64),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() -> anyhow::Result<()> {
        let (sink, mut stream) = ChannelSink::with_capacity(4);
        sink.present(image(1), "Video0")?;
        sink.present(image(2), "Video1")?;
        drop(sink);

        let first = stream.next().await.unwrap();
        assert_eq!(first.label, "Video0");
        assert_eq!(first.image.pts, Some(1));
        let second = stream.next().await.unwrap();
        assert_eq!(second.label, "Video1");
        assert!(stream.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut stream) = ChannelSink::with_capacity(1);
        assert!(sink.present(image(1), "Video0").is_ok());
        let err = sink.present(image(2), "Video0").unwrap_err();
        assert!(err.to_string().contains("queue full"));

        let received = stream.next().await.unwrap();
        assert_eq!(received.image.pts, Some(1));
        assert!(sink.present(image(3), "Video0").is_ok());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_stream() {
        let (sink, stream) = ChannelSink::new();
        drop(stream);
        let err = sink.present(image(1), "Video0").unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
