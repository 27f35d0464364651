//! Routes compressed fragments to per-stream decoder units.
//!
//! ```text
//! Fragment source ─► StreamRouter ─┬─► DecoderUnit (stream 0) ─► ConversionStage ─┐
//!                                  │                                              ├─► PresentationSink
//!                                  └─► DecoderUnit (stream 1) ─► ConversionStage ─┘
//! ```
//!
//! Each unit sits behind its own mutex: fragments of one stream are decoded
//! one at a time, fragments of different streams can be decoded in parallel.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Context as _;

use crate::{
    decoder::{DecoderSettings, DecoderUnit, UnitStats},
    frame::DecodedFrame,
    packet::CompressedFragment,
    scaler::{ConversionSettings, ConversionStage},
    sink::PresentationSink,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub stream_id: u32,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub channels: Vec<ChannelConfig>,
    pub decoder: DecoderSettings,
    pub conversion: ConversionSettings,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig {
                    stream_id: 0,
                    label: "Video0".to_string(),
                },
                ChannelConfig {
                    stream_id: 1,
                    label: "Video1".to_string(),
                },
            ],
            decoder: DecoderSettings::default(),
            conversion: ConversionSettings::default(),
        }
    }
}

impl RouterConfig {
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct RouterConfigBuilder {
    channels: Vec<ChannelConfig>,
    decoder: DecoderSettings,
    conversion: ConversionSettings,
}

impl RouterConfigBuilder {
    /// Register a stream id and the label its images are presented under
    pub fn add_channel(mut self, stream_id: u32, label: impl Into<String>) -> Self {
        self.channels.push(ChannelConfig {
            stream_id,
            label: label.into(),
        });
        self
    }

    /// FFmpeg decoder name used by every channel
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.decoder.codec = codec.into();
        self
    }

    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.decoder.prefer_hardware = prefer;
        self
    }

    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.conversion = ConversionSettings {
            display_width: width,
            display_height: height,
        };
        self
    }

    pub fn build(self) -> RouterConfig {
        RouterConfig {
            channels: self.channels,
            decoder: self.decoder,
            conversion: self.conversion,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub stream_id: u32,
    pub label: String,
    pub unit: UnitStats,
    /// Images accepted by the sink.
    pub presented: u64,
}

struct Channel {
    label: String,
    unit: Mutex<DecoderUnit>,
    presented: AtomicU64,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, DecoderUnit> {
        self.unit.lock().unwrap_or_else(|poisoned| {
            log::warn!("{}: decoder unit lock poisoned, recovering", self.label);
            poisoned.into_inner()
        })
    }
}

pub struct StreamRouter {
    channels: BTreeMap<u32, Channel>,
    sink: Arc<dyn PresentationSink>,
    dropped_unknown: AtomicU64,
}

impl StreamRouter {
    /// Opens one decoder unit per configured channel. Fails if any unit
    /// cannot be created; nothing is routed until every unit is ready.
    pub fn new(config: RouterConfig, sink: Arc<dyn PresentationSink>) -> anyhow::Result<Self> {
        if config.channels.is_empty() {
            anyhow::bail!("router needs at least one channel");
        }

        let mut channels = BTreeMap::new();
        for channel in config.channels {
            if channels.contains_key(&channel.stream_id) {
                anyhow::bail!("duplicate stream id {}", channel.stream_id);
            }
            let unit = DecoderUnit::open(channel.stream_id, &config.decoder, config.conversion)
                .with_context(|| {
                    format!(
                        "open decoder for stream {} ({})",
                        channel.stream_id, channel.label
                    )
                })?;
            channels.insert(
                channel.stream_id,
                Channel {
                    label: channel.label,
                    unit: Mutex::new(unit),
                    presented: AtomicU64::new(0),
                },
            );
        }

        log::info!(
            "router ready, codec: {}, display: {}x{}, channels: {:?}",
            config.decoder.codec,
            config.conversion.display_width,
            config.conversion.display_height,
            channels
                .iter()
                .map(|(id, c)| format!("{}={}", id, c.label))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            channels,
            sink,
            dropped_unknown: AtomicU64::new(0),
        })
    }

    /// Push interface for fragment sources. `size` is clamped to the payload.
    pub fn deliver(
        &self,
        payload: &[u8],
        size: usize,
        timestamp: i64,
        stream_id: u32,
        type_tag: u8,
    ) -> usize {
        let size = size.min(payload.len());
        let fragment = CompressedFragment::from_slice(&payload[..size], timestamp, stream_id, type_tag);
        self.on_fragment(&fragment)
    }

    /// Decodes `fragment` on its stream's unit and presents every resulting
    /// frame. Returns the number of images the sink accepted. Failures are
    /// logged and contained; fragments of unregistered streams are ignored.
    pub fn on_fragment(&self, fragment: &CompressedFragment) -> usize {
        let Some(channel) = self.channels.get(&fragment.stream_id()) else {
            self.dropped_unknown.fetch_add(1, Ordering::Relaxed);
            log::trace!("ignoring fragment for unknown stream {}", fragment.stream_id());
            return 0;
        };

        let sink = self.sink.as_ref();
        let label = channel.label.as_str();
        let mut presented = 0;
        let result = channel.lock().decode(fragment, |frame, stage| {
            if present_frame(sink, label, frame, stage) {
                presented += 1;
            }
        });
        if let Err(e) = result {
            log::warn!("{}: fragment dropped: {:#}", label, e);
        }

        channel.presented.fetch_add(presented as u64, Ordering::Relaxed);
        presented
    }

    /// Drains frames still buffered in every unit (end of input).
    pub fn flush(&self) -> usize {
        let sink = self.sink.as_ref();
        let mut total = 0;
        for channel in self.channels.values() {
            let label = channel.label.as_str();
            let mut presented = 0;
            if let Err(e) = channel.lock().flush(|frame, stage| {
                if present_frame(sink, label, frame, stage) {
                    presented += 1;
                }
            }) {
                log::warn!("{}: flush failed: {:#}", label, e);
            }
            channel.presented.fetch_add(presented as u64, Ordering::Relaxed);
            total += presented;
        }
        total
    }

    /// Tears down every unit. Units that were already torn down are reported
    /// in the returned error; the others are still released.
    pub fn teardown(&self) -> anyhow::Result<()> {
        let mut failed = Vec::new();
        for channel in self.channels.values() {
            if let Err(e) = channel.lock().teardown() {
                failed.push(format!("{}: {:#}", channel.label, e));
            }
        }

        if failed.is_empty() {
            log::info!("router torn down");
            Ok(())
        } else {
            Err(anyhow::anyhow!("teardown failed: {}", failed.join("; ")))
        }
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.channels.keys().copied().collect()
    }

    pub fn label(&self, stream_id: u32) -> Option<&str> {
        self.channels.get(&stream_id).map(|c| c.label.as_str())
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels
            .iter()
            .map(|(stream_id, channel)| ChannelStats {
                stream_id: *stream_id,
                label: channel.label.clone(),
                unit: channel.lock().stats(),
                presented: channel.presented.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn dropped_unknown(&self) -> u64 {
        self.dropped_unknown.load(Ordering::Relaxed)
    }
}

fn present_frame(
    sink: &dyn PresentationSink,
    label: &str,
    frame: DecodedFrame<'_>,
    stage: &mut ConversionStage,
) -> bool {
    let image = match stage
        .ensure_context(&frame)
        .and_then(|_| stage.convert(&frame))
    {
        Ok(image) => image,
        Err(e) => {
            log::warn!("{}: conversion failed for {}: {:#}", label, frame, e);
            return false;
        }
    };

    match sink.present(image, label) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("{}: {:#}", label, e);
            false
        }
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;
