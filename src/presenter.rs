use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context as _;
use ffmpeg_dual::sink::{PresentedImage, PresentedStream};
use futures::StreamExt;
use jpeg_encoder::{ColorType, Encoder};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
const SNAPSHOT_QUALITY: u8 = 85;

#[derive(Debug, Clone)]
pub struct PresenterSettings {
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

#[derive(Debug)]
struct LabelState {
    total: u64,
    window_frames: u64,
    window_start: Instant,
    last_snapshot: Option<Instant>,
}

impl LabelState {
    fn new(now: Instant) -> Self {
        Self {
            total: 0,
            window_frames: 0,
            window_start: now,
            last_snapshot: None,
        }
    }
}

/// Stand-in for a display: tracks per-label frame rates and keeps the latest
/// image of each label as a JPEG file.
pub struct Presenter {
    settings: PresenterSettings,
    labels: HashMap<String, LabelState>,
}

impl Presenter {
    pub fn new(settings: PresenterSettings) -> anyhow::Result<Self> {
        if let Some(dir) = &settings.snapshot_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create snapshot dir {}", dir.display()))?;
        }
        Ok(Self {
            settings,
            labels: HashMap::new(),
        })
    }

    /// Accounts for one image and writes a snapshot when one is due.
    /// Returns the snapshot path if one was written.
    pub fn handle(&mut self, item: &PresentedImage, now: Instant) -> Option<PathBuf> {
        let state = self
            .labels
            .entry(item.label.clone())
            .or_insert_with(|| LabelState::new(now));
        state.total += 1;
        state.window_frames += 1;

        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= REPORT_INTERVAL {
            log::info!(
                "{}: {:.1} fps, {}x{}, {} images",
                item.label,
                state.window_frames as f64 / elapsed.as_secs_f64(),
                item.image.width,
                item.image.height,
                state.total
            );
            state.window_frames = 0;
            state.window_start = now;
        }

        let dir = self.settings.snapshot_dir.as_deref()?;
        let due = state
            .last_snapshot
            .is_none_or(|last| now.saturating_duration_since(last) >= self.settings.snapshot_interval);
        if !due {
            return None;
        }
        state.last_snapshot = Some(now);

        match write_snapshot(dir, item) {
            Ok(path) => {
                log::debug!("{}: snapshot written to {}", item.label, path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("{}: snapshot failed: {:#}", item.label, e);
                None
            }
        }
    }

    pub fn total(&self, label: &str) -> u64 {
        self.labels.get(label).map(|s| s.total).unwrap_or(0)
    }

    /// Consumes `stream` until every sink handle is gone.
    pub async fn run(mut self, mut stream: PresentedStream) -> HashMap<String, u64> {
        while let Some(item) = stream.next().await {
            self.handle(&item, Instant::now());
        }

        let totals: HashMap<String, u64> = self
            .labels
            .iter()
            .map(|(label, state)| (label.clone(), state.total))
            .collect();
        log::info!("presentation stream ended, images per label: {:?}", totals);
        totals
    }
}

/// Writes `item` as `<dir>/<label>.jpg`, replacing the previous snapshot.
pub fn write_snapshot(dir: &Path, item: &PresentedImage) -> anyhow::Result<PathBuf> {
    let image = &item.image;
    let width = u16::try_from(image.width)
        .map_err(|_| anyhow::anyhow!("image too wide for jpeg: {}", image.width))?;
    let height = u16::try_from(image.height)
        .map_err(|_| anyhow::anyhow!("image too tall for jpeg: {}", image.height))?;

    let path = dir.join(format!("{}.jpg", item.label));
    let encoder = Encoder::new_file(&path, SNAPSHOT_QUALITY)
        .with_context(|| format!("create {}", path.display()))?;
    encoder
        .encode(&image.data, width, height, ColorType::Bgr)
        .with_context(|| format!("encode {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ffmpeg_dual::frame::PresentableImage;

    fn item(label: &str, value: u8) -> PresentedImage {
        PresentedImage {
            label: label.to_string(),
            image: PresentableImage {
                width: 16,
                height: 8,
                data: Bytes::from(vec![value; 16 * 8 * 3]),
                pts: Some(value as i64),
            },
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dualview-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_write_snapshot() -> anyhow::Result<()> {
        let dir = temp_dir("write");
        std::fs::create_dir_all(&dir)?;

        let path = write_snapshot(&dir, &item("Video0", 200))?;
        assert_eq!(path, dir.join("Video0.jpg"));
        let bytes = std::fs::read(&path)?;
        assert!(bytes.starts_with(&[0xff, 0xd8]));
        assert!(bytes.ends_with(&[0xff, 0xd9]));

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_write_snapshot_rejects_oversized_image() {
        let mut oversized = item("Video0", 1);
        oversized.image.width = 70_000;
        assert!(write_snapshot(&std::env::temp_dir(), &oversized).is_err());
    }

    #[test]
    fn test_handle_counts_per_label() -> anyhow::Result<()> {
        let mut presenter = Presenter::new(PresenterSettings {
            snapshot_dir: None,
            snapshot_interval: Duration::from_secs(5),
        })?;
        let now = Instant::now();
        for _ in 0..3 {
            assert!(presenter.handle(&item("Video0", 1), now).is_none());
        }
        presenter.handle(&item("Video1", 1), now);

        assert_eq!(presenter.total("Video0"), 3);
        assert_eq!(presenter.total("Video1"), 1);
        assert_eq!(presenter.total("Video2"), 0);
        Ok(())
    }

    #[test]
    fn test_handle_snapshot_interval() -> anyhow::Result<()> {
        let dir = temp_dir("interval");
        let mut presenter = Presenter::new(PresenterSettings {
            snapshot_dir: Some(dir.clone()),
            snapshot_interval: Duration::from_secs(5),
        })?;
        let start = Instant::now();

        assert!(presenter.handle(&item("Video0", 1), start).is_some());
        assert!(presenter
            .handle(&item("Video0", 2), start + Duration::from_secs(1))
            .is_none());
        // each label keeps its own schedule
        assert!(presenter
            .handle(&item("Video1", 3), start + Duration::from_secs(1))
            .is_some());
        assert!(presenter
            .handle(&item("Video0", 4), start + Duration::from_secs(5))
            .is_some());

        assert!(dir.join("Video0.jpg").exists());
        assert!(dir.join("Video1.jpg").exists());
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_run_until_sink_dropped() -> anyhow::Result<()> {
        use ffmpeg_dual::sink::{ChannelSink, PresentationSink};

        let presenter = Presenter::new(PresenterSettings {
            snapshot_dir: None,
            snapshot_interval: Duration::from_secs(5),
        })?;
        let (sink, stream) = ChannelSink::with_capacity(4);
        let task = tokio::spawn(presenter.run(stream));

        sink.present(item("Video0", 1).image, "Video0")?;
        sink.present(item("Video1", 2).image, "Video1")?;
        sink.present(item("Video1", 3).image, "Video1")?;
        drop(sink);

        let totals = task.await?;
        assert_eq!(totals.get("Video0"), Some(&1));
        assert_eq!(totals.get("Video1"), Some(&2));
        Ok(())
    }
}
