use std::path::Path;

use ffmpeg_dual::router::{RouterConfig, RouterConfigBuilder};
use serde::Deserialize;

/// Environment variable naming the config file when no path argument is given.
pub const CONFIG_ENV: &str = "DUALVIEW_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // FFmpeg decoder name
    pub codec: String,
    pub prefer_hardware: bool,
    pub display: DisplayConfig,
    // 0 = run until inputs end or ctrl-c
    pub run_seconds: u64,
    // images buffered between router and presenter
    pub channel_capacity: usize,
    pub snapshot_dir: Option<String>,
    pub snapshot_interval_secs: u64,
    pub inputs: Vec<InputConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            prefer_hardware: false,
            display: DisplayConfig::default(),
            run_seconds: 50,
            channel_capacity: 8,
            snapshot_dir: None,
            snapshot_interval_secs: 5,
            inputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
        }
    }
}

/// One replayed input feeding one stream id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputConfig {
    pub stream_id: u32,
    #[serde(default)]
    pub label: Option<String>,
    pub path: String,
    /// Pace delivery by fragment timestamps instead of reading as fast as possible
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

fn default_realtime() -> bool {
    true
}

impl InputConfig {
    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Video{}", self.stream_id))
    }
}

impl AppConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        Self::from_json(&text).map_err(|e| anyhow::anyhow!("parse config {}: {:#}", path.display(), e))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            anyhow::bail!(
                "invalid display size {}x{}",
                self.display.width,
                self.display.height
            );
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if self.inputs[..i]
                .iter()
                .any(|other| other.stream_id == input.stream_id)
            {
                anyhow::bail!("stream id {} used by more than one input", input.stream_id);
            }
        }
        Ok(())
    }

    /// Router configuration: one channel per input, or the two default
    /// channels when no input is configured.
    pub fn router_config(&self) -> RouterConfig {
        let builder = if self.inputs.is_empty() {
            RouterConfig::default()
                .channels
                .into_iter()
                .fold(RouterConfig::builder(), |b, c| b.add_channel(c.stream_id, c.label))
        } else {
            self.inputs
                .iter()
                .fold(RouterConfig::builder(), |b, input| {
                    b.add_channel(input.stream_id, input.label())
                })
        };
        apply_decoding(builder, self).build()
    }
}

fn apply_decoding(builder: RouterConfigBuilder, config: &AppConfig) -> RouterConfigBuilder {
    builder
        .codec(config.codec.clone())
        .prefer_hardware(config.prefer_hardware)
        .display_size(config.display.width, config.display.height)
}

/// Loads the config from the first CLI argument, else from `$DUALVIEW_CONFIG`,
/// else defaults.
pub fn load() -> anyhow::Result<AppConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => AppConfig::from_file(Path::new(&path)),
        None => {
            log::info!("no config given, using defaults");
            Ok(AppConfig::default())
        }
    }
}
