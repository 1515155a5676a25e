use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debounce::DEFAULT_GAP_FRAMES;

const DEFAULT_SOURCE_URL: &str = "stub://backyard";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "motion";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SETTLE_MS: u64 = 2000;
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_PREFIX: &str = "monkey_watch";
const DEFAULT_MQTT_CLIENT_ID: &str = "monkey_watchd";
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    debounce: Option<DebounceConfigFile>,
    alert: Option<AlertConfigFile>,
    journal_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    model_input: Option<u32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DebounceConfigFile {
    gap_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    kind: Option<String>,
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    settle_ms: Option<u64>,
    mqtt_broker_addr: Option<String>,
    mqtt_topic_prefix: Option<String>,
    mqtt_client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub gap_frames: u32,
    pub alert: AlertSettings,
    pub journal_path: Option<PathBuf>,
    /// Where annotated JPEGs of each new sighting go. Needs the `snapshot` feature.
    pub snapshot_dir: Option<PathBuf>,
    pub health_log_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub model_input: u32,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Log,
    Serial,
    Mqtt,
}

impl std::str::FromStr for AlertKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "none" => Ok(AlertKind::Log),
            "serial" => Ok(AlertKind::Serial),
            "mqtt" => Ok(AlertKind::Mqtt),
            other => Err(anyhow!(
                "unknown alert kind '{}' (expected log, serial or mqtt)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub kind: AlertKind,
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub settle: Duration,
    pub mqtt_broker_addr: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: String,
}

impl WatchConfig {
    /// Load from the file named by `MONKEY_WATCH_CONFIG` (if any), then apply
    /// `MONKEY_WATCH_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MONKEY_WATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as [`WatchConfig::load`] with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();

        let kind = match alert.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None if alert.serial_port.is_some() => AlertKind::Serial,
            None => AlertKind::Log,
        };

        Ok(Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector.model_path,
                model_input: detector.model_input.unwrap_or(DEFAULT_MODEL_INPUT),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
            },
            gap_frames: file
                .debounce
                .and_then(|debounce| debounce.gap_frames)
                .unwrap_or(DEFAULT_GAP_FRAMES),
            alert: AlertSettings {
                kind,
                serial_port: alert.serial_port,
                baud_rate: alert.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                settle: Duration::from_millis(alert.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
                mqtt_broker_addr: alert
                    .mqtt_broker_addr
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                mqtt_topic_prefix: alert
                    .mqtt_topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_PREFIX.to_string()),
                mqtt_client_id: alert
                    .mqtt_client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            },
            journal_path: file.journal_path,
            snapshot_dir: file.snapshot_dir,
            health_log_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("MONKEY_WATCH_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = non_empty_env("MONKEY_WATCH_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("MONKEY_WATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(confidence) = non_empty_env("MONKEY_WATCH_CONFIDENCE") {
            self.detector.confidence_threshold = confidence.parse().map_err(|_| {
                anyhow!("MONKEY_WATCH_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Some(gap) = non_empty_env("MONKEY_WATCH_GAP_FRAMES") {
            self.gap_frames = gap
                .parse()
                .map_err(|_| anyhow!("MONKEY_WATCH_GAP_FRAMES must be a positive integer"))?;
        }
        if let Some(port) = non_empty_env("MONKEY_WATCH_SERIAL_PORT") {
            self.alert.serial_port = Some(port);
            self.alert.kind = AlertKind::Serial;
        }
        if let Some(broker) = non_empty_env("MONKEY_WATCH_MQTT_BROKER") {
            self.alert.mqtt_broker_addr = broker;
            self.alert.kind = AlertKind::Mqtt;
        }
        if let Some(kind) = non_empty_env("MONKEY_WATCH_ALERT") {
            self.alert.kind = kind.parse()?;
        }
        if let Some(path) = non_empty_env("MONKEY_WATCH_JOURNAL") {
            self.journal_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty_env("MONKEY_WATCH_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let threshold = self.detector.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.gap_frames == 0 {
            return Err(anyhow!("gap_frames must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.alert.kind == AlertKind::Serial && self.alert.serial_port.is_none() {
            return Err(anyhow!("serial alerts require alert.serial_port"));
        }
        self.detector.backend = self.detector.backend.trim().to_ascii_lowercase();
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract backend requires detector.model_path"));
        }
        Ok(())
    }

    /// Poll interval derived from `target_fps`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.source.target_fps.max(1) as u64)
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
