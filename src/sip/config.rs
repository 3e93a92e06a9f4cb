//! Playback Configuration
//!
//! Configuration for the media socket, the asset list and playback pacing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::codec::Codec;

/// Demo message played to every caller
pub const DEFAULT_ASSETS: [&str; 4] = [
    "vm-nobodyavail.ulaw",
    "carried-away-by-monkeys.ulaw",
    "the-monkeys-twice.ulaw",
    "lots-o-monkeys.ulaw",
];

/// How an asset is cut into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The whole asset goes out as a single frame.
    ///
    /// Over UDP the packet must fit one datagram, so assets much past 64KB
    /// cannot be sent this way; the session refuses such packets with a
    /// transport error and playback stops.
    WholeAsset,
    /// Frames of a fixed duration at the codec's clock rate
    Fixed(Duration),
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Fixed(Duration::from_millis(20))
    }
}

/// How sends are spaced out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Sleep a constant amount after every send
    FixedDelay(Duration),
    /// Send each frame at its presentation time on the media clock
    #[default]
    Timestamped,
}

/// Settings for one playback run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaybackConfig {
    /// Codec the assets are encoded in
    pub codec: Codec,
    /// Frame segmentation
    pub framing: Framing,
    /// Send pacing
    pub pacing: Pacing,
}

impl PlaybackConfig {
    /// One packet per asset with a fixed 160ms delay after each send
    pub fn per_asset() -> Self {
        Self {
            codec: Codec::Pcmu,
            framing: Framing::WholeAsset,
            pacing: Pacing::FixedDelay(Duration::from_millis(160)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Framing::Fixed(ptime) = self.framing {
            if self.codec.samples_per_frame(ptime) == 0 {
                return Err(format!("Frame duration {:?} is shorter than one sample", ptime));
            }
        }
        Ok(())
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Local RTP socket address
    pub listen_addr: SocketAddr,

    /// Fixed remote RTP endpoint (learned from the first packet if None)
    pub remote_addr: Option<SocketAddr>,

    /// Directory holding the audio assets
    pub asset_dir: PathBuf,

    /// Assets to play, in order
    pub assets: Vec<String>,

    /// Playback settings
    pub playback: PlaybackConfig,

    /// Inbound silence after which the call is considered over
    pub media_timeout: Duration,

    /// Upper bound for a graceful hangup on shutdown
    pub hangup_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 20000)),
            remote_addr: None,
            asset_dir: PathBuf::from("sounds"),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            playback: PlaybackConfig::default(),
            media_timeout: Duration::from_secs(30),
            hangup_timeout: Duration::from_secs(3),
        }
    }
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key/value source, falling back to defaults
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();

        let listen_addr = match var("RTP_LISTEN_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|e| format!("Invalid RTP_LISTEN_ADDR {}: {}", addr, e))?,
            None => defaults.listen_addr,
        };

        let remote_addr = match var("RTP_REMOTE_ADDR") {
            Some(addr) if !addr.trim().is_empty() => Some(
                addr.parse()
                    .map_err(|e| format!("Invalid RTP_REMOTE_ADDR {}: {}", addr, e))?,
            ),
            _ => None,
        };

        let codec = match var("PLAYBACK_CODEC") {
            Some(name) => {
                Codec::from_name(&name).ok_or_else(|| format!("Unsupported codec: {}", name))?
            }
            None => Codec::default(),
        };

        let ptime = Duration::from_millis(parse_or(&var, "PLAYBACK_PTIME_MS", 20)?);
        let framing = match var("PLAYBACK_FRAMING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            // One datagram per asset: only for assets well under 64KB
            "asset" | "whole" => Framing::WholeAsset,
            "" | "fixed" => Framing::Fixed(ptime),
            other => return Err(format!("Unknown PLAYBACK_FRAMING: {}", other)),
        };

        let delay = Duration::from_millis(parse_or(&var, "PLAYBACK_DELAY_MS", 160)?);
        let pacing = match var("PLAYBACK_PACING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "fixed" | "delay" => Pacing::FixedDelay(delay),
            "" | "timestamp" => Pacing::Timestamped,
            other => return Err(format!("Unknown PLAYBACK_PACING: {}", other)),
        };

        let assets = match var("PLAYBACK_ASSETS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.assets,
        };

        Ok(Self {
            listen_addr,
            remote_addr,
            asset_dir: var("PLAYBACK_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_dir),
            assets,
            playback: PlaybackConfig {
                codec,
                framing,
                pacing,
            },
            media_timeout: Duration::from_secs(parse_or(&var, "MEDIA_TIMEOUT_SECS", 30)?),
            hangup_timeout: Duration::from_secs(parse_or(&var, "HANGUP_TIMEOUT_SECS", 3)?),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.assets.is_empty() {
            return Err("At least one playback asset is required".to_string());
        }
        if self.media_timeout.is_zero() {
            return Err("Media timeout must be greater than 0".to_string());
        }
        self.playback.validate()
    }
}

fn parse_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, String> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| format!("Invalid {}: {}", key, value)),
        None => Ok(default),
    }
}
