//! RTP Playback for answered SIP calls
//!
//! This module streams pre-recorded audio back to a caller over an
//! already-established media session.
//! Features:
//! - G.711 codec descriptors (PCMU/PCMA)
//! - RTP packet format and frame sequencing
//! - Playback paced by the peer's inbound packets and the media clock
//! - Plain UDP media session with symmetric RTP
//! - Call supervision (shutdown vs. remote hangup)
#![allow(dead_code)]

mod asset;
mod call;
mod codec;
mod config;
mod engine;
mod rtp;
mod session;

#[cfg(test)]
mod playback_integration_tests;

pub use asset::FileAssets;
pub use call::run_call;
pub use config::AppConfig;
pub use engine::PlaybackEngine;
pub use session::UdpMediaSession;

// Public API re-exports for external use
#[allow(unused_imports)]
pub use asset::{AssetStore, AudioAsset};
#[allow(unused_imports)]
pub use call::{CallOutcome, CallSummary};
#[allow(unused_imports)]
pub use codec::Codec;
#[allow(unused_imports)]
pub use config::{Framing, Pacing, PlaybackConfig};
#[allow(unused_imports)]
pub use engine::{PlaybackOutcome, PlaybackReport};
#[allow(unused_imports)]
pub use rtp::{EncodedFrame, Packetizer, RtpHeader, RtpPacket};
#[allow(unused_imports)]
pub use session::{CallControl, MediaSession, UdpCallControl};

use thiserror::Error;

/// Playback-related errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Asset unavailable: {asset}: {source}")]
    AssetUnavailable {
        asset: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Media channel closed")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RTP error: {0}")]
    Rtp(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    /// Clean end of the media channel, not a failure
    pub fn is_closed(&self) -> bool {
        matches!(self, PlaybackError::ChannelClosed)
    }
}
