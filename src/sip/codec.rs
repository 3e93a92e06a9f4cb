//! G.711 Codec Descriptors
//!
//! Playback never transcodes: assets are already companded. The codec only
//! tells the packetizer how bytes map to media time.

use std::time::Duration;

/// Audio codec negotiated for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// G.711 μ-law (US standard) - Payload type 0
    #[default]
    Pcmu,
    /// G.711 A-law (EU standard) - Payload type 8
    Pcma,
}

impl Codec {
    /// RTP payload type number
    pub fn payload_type(&self) -> u8 {
        match self {
            Codec::Pcmu => 0,
            Codec::Pcma => 8,
        }
    }

    /// RTP clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        8000 // G.711 always uses 8kHz
    }

    /// Encoded bytes per sample
    pub fn bytes_per_sample(&self) -> usize {
        1
    }

    /// Codec name as it appears in SDP
    pub fn sdp_name(&self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Pcma => "PCMA",
        }
    }

    /// Number of samples in `ptime` of audio (160 for 20ms)
    pub fn samples_per_frame(&self, ptime: Duration) -> usize {
        (self.clock_rate() as u128 * ptime.as_millis() / 1000) as usize
    }

    /// Encoded size of one `ptime` frame in bytes
    pub fn frame_bytes(&self, ptime: Duration) -> usize {
        self.samples_per_frame(ptime) * self.bytes_per_sample()
    }

    /// Number of samples carried by `len` encoded bytes
    pub fn samples_in(&self, len: usize) -> u32 {
        (len / self.bytes_per_sample()) as u32
    }

    /// Media time covered by `samples` clock ticks
    pub fn duration_of(&self, samples: u64) -> Duration {
        Duration::from_micros(samples * 1_000_000 / self.clock_rate() as u64)
    }

    /// Parse a codec name from configuration
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "PCMU" | "ULAW" => Some(Codec::Pcmu),
            "PCMA" | "ALAW" => Some(Codec::Pcma),
            _ => None,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sdp_name(), self.clock_rate())
    }
}
