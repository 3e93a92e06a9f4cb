//! Playback Engine
//!
//! Streams a list of audio assets to the peer of an established media
//! session. Every outbound frame waits for an inbound packet, reuses its RTP
//! framing and rides on top of its payload, so the peer's own cadence gates
//! what we send. Pacing on top of that is either a fixed post-send delay or
//! the media clock derived from the frames' sample counts.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::asset::AssetStore;
use super::codec::Codec;
use super::config::{Pacing, PlaybackConfig};
use super::rtp::{EncodedFrame, Packetizer, RtpHeader, RtpPacket};
use super::session::MediaSession;
use super::PlaybackError;

/// How far the media clock may fall behind before it is re-anchored
const MAX_CLOCK_LAG: Duration = Duration::from_millis(60);

/// Why playback stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every asset was played
    Completed,
    /// The peer closed the media channel
    PeerClosed,
    /// The caller cancelled playback
    Cancelled,
}

/// Summary of one playback run
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    /// Packets put on the wire
    pub packets_sent: u64,
    /// Assets whose frames were all sent
    pub assets_played: usize,
    /// Assets that could not be loaded
    pub assets_skipped: Vec<String>,
}

impl PlaybackReport {
    fn new() -> Self {
        Self {
            outcome: PlaybackOutcome::Completed,
            packets_sent: 0,
            assets_played: 0,
            assets_skipped: Vec::new(),
        }
    }
}

/// Result of handling one frame
enum Step {
    Sent,
    Stop(PlaybackOutcome),
}

/// Presentation schedule derived from the samples already sent
struct MediaClock {
    codec: Codec,
    origin: Option<Instant>,
    samples_sent: u64,
}

impl MediaClock {
    fn new(codec: Codec) -> Self {
        Self {
            codec,
            origin: None,
            samples_sent: 0,
        }
    }

    /// When the next frame is due.
    ///
    /// The first call starts the clock. If the peer stalled us past
    /// `MAX_CLOCK_LAG` the clock restarts at `now` rather than bursting to
    /// catch up.
    fn next_deadline(&mut self, now: Instant) -> Instant {
        let elapsed = self.codec.duration_of(self.samples_sent);
        let origin = *self.origin.get_or_insert(now);
        let deadline = origin + elapsed;

        if now > deadline + MAX_CLOCK_LAG {
            tracing::debug!(
                "Media clock {:?} behind, re-anchoring",
                now.duration_since(deadline)
            );
            self.origin = Some(now - elapsed);
            return now;
        }

        deadline
    }

    fn advance(&mut self, samples: u32) {
        self.samples_sent += samples as u64;
    }
}

/// Per-run mutable state
struct Playback {
    clock: MediaClock,
    last_sent: Option<RtpHeader>,
    report: PlaybackReport,
}

/// Plays audio assets over a media session
pub struct PlaybackEngine {
    config: PlaybackConfig,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl PlaybackEngine {
    /// Create an engine that stops at its next suspension point once `cancel` fires
    pub fn new(config: PlaybackConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            span: tracing::info_span!("playback"),
        }
    }

    /// Log under `span` instead of the default `playback` span
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Play `assets` in order over `session`.
    ///
    /// Assets that fail to load are skipped. Returns early, without error,
    /// when the peer closes the channel or the engine is cancelled. Any other
    /// send or receive failure aborts playback.
    pub async fn play<S, A>(
        &self,
        session: &mut S,
        store: &A,
        assets: &[String],
    ) -> Result<PlaybackReport, PlaybackError>
    where
        S: MediaSession + ?Sized,
        A: AssetStore + ?Sized,
    {
        self.run(session, store, assets)
            .instrument(self.span.clone())
            .await
    }

    async fn run<S, A>(
        &self,
        session: &mut S,
        store: &A,
        assets: &[String],
    ) -> Result<PlaybackReport, PlaybackError>
    where
        S: MediaSession + ?Sized,
        A: AssetStore + ?Sized,
    {
        let codec = self.config.codec;
        let mut packetizer = Packetizer::new(codec, self.config.framing);
        let mut state = Playback {
            clock: MediaClock::new(codec),
            last_sent: None,
            report: PlaybackReport::new(),
        };

        tracing::info!(
            "Starting playback of {} assets ({}, {:?}, {:?})",
            assets.len(),
            codec,
            self.config.framing,
            self.config.pacing
        );

        for id in assets {
            if self.cancel.is_cancelled() {
                return Ok(self.finish(state.report, PlaybackOutcome::Cancelled));
            }

            let asset = match store.load(id).await {
                Ok(asset) => asset,
                Err(e) => {
                    tracing::warn!("Skipping asset {}: {}", id, e);
                    state.report.assets_skipped.push(id.clone());
                    continue;
                }
            };

            tracing::info!("Playing asset {} ({} bytes)", asset.id, asset.len());

            for frame in packetizer.packetize(asset.data) {
                if let Step::Stop(outcome) = self.play_frame(session, &frame, &mut state).await? {
                    return Ok(self.finish(state.report, outcome));
                }
            }

            state.report.assets_played += 1;
        }

        Ok(self.finish(state.report, PlaybackOutcome::Completed))
    }

    async fn play_frame<S>(
        &self,
        session: &mut S,
        frame: &EncodedFrame,
        state: &mut Playback,
    ) -> Result<Step, PlaybackError>
    where
        S: MediaSession + ?Sized,
    {
        let inbound = match self.next_inbound(session, state.last_sent.as_ref()).await? {
            Some(packet) => packet,
            None if self.cancel.is_cancelled() => return Ok(Step::Stop(PlaybackOutcome::Cancelled)),
            None => return Ok(Step::Stop(PlaybackOutcome::PeerClosed)),
        };

        if self.config.pacing == Pacing::Timestamped {
            let deadline = state.clock.next_deadline(Instant::now());
            if !self.wait_until(deadline).await {
                return Ok(Step::Stop(PlaybackOutcome::Cancelled));
            }
        }

        let outbound = inbound.combined_with(&frame.payload);

        if let Err(e) = session.send(&outbound).await {
            if e.is_closed() {
                tracing::info!("Media channel closed while sending frame {}", frame.sequence);
                return Ok(Step::Stop(PlaybackOutcome::PeerClosed));
            }
            tracing::error!(
                "Error sending RTP packet: seq={}, frame={}: {}",
                outbound.header.sequence,
                frame.sequence,
                e
            );
            return Err(e);
        }

        tracing::debug!(
            "Sent RTP packet: seq={}, ts={}, frame_seq={}, frame_ts={}, payload={} bytes",
            outbound.header.sequence,
            outbound.header.timestamp,
            frame.sequence,
            frame.timestamp,
            outbound.payload.len()
        );

        state.clock.advance(frame.samples);
        state.last_sent = Some(outbound.header);
        state.report.packets_sent += 1;

        if let Pacing::FixedDelay(delay) = self.config.pacing {
            if !self.wait_until(Instant::now() + delay).await {
                return Ok(Step::Stop(PlaybackOutcome::Cancelled));
            }
        }

        Ok(Step::Sent)
    }

    /// Wait for the next inbound packet that moves the stream forward.
    ///
    /// `None` means the channel closed or playback was cancelled.
    async fn next_inbound<S>(
        &self,
        session: &mut S,
        last_sent: Option<&RtpHeader>,
    ) -> Result<Option<RtpPacket>, PlaybackError>
    where
        S: MediaSession + ?Sized,
    {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                res = session.recv() => res,
            };

            match received {
                Ok(packet) => {
                    if let Some(last) = last_sent {
                        if !packet.header.follows(last) {
                            tracing::debug!(
                                "Discarding stale inbound packet: seq={}, ts={} (last sent seq={}, ts={})",
                                packet.header.sequence,
                                packet.header.timestamp,
                                last.sequence,
                                last.timestamp
                            );
                            continue;
                        }
                    }
                    return Ok(Some(packet));
                }
                Err(e) if e.is_closed() => {
                    tracing::info!("Media channel closed by peer");
                    return Ok(None);
                }
                Err(e) => {
                    tracing::error!("Fail to read RTP: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Sleep until `deadline`; false if cancelled first
    async fn wait_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    fn finish(&self, mut report: PlaybackReport, outcome: PlaybackOutcome) -> PlaybackReport {
        report.outcome = outcome;
        tracing::info!(
            "Playback finished: {:?}, {} packets sent, {} assets played, {} skipped",
            outcome,
            report.packets_sent,
            report.assets_played,
            report.assets_skipped.len()
        );
        report
    }
}
