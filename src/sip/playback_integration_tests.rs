//! Integration Tests for Playback and Call Supervision
//!
//! Drives the playback engine against a scripted peer:
//! Asset Store -> Packetizer -> Inbound-gated Send -> Pacing
//!
//! These tests verify:
//! - One echoed packet per asset, in order
//! - Early, clean termination when the peer closes
//! - Skipping of unloadable assets
//! - Payload composition and stale-packet filtering
//! - Fixed-delay and media-clock pacing
//! - Cancellation and call supervision
//! - Receive and send failures

#[cfg(test)]
mod tests {
    use super::super::{
        run_call, AssetStore, AudioAsset, CallControl, CallOutcome, Framing, MediaSession, Pacing,
        PlaybackConfig, PlaybackEngine, PlaybackError, PlaybackOutcome, RtpHeader, RtpPacket,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    // ============================================================================
    // Helper Types
    // ============================================================================

    /// What the peer does once its script runs out
    #[derive(Clone, Copy)]
    enum Then {
        Close,
        Hang,
        Fail,
    }

    #[derive(Debug, Clone)]
    struct Sent {
        at: Instant,
        packet: RtpPacket,
    }

    /// Peer that emits a fixed list of packets at a fixed cadence
    struct ScriptedPeer {
        inbound: VecDeque<RtpPacket>,
        cadence: Duration,
        start: Instant,
        delivered: u32,
        then: Then,
        fail_send_at: Option<usize>,
        close_send_at: Option<usize>,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    impl ScriptedPeer {
        fn new(inbound: Vec<RtpPacket>, cadence: Duration, then: Then) -> Self {
            Self {
                inbound: inbound.into(),
                cadence,
                start: Instant::now(),
                delivered: 0,
                then,
                fail_send_at: None,
                close_send_at: None,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing_send_at(mut self, index: usize) -> Self {
            self.fail_send_at = Some(index);
            self
        }

        fn closing_send_at(mut self, index: usize) -> Self {
            self.close_send_at = Some(index);
            self
        }

        fn sent_log(&self) -> Arc<Mutex<Vec<Sent>>> {
            self.sent.clone()
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaSession for ScriptedPeer {
        async fn recv(&mut self) -> Result<RtpPacket, PlaybackError> {
            match self.inbound.pop_front() {
                Some(packet) => {
                    self.delivered += 1;
                    tokio::time::sleep_until(self.start + self.cadence * self.delivered).await;
                    Ok(packet)
                }
                None => match self.then {
                    Then::Close => Err(PlaybackError::ChannelClosed),
                    Then::Hang => std::future::pending().await,
                    Then::Fail => Err(PlaybackError::Transport("connection reset".to_string())),
                },
            }
        }

        async fn send(&mut self, packet: &RtpPacket) -> Result<(), PlaybackError> {
            let mut sent = self.sent.lock().unwrap();
            if Some(sent.len()) == self.fail_send_at {
                return Err(PlaybackError::Transport("connection refused".to_string()));
            }
            if Some(sent.len()) == self.close_send_at {
                return Err(PlaybackError::ChannelClosed);
            }
            sent.push(Sent {
                at: Instant::now(),
                packet: packet.clone(),
            });
            Ok(())
        }
    }

    /// In-memory asset store
    struct MemoryAssets(HashMap<String, Bytes>);

    #[async_trait]
    impl AssetStore for MemoryAssets {
        async fn load(&self, id: &str) -> Result<AudioAsset, PlaybackError> {
            self.0
                .get(id)
                .map(|data| AudioAsset::new(id, data.clone()))
                .ok_or_else(|| PlaybackError::AssetUnavailable {
                    asset: id.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such asset"),
                })
        }
    }

    /// Call control whose end is driven by the test
    struct TestControl {
        ended: CancellationToken,
        hangups: AtomicUsize,
    }

    impl TestControl {
        fn new() -> Self {
            Self {
                ended: CancellationToken::new(),
                hangups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CallControl for TestControl {
        async fn done(&self) {
            self.ended.cancelled().await
        }

        async fn hangup(&self, _timeout: Duration) -> Result<(), PlaybackError> {
            self.hangups.fetch_add(1, Ordering::SeqCst);
            self.ended.cancel();
            Ok(())
        }
    }

    // ============================================================================
    // Helper Functions
    // ============================================================================

    /// Inbound packet with a 20ms PCMU payload
    fn inbound(sequence: u16) -> RtpPacket {
        RtpPacket::new(
            RtpHeader::new(0, sequence, sequence as u32 * 160, 0xCAFE),
            vec![0xFFu8; 160],
        )
    }

    fn inbound_run(count: u16) -> Vec<RtpPacket> {
        (100..100 + count).map(inbound).collect()
    }

    fn store(assets: &[(&str, usize, u8)]) -> MemoryAssets {
        MemoryAssets(
            assets
                .iter()
                .map(|(id, len, fill)| (id.to_string(), Bytes::from(vec![*fill; *len])))
                .collect(),
        )
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn engine(config: PlaybackConfig) -> PlaybackEngine {
        PlaybackEngine::new(config, CancellationToken::new())
    }

    fn timestamped(ptime_ms: u64) -> PlaybackConfig {
        PlaybackConfig {
            framing: Framing::Fixed(Duration::from_millis(ptime_ms)),
            pacing: Pacing::Timestamped,
            ..PlaybackConfig::default()
        }
    }

    // ============================================================================
    // Playback Engine
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_one_packet_per_asset_in_order() {
        let assets = store(&[("a", 8000, 0x01), ("b", 4000, 0x02), ("c", 100, 0x03)]);
        let mut peer = ScriptedPeer::new(inbound_run(10), Duration::ZERO, Then::Close);

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.packets_sent, 3);
        assert_eq!(report.assets_played, 3);

        let sent = peer.sent();
        let tails: Vec<u8> = sent.iter().map(|s| *s.packet.payload.last().unwrap()).collect();
        assert_eq!(tails, vec![0x01, 0x02, 0x03]);
        let lens: Vec<usize> = sent.iter().map(|s| s.packet.payload.len()).collect();
        assert_eq!(lens, vec![160 + 8000, 160 + 4000, 160 + 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_after_n_receives() {
        let assets = store(&[("a", 800, 1), ("b", 800, 2), ("c", 800, 3), ("d", 800, 4)]);
        let mut peer = ScriptedPeer::new(inbound_run(2), Duration::from_millis(20), Then::Close);

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::PeerClosed);
        assert_eq!(report.packets_sent, 2);
        assert_eq!(peer.sent().len(), 2);
        assert_eq!(report.assets_played, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unloadable_asset_is_skipped() {
        let assets = store(&[("a", 400, 0xA1), ("b", 400, 0xB2)]);
        let mut peer = ScriptedPeer::new(inbound_run(5), Duration::ZERO, Then::Close);

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "missing", "b"]))
            .await
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.assets_skipped, vec!["missing".to_string()]);
        assert_eq!(report.assets_played, 2);

        let tails: Vec<u8> = peer
            .sent()
            .iter()
            .map(|s| *s.packet.payload.last().unwrap())
            .collect();
        assert_eq!(tails, vec![0xA1, 0xB2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_is_inbound_plus_frame() {
        let assets = store(&[("a", 320, 0x55)]);
        let script = inbound_run(2);
        let mut peer = ScriptedPeer::new(script.clone(), Duration::ZERO, Then::Close);

        engine(timestamped(20))
            .play(&mut peer, &assets, &ids(&["a"]))
            .await
            .unwrap();

        let sent = peer.sent();
        assert_eq!(sent.len(), 2);
        for (out, original) in sent.iter().zip(&script) {
            assert_eq!(out.packet.header, original.header);

            let mut expected = original.payload.to_vec();
            expected.extend_from_slice(&[0x55; 160]);
            assert_eq!(out.packet.payload.to_vec(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_sends() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2), ("c", 100, 3)]);
        let mut peer = ScriptedPeer::new(inbound_run(3), Duration::ZERO, Then::Close);

        engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c"]))
            .await
            .unwrap();

        let sent = peer.sent();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(160));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_assets_against_160ms_peer() {
        let assets = store(&[("A", 8000, 0xAA), ("B", 4000, 0xBB)]);
        let mut peer = ScriptedPeer::new(inbound_run(2), Duration::from_millis(160), Then::Close);
        let start = Instant::now();

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["A", "B"]))
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(report.packets_sent, 2);
        assert_eq!(report.assets_played, 2);
        assert!(elapsed >= Duration::from_millis(320), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(320 + 160), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamped_pacing_follows_media_clock() {
        let assets = store(&[("a", 480, 0x10), ("b", 160, 0x20)]);
        let mut peer = ScriptedPeer::new(inbound_run(8), Duration::ZERO, Then::Close);

        let report = engine(timestamped(20))
            .play(&mut peer, &assets, &ids(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(report.packets_sent, 4);

        let sent = peer.sent();
        let first = sent[0].at;
        for (k, s) in sent.iter().enumerate() {
            assert_eq!(s.at - first, Duration::from_millis(20 * k as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_blocked_receive() {
        let assets = store(&[("a", 400, 1)]);
        let mut peer = ScriptedPeer::new(Vec::new(), Duration::ZERO, Then::Hang);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::new(PlaybackConfig::per_asset(), cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let report = engine.play(&mut peer, &assets, &ids(&["a"])).await.unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert_eq!(report.packets_sent, 0);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_inbound_is_not_echoed() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2)]);
        let script = vec![inbound(10), inbound(9), inbound(10), inbound(11)];
        let mut peer = ScriptedPeer::new(script, Duration::ZERO, Then::Close);

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(report.packets_sent, 2);
        let seqs: Vec<u16> = peer.sent().iter().map(|s| s.packet.header.sequence).collect();
        assert_eq!(seqs, vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_aborts_playback() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2), ("c", 100, 3)]);
        let mut peer =
            ScriptedPeer::new(inbound_run(3), Duration::ZERO, Then::Close).failing_send_at(1);

        let err = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybackError::Transport(_)));
        assert_eq!(peer.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_fixed_delay() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2)]);
        let mut peer = ScriptedPeer::new(inbound_run(2), Duration::ZERO, Then::Close);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::new(PlaybackConfig::per_asset(), cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let report = engine.play(&mut peer, &assets, &ids(&["a", "b"])).await.unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert_eq!(report.packets_sent, 1);
        assert_eq!(peer.sent().len(), 1);
        assert!(start.elapsed() < Duration::from_millis(160), "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_aborts_playback() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2), ("c", 100, 3)]);
        let mut peer = ScriptedPeer::new(inbound_run(1), Duration::ZERO, Then::Fail);

        let err = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybackError::Transport(_)));
        assert_eq!(peer.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_closed_on_send_ends_cleanly() {
        let assets = store(&[("a", 100, 1), ("b", 100, 2), ("c", 100, 3)]);
        let mut peer =
            ScriptedPeer::new(inbound_run(3), Duration::ZERO, Then::Close).closing_send_at(1);

        let report = engine(PlaybackConfig::per_asset())
            .play(&mut peer, &assets, &ids(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::PeerClosed);
        assert_eq!(report.packets_sent, 1);
        assert_eq!(report.assets_played, 1);
        assert_eq!(peer.sent().len(), 1);
    }

    // ============================================================================
    // Call Supervision
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_hangs_up_and_cancels_playback() {
        let peer = ScriptedPeer::new(Vec::new(), Duration::ZERO, Then::Hang);
        let control = TestControl::new();

        let summary = run_call(
            peer,
            &control,
            Arc::new(store(&[("a", 400, 1)])),
            ids(&["a"]),
            engine(PlaybackConfig::per_asset()),
            Duration::from_secs(3),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcome, CallOutcome::Shutdown);
        assert_eq!(control.hangups.load(Ordering::SeqCst), 1);
        assert_eq!(
            summary.playback.map(|r| r.outcome),
            Some(PlaybackOutcome::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_hangup_ends_call_without_hangup() {
        let peer = ScriptedPeer::new(inbound_run(1), Duration::from_millis(20), Then::Hang);
        let sent = peer.sent_log();
        let control = TestControl::new();

        let ended = control.ended.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ended.cancel();
        });

        let summary = run_call(
            peer,
            &control,
            Arc::new(store(&[("a", 160, 1), ("b", 160, 2)])),
            ids(&["a", "b"]),
            engine(timestamped(20)),
            Duration::from_secs(3),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcome, CallOutcome::Ended);
        assert_eq!(control.hangups.load(Ordering::SeqCst), 0);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(
            summary.playback.map(|r| r.outcome),
            Some(PlaybackOutcome::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_playback_waits_for_call_end() {
        let peer = ScriptedPeer::new(inbound_run(4), Duration::ZERO, Then::Hang);
        let control = TestControl::new();

        let ended = control.ended.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ended.cancel();
        });

        let start = Instant::now();
        let summary = run_call(
            peer,
            &control,
            Arc::new(store(&[("a", 160, 1)])),
            ids(&["a"]),
            engine(timestamped(20)),
            Duration::from_secs(3),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(summary.outcome, CallOutcome::Ended);
        let report = summary.playback.unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.packets_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_hangs_up_and_surfaces() {
        let peer = ScriptedPeer::new(inbound_run(2), Duration::ZERO, Then::Hang).failing_send_at(0);
        let control = TestControl::new();

        let err = run_call(
            peer,
            &control,
            Arc::new(store(&[("a", 160, 1)])),
            ids(&["a"]),
            engine(PlaybackConfig::per_asset()),
            Duration::from_secs(3),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PlaybackError::Transport(_)));
        assert_eq!(control.hangups.load(Ordering::SeqCst), 1);
    }
}
