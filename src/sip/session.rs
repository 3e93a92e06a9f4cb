//! Media Sessions
//!
//! The packet channel playback runs over, and the call-level handle used to
//! watch for the end of the call and hang it up.
//!
//! `UdpMediaSession` is a plain RTP socket. It does no signaling: the peer is
//! either configured or learned from its first packet (symmetric RTP), and a
//! silent peer is treated as having hung up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rtp::RtpPacket;
use super::PlaybackError;

/// Bidirectional RTP channel of an established call
#[async_trait]
pub trait MediaSession: Send {
    /// Wait for the next inbound packet.
    ///
    /// Returns `ChannelClosed` once the call is over; any other error is a
    /// transport failure.
    async fn recv(&mut self) -> Result<RtpPacket, PlaybackError>;

    /// Send one packet to the peer
    async fn send(&mut self, packet: &RtpPacket) -> Result<(), PlaybackError>;
}

/// Call-level control, held apart from the media channel
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Resolves when the call has ended for any reason
    async fn done(&self);

    /// Best-effort teardown, bounded by `timeout`
    async fn hangup(&self, timeout: Duration) -> Result<(), PlaybackError>;
}

/// Largest UDP payload; the receive buffer never truncates
const MAX_DATAGRAM: usize = 65_535;

/// Largest RTP packet that fits in one IPv4 UDP datagram
pub const MAX_RTP_PACKET: usize = 65_507;

/// RTP over a local UDP socket
pub struct UdpMediaSession {
    socket: Arc<UdpSocket>,
    remote: Option<SocketAddr>,
    media_timeout: Duration,
    /// Inbound silence past this instant ends the call; unset until a peer is known
    liveness_deadline: Option<Instant>,
    closed: CancellationToken,
    buf: Vec<u8>,
    packets_received: u64,
    packets_sent: u64,
}

impl UdpMediaSession {
    /// Bind the local RTP socket
    pub async fn bind(
        addr: SocketAddr,
        remote: Option<SocketAddr>,
        media_timeout: Duration,
    ) -> Result<Self, PlaybackError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| PlaybackError::Transport(format!("Failed to bind RTP socket {}: {}", addr, e)))?;

        tracing::info!("RTP socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            remote,
            media_timeout,
            liveness_deadline: remote.map(|_| Instant::now() + media_timeout),
            closed: CancellationToken::new(),
            buf: vec![0u8; MAX_DATAGRAM],
            packets_received: 0,
            packets_sent: 0,
        })
    }

    /// Get the local address
    pub fn local_addr(&self) -> Result<SocketAddr, PlaybackError> {
        Ok(self.socket.local_addr()?)
    }

    /// Remote endpoint, once known
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Handle for watching and ending the call
    pub fn control(&self) -> UdpCallControl {
        UdpCallControl {
            closed: self.closed.clone(),
        }
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }
}

#[async_trait]
impl MediaSession for UdpMediaSession {
    async fn recv(&mut self) -> Result<RtpPacket, PlaybackError> {
        loop {
            let socket = &self.socket;
            let buf = &mut self.buf;

            // No caller yet: wait as long as it takes
            let received = match self.liveness_deadline {
                Some(deadline) => tokio::select! {
                    _ = self.closed.cancelled() => return Err(PlaybackError::ChannelClosed),
                    res = tokio::time::timeout_at(deadline, socket.recv_from(buf)) => res,
                },
                None => tokio::select! {
                    _ = self.closed.cancelled() => return Err(PlaybackError::ChannelClosed),
                    res = socket.recv_from(buf) => Ok(res),
                },
            };

            let (len, from) = match received {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    return Err(PlaybackError::Transport(format!("RTP receive failed: {}", e)));
                }
                Err(_) => {
                    tracing::info!(
                        "No inbound RTP for {:?}, treating call as ended",
                        self.media_timeout
                    );
                    self.closed.cancel();
                    return Err(PlaybackError::ChannelClosed);
                }
            };

            let packet = match RtpPacket::from_bytes(&self.buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::debug!("Dropping non-RTP datagram from {}: {}", from, e);
                    continue;
                }
            };

            match self.remote {
                Some(remote) if remote != from => {
                    tracing::debug!("Ignoring RTP from unexpected source {}", from);
                    continue;
                }
                None => {
                    tracing::info!("Learned remote RTP endpoint {}", from);
                    self.remote = Some(from);
                }
                _ => {}
            }

            self.liveness_deadline = Some(Instant::now() + self.media_timeout);
            self.packets_received += 1;
            return Ok(packet);
        }
    }

    async fn send(&mut self, packet: &RtpPacket) -> Result<(), PlaybackError> {
        if self.closed.is_cancelled() {
            return Err(PlaybackError::ChannelClosed);
        }

        let remote = self
            .remote
            .ok_or_else(|| PlaybackError::Transport("No remote address set".to_string()))?;

        let bytes = packet.to_bytes();
        if bytes.len() > MAX_RTP_PACKET {
            return Err(PlaybackError::Transport(format!(
                "RTP packet of {} bytes exceeds the {} byte UDP limit",
                bytes.len(),
                MAX_RTP_PACKET
            )));
        }

        self.socket
            .send_to(&bytes, remote)
            .await
            .map_err(|e| PlaybackError::Transport(format!("RTP send to {} failed: {}", remote, e)))?;

        self.packets_sent += 1;
        Ok(())
    }
}

/// Call control for a `UdpMediaSession`
#[derive(Debug, Clone)]
pub struct UdpCallControl {
    closed: CancellationToken,
}

#[async_trait]
impl CallControl for UdpCallControl {
    async fn done(&self) {
        self.closed.cancelled().await
    }

    async fn hangup(&self, _timeout: Duration) -> Result<(), PlaybackError> {
        // Plain RTP has nothing to signal; closing the channel ends the call
        self.closed.cancel();
        Ok(())
    }
}
