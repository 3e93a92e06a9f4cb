//! RTP (Real-time Transport Protocol) Packets
//!
//! RFC 3550 fixed header codec plus the packetizer that turns an audio
//! asset into sequenced, timestamped frames.

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::Codec;
use super::config::Framing;
use super::PlaybackError;

/// RTP packet header (12 bytes minimum)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (always 2)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Extension flag
    pub extension: bool,
    /// CSRC count
    pub csrc_count: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type (0 = PCMU, 8 = PCMA)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialize header to bytes.
    ///
    /// CSRC entries are never written, so the count goes out as zero.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12);

        // First byte: V(2) P(1) X(1) CC(4)
        let first_byte = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4);
        buf.put_u8(first_byte);

        // Second byte: M(1) PT(7)
        let second_byte = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        buf
    }

    /// Parse header from bytes, returning the header and the offset of the payload
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), PlaybackError> {
        if data.len() < 12 {
            return Err(PlaybackError::Rtp("RTP packet too short".to_string()));
        }

        let first_byte = data[0];
        let version = first_byte >> 6;
        if version != 2 {
            return Err(PlaybackError::Rtp(format!("Invalid RTP version: {}", version)));
        }

        let padding = (first_byte >> 5) & 1 == 1;
        let extension = (first_byte >> 4) & 1 == 1;
        let csrc_count = first_byte & 0x0F;

        let second_byte = data[1];
        let marker = (second_byte >> 7) & 1 == 1;
        let payload_type = second_byte & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut header_len = 12 + (csrc_count as usize * 4);

        if extension {
            // Profile-specific id (2 bytes) + length in 32-bit words (2 bytes)
            if data.len() < header_len + 4 {
                return Err(PlaybackError::Rtp("RTP extension truncated".to_string()));
            }
            let words = u16::from_be_bytes([data[header_len + 2], data[header_len + 3]]);
            header_len += 4 + words as usize * 4;
        }

        if data.len() < header_len {
            return Err(PlaybackError::Rtp("RTP header truncated".to_string()));
        }

        // CSRCs and extensions are skipped, so the header is re-emitted without them
        Ok((
            Self {
                version,
                padding,
                extension: false,
                csrc_count: 0,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            header_len,
        ))
    }

    /// True if this header comes strictly after `prev` in the stream.
    ///
    /// Sequence numbers must advance, timestamps must not go backward.
    /// Both comparisons are modulo wrap.
    pub fn follows(&self, prev: &RtpHeader) -> bool {
        seq_newer(self.sequence, prev.sequence) && !ts_older(self.timestamp, prev.timestamp)
    }
}

/// `a` is newer than `b` in 16-bit sequence space
pub fn seq_newer(a: u16, b: u16) -> bool {
    let delta = a.wrapping_sub(b);
    delta != 0 && delta < 0x8000
}

/// `a` is older than `b` in 32-bit timestamp space
pub fn ts_older(a: u32, b: u32) -> bool {
    let delta = b.wrapping_sub(a);
    delta != 0 && delta < 0x8000_0000
}

/// RTP packet with header and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Serialize packet to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = self.header.to_bytes();
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse packet from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, PlaybackError> {
        let (mut header, header_len) = RtpHeader::from_bytes(data)?;

        let mut end = data.len();
        if header.padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || header_len + pad > end {
                return Err(PlaybackError::Rtp("Invalid RTP padding".to_string()));
            }
            end -= pad;
            header.padding = false;
        }

        let payload = Bytes::copy_from_slice(&data[header_len..end]);

        Ok(Self { header, payload })
    }

    /// Echo this packet's framing with `frame` appended to its payload
    pub fn combined_with(&self, frame: &[u8]) -> RtpPacket {
        let mut payload = BytesMut::with_capacity(self.payload.len() + frame.len());
        payload.extend_from_slice(&self.payload);
        payload.extend_from_slice(frame);

        RtpPacket {
            header: self.header.clone(),
            payload: payload.freeze(),
        }
    }
}

/// One encoded frame cut from an asset
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Sequence number in the local frame sequence
    pub sequence: u16,
    /// Presentation timestamp in clock-rate ticks
    pub timestamp: u32,
    /// Payload type, fixed for the session
    pub payload_type: u8,
    /// Samples carried by this frame
    pub samples: u32,
    /// Encoded audio
    pub payload: Bytes,
}

/// Cuts assets into frames and stamps them with sequence numbers and timestamps.
///
/// One packetizer lives for the whole session, so sequencing continues across
/// assets.
pub struct Packetizer {
    codec: Codec,
    framing: Framing,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl Packetizer {
    /// Create a packetizer with randomized sequence/timestamp origins
    pub fn new(codec: Codec, framing: Framing) -> Self {
        Self::with_origin(
            codec,
            framing,
            rand::random::<u16>(),
            rand::random::<u32>(),
            rand::random::<u32>(),
        )
    }

    pub fn with_origin(codec: Codec, framing: Framing, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            codec,
            framing,
            ssrc,
            sequence,
            timestamp,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Lazily split `data` into frames.
    ///
    /// The returned iterator is finite and cannot be restarted; every frame it
    /// yields advances this packetizer's sequence and timestamp.
    pub fn packetize(&mut self, data: Bytes) -> Frames<'_> {
        let frame_len = match self.framing {
            Framing::WholeAsset => data.len(),
            Framing::Fixed(ptime) => self
                .codec
                .frame_bytes(ptime)
                .max(self.codec.bytes_per_sample()),
        };

        Frames {
            packetizer: self,
            data,
            offset: 0,
            frame_len,
        }
    }

    fn stamp(&mut self, payload: Bytes) -> EncodedFrame {
        let samples = self.codec.samples_in(payload.len());
        let frame = EncodedFrame {
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload_type: self.codec.payload_type(),
            samples,
            payload,
        };

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);

        frame
    }
}

/// Frame iterator over one asset
pub struct Frames<'a> {
    packetizer: &'a mut Packetizer,
    data: Bytes,
    offset: usize,
    frame_len: usize,
}

impl Iterator for Frames<'_> {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + self.frame_len).min(self.data.len());
        let payload = self.data.slice(self.offset..end);
        self.offset = end;

        Some(self.packetizer.stamp(payload))
    }
}
