
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::{self, PayloadFormat};
use crate::error::Result;
use crate::mixer::PcmWriter;
use crate::stream::UdpStream;
use crate::INBOUND_MTU;

/// SequencedWriter emits one RTP packet per payload with a fresh sequence
/// number and a timestamp that steps by one frame of clock ticks. The marker
/// bit is raised on the first packet of the stream and cleared afterwards;
/// it is never re-armed (no talkspurt detection).
pub(crate) struct SequencedWriter {
    stream: Arc<UdpStream>,
    sequencer: Box<dyn rtp::sequence::Sequencer + Send + Sync>,
    payload_type: u8,
    ssrc: u32,
    timestamp: u32,
    samples_per_frame: u32,
    marker: bool,
}

impl SequencedWriter {
    pub(crate) fn new(
        stream: Arc<UdpStream>,
        payload_type: u8,
        clock_rate: u32,
        ptime: u32,
    ) -> Self {
        SequencedWriter {
            stream,
            sequencer: Box::new(rtp::sequence::new_random_sequencer()),
            payload_type,
            ssrc: rand::random::<u32>(),
            timestamp: rand::random::<u32>(),
            samples_per_frame: clock_rate * ptime / 1000,
            marker: true,
        }
    }

    pub(crate) async fn write_payload(&mut self, payload: &[u8]) -> Result<usize> {
        let header = rtp::header::Header {
            version: 2,
            marker: self.marker,
            payload_type: self.payload_type,
            sequence_number: self.sequencer.next_sequence_number(),
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };

        let n = self.stream.write_rtp(&header, payload).await?;

        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);
        self.marker = false;

        Ok(n)
    }
}

enum FrameEncoder {
    ALaw,
    ULaw,
    Opus(opus::Encoder),
}

/// MediaWriter turns mixed PCM16 frames into encoded RTP toward the peer.
/// The codec is picked once from the negotiated payload type; every frame
/// then flows PCM16 → encoder → SequencedWriter → UDP.
pub struct MediaWriter {
    encoder: FrameEncoder,
    writer: SequencedWriter,
    clock_rate: u32,
    scratch: Vec<u8>,
}

impl MediaWriter {
    pub fn new(
        stream: Arc<UdpStream>,
        payload_type: u8,
        clock_rate: u32,
        channels: usize,
        ptime: u32,
    ) -> Result<Self> {
        let encoder = match PayloadFormat::new(payload_type)? {
            PayloadFormat::Pcma => FrameEncoder::ALaw,
            PayloadFormat::Pcmu => FrameEncoder::ULaw,
            PayloadFormat::Opus => FrameEncoder::Opus(opus::Encoder::new(
                clock_rate,
                codec::opus_channels(channels)?,
                opus::Application::Voip,
            )?),
        };

        Ok(MediaWriter {
            encoder,
            writer: SequencedWriter::new(stream, payload_type, clock_rate, ptime),
            clock_rate,
            scratch: vec![0u8; INBOUND_MTU],
        })
    }
}

#[async_trait]
impl PcmWriter for MediaWriter {
    fn sample_rate(&self) -> u32 {
        self.clock_rate
    }

    /// write_sample encodes one PCM16 frame and sends it. Any encode or
    /// send failure is returned to the caller and is fatal for the session.
    async fn write_sample(&mut self, pcm: &[i16]) -> Result<()> {
        let n = match &mut self.encoder {
            FrameEncoder::ALaw => codec::g711::encode_alaw(pcm, &mut self.scratch),
            FrameEncoder::ULaw => codec::g711::encode_ulaw(pcm, &mut self.scratch),
            FrameEncoder::Opus(encoder) => encoder.encode(pcm, &mut self.scratch)?,
        };

        self.writer.write_payload(&self.scratch[..n]).await?;

        Ok(())
    }
}
