#[cfg(test)]
mod provider_test;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use media::Sample;

use crate::codec::{
    self, PAYLOAD_TYPE_DYNAMIC_END, PAYLOAD_TYPE_DYNAMIC_START, PAYLOAD_TYPE_PCMA,
    PAYLOAD_TYPE_PCMU,
};
use crate::error::{Error, Result};
use crate::stream::UdpStream;
use crate::track::SampleProvider;
use crate::INBOUND_MTU;

/// RtpSampleProvider feeds the published room track from the peer's inbound
/// RTP: G.711 payloads are transcoded to Opus, dynamic payloads are assumed
/// to be Opus already and passed through.
pub struct RtpSampleProvider {
    stream: Arc<UdpStream>,
    header: rtp::header::Header,
    // Scratch reused as both the receive buffer and the Opus encode
    // destination; each sample's data is copied out before the next read.
    payload: Vec<u8>,
    pcm: Vec<i16>,
    payload_type: u8,
    clock_rate: u32,
    encoder: opus::Encoder,
}

impl RtpSampleProvider {
    pub fn new(
        stream: Arc<UdpStream>,
        payload_type: u8,
        clock_rate: u32,
        channels: usize,
    ) -> Result<Self> {
        let encoder = opus::Encoder::new(
            clock_rate,
            codec::opus_channels(channels)?,
            opus::Application::Voip,
        )?;

        Ok(RtpSampleProvider {
            stream,
            header: rtp::header::Header::default(),
            payload: vec![0u8; INBOUND_MTU],
            pcm: vec![0i16; INBOUND_MTU],
            payload_type,
            clock_rate,
            encoder,
        })
    }
}

#[async_trait]
impl SampleProvider for RtpSampleProvider {
    async fn next_sample(&mut self) -> Result<Sample> {
        let n_samples = self
            .stream
            .read_rtp(&mut self.header, &mut self.payload)
            .await?;

        if self.header.payload_type != self.payload_type {
            log::warn!(
                "unexpected payload type: got {}, want {}",
                self.header.payload_type,
                self.payload_type
            );
        }

        let duration =
            Duration::from_nanos(n_samples as u64 * 1_000_000_000 / self.clock_rate as u64);

        match self.header.payload_type {
            PAYLOAD_TYPE_PCMA => {
                codec::g711::decode_alaw(&self.payload[..n_samples], &mut self.pcm);

                let encoded = self.encoder.encode(&self.pcm[..n_samples], &mut self.payload)?;

                Ok(Sample {
                    data: Bytes::copy_from_slice(&self.payload[..encoded]),
                    duration,
                    ..Default::default()
                })
            }

            PAYLOAD_TYPE_PCMU => {
                codec::g711::decode_ulaw(&self.payload[..n_samples], &mut self.pcm);

                let encoded = self.encoder.encode(&self.pcm[..n_samples], &mut self.payload)?;

                Ok(Sample {
                    data: Bytes::copy_from_slice(&self.payload[..encoded]),
                    duration,
                    ..Default::default()
                })
            }

            pt if (PAYLOAD_TYPE_DYNAMIC_START..=PAYLOAD_TYPE_DYNAMIC_END).contains(&pt) => {
                Ok(Sample {
                    data: Bytes::copy_from_slice(&self.payload[..n_samples]),
                    duration,
                    ..Default::default()
                })
            }

            _ => Err(Error::ErrUnsupportedPayloadType),
        }
    }
}
