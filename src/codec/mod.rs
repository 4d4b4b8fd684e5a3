
pub mod g711;

use crate::error::{Error, Result};

/// G.711 µ-law, 8 kHz.
pub const PAYLOAD_TYPE_PCMU: u8 = 0;
/// G.711 A-law, 8 kHz.
pub const PAYLOAD_TYPE_PCMA: u8 = 8;
/// First payload type of the dynamic range, negotiated as Opus here.
pub const PAYLOAD_TYPE_DYNAMIC_START: u8 = 96;
/// Last payload type of the dynamic range.
pub const PAYLOAD_TYPE_DYNAMIC_END: u8 = 127;

/// RTP clock rate of Opus audio.
pub const OPUS_CLOCK_RATE: u32 = 48000;

pub const MIME_TYPE_OPUS: &str = "audio/opus";

/// PayloadFormat is the codec selected by the negotiated RTP payload type.
/// Dispatch happens once, at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Pcmu,
    Pcma,
    Opus,
}

impl PayloadFormat {
    /// new maps a 7-bit payload type onto a codec. Anything outside
    /// 0, 8 and the dynamic range fails.
    pub fn new(payload_type: u8) -> Result<Self> {
        match payload_type {
            PAYLOAD_TYPE_PCMU => Ok(PayloadFormat::Pcmu),
            PAYLOAD_TYPE_PCMA => Ok(PayloadFormat::Pcma),
            pt if (PAYLOAD_TYPE_DYNAMIC_START..=PAYLOAD_TYPE_DYNAMIC_END).contains(&pt) => {
                Ok(PayloadFormat::Opus)
            }
            _ => Err(Error::ErrUnsupportedPayloadType),
        }
    }
}

/// opus_channels maps a channel count onto the Opus channel layout.
pub fn opus_channels(channels: usize) -> Result<opus::Channels> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        _ => Err(Error::ErrUnsupportedChannelCount),
    }
}
