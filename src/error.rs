use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// ErrSessionNotFound indicates a lookup with an unknown session id.
    /// Returned by ack, bind and disconnect.
    #[error("session not found")]
    ErrSessionNotFound,

    /// ErrSessionAlreadyBound indicates a second bind on the same session.
    #[error("session already bound")]
    ErrSessionAlreadyBound,

    /// ErrSessionNotBound indicates an operation that requires a bound media
    /// pipeline was attempted on a nascent session.
    #[error("session not bound")]
    ErrSessionNotBound,

    /// ErrUnsupportedPayloadType indicates a payload type outside
    /// 0 (PCMU), 8 (PCMA) and the 96..=127 dynamic range.
    #[error("unsupported payload type")]
    ErrUnsupportedPayloadType,

    /// ErrUnsupportedChannelCount indicates a channel count the Opus codec
    /// cannot represent (only mono and stereo are accepted).
    #[error("unsupported channel count")]
    ErrUnsupportedChannelCount,

    /// ErrStreamClosed indicates end of stream: the UDP stream was closed,
    /// its inbound queue drained, or a remote-address gate was torn down
    /// before an address was learned.
    #[error("stream closed")]
    ErrStreamClosed,

    /// ErrTrackNotPublished indicates start_write was called before the
    /// track was bound to a room sink by publish_track.
    #[error("track not published")]
    ErrTrackNotPublished,

    /// ErrTrackAlreadyBound indicates a second publish bound the same track.
    #[error("track already bound")]
    ErrTrackAlreadyBound,

    /// ErrStartWriteAlreadyCalled indicates the outbound sample pump was
    /// already started for this track.
    #[error("start_write has already been called")]
    ErrStartWriteAlreadyCalled,

    #[error("IoError: {0}")]
    ErrIoError(#[from] std::io::Error),

    #[error("UtilError: {0}")]
    ErrUtilError(#[from] util::error::Error),

    #[error("RtcpError: {0}")]
    ErrRtcpError(#[from] rtcp::error::Error),

    #[error("RtpError: {0}")]
    ErrRtpError(#[from] rtp::error::Error),

    #[error("OpusError: {0}")]
    ErrOpusError(#[from] opus::Error),

    #[error("Other errors: {0}")]
    ErrOthers(String),
}
