//! The conference-server client contract the bridge consumes.
//!
//! The bridge never talks to the room server itself; it drives whatever
//! implementation of these traits it is handed. The surface mirrors the
//! narrow slice of a room SDK an RTP bridge needs: connect with an identity,
//! publish one audio track, get told about remote audio tracks, disconnect.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::track::LocalAudioTrack;

/// ParticipantKind tells the room what sort of endpoint joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipantKind {
    #[default]
    Standard,
    Sip,
}

/// ConnectOptions carries the credentials and identity for one room join.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub api_key: String,
    pub api_secret: String,
    pub room_name: String,
    pub participant_name: String,
    pub participant_identity: String,
    pub participant_kind: ParticipantKind,
}

/// TrackPublicationOptions names a published track within the room.
#[derive(Debug, Clone, Default)]
pub struct TrackPublicationOptions {
    pub name: String,
    pub stream: String,
}

/// RemoteTrackPublication describes a remote participant's published track.
#[derive(Debug, Clone, Default)]
pub struct RemoteTrackPublication {
    pub sid: String,
    pub name: String,
}

/// RemoteParticipant identifies the publisher of a subscribed track.
#[derive(Debug, Clone, Default)]
pub struct RemoteParticipant {
    pub identity: String,
    pub name: String,
}

pub type OnTrackSubscribedHdlrFn = Box<
    dyn (FnMut(
            Arc<dyn RemoteTrack + Send + Sync>,
            RemoteTrackPublication,
            RemoteParticipant,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// RoomCallbacks is registered at connect time; the room implementation
/// invokes the handlers from its own tasks.
#[derive(Default)]
pub struct RoomCallbacks {
    pub on_track_subscribed: Option<OnTrackSubscribedHdlrFn>,
}

/// RemoteTrack is a subscribed remote participant's audio track.
/// read_rtp returns ErrStreamClosed-kinded errors once the track is gone.
#[async_trait]
pub trait RemoteTrack {
    fn id(&self) -> String;
    async fn read_rtp(&self) -> Result<rtp::packet::Packet>;
}

/// LocalParticipant is the publishing capability of the joined participant.
#[async_trait]
pub trait LocalParticipant {
    /// publish_track announces the track to the room and binds the room's
    /// sample sink into it.
    async fn publish_track(
        &self,
        track: Arc<LocalAudioTrack>,
        options: TrackPublicationOptions,
    ) -> Result<()>;
}

/// Room is one joined room.
#[async_trait]
pub trait Room {
    fn local_participant(&self) -> Arc<dyn LocalParticipant + Send + Sync>;
    async fn disconnect(&self) -> Result<()>;
}

/// RoomClient opens rooms against a conference server.
#[async_trait]
pub trait RoomClient {
    async fn connect(
        &self,
        url: &str,
        options: ConnectOptions,
        callbacks: RoomCallbacks,
    ) -> Result<Arc<dyn Room + Send + Sync>>;
}
