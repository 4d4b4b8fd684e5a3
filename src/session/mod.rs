use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::mixer::{Mixer, MixerStats};
use crate::room::Room;
use crate::stream::UdpStream;
use crate::track::{LocalAudioTrack, SampleProvider};

/// SessionMedia is a snapshot of the bound pipeline; every field is None
/// until set_params runs.
#[derive(Clone, Default)]
pub(crate) struct SessionMedia {
    pub(crate) channels: usize,
    pub(crate) mixer: Option<Arc<Mixer>>,
    pub(crate) track: Option<Arc<LocalAudioTrack>>,
    pub(crate) provider: Option<Arc<Mutex<dyn SampleProvider + Send>>>,
    pub(crate) stream: Option<Arc<UdpStream>>,
    pub(crate) conn_rtcp: Option<Arc<UdpSocket>>,
}

/// Session is the state of one bridged call: the room handle from connect,
/// and the media pipeline assembled by bind.
pub struct Session {
    room: Arc<dyn Room + Send + Sync>,
    stats: Arc<MixerStats>,
    media: Mutex<SessionMedia>,
}

impl Session {
    pub(crate) fn new(room: Arc<dyn Room + Send + Sync>) -> Self {
        Session {
            room,
            stats: Arc::new(MixerStats::default()),
            media: Mutex::new(SessionMedia {
                channels: 1,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn room(&self) -> Arc<dyn Room + Send + Sync> {
        Arc::clone(&self.room)
    }

    pub(crate) fn stats(&self) -> Arc<MixerStats> {
        Arc::clone(&self.stats)
    }

    /// set_params binds the media pipeline into the session. One shot: a
    /// session is bound at most once.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn set_params(
        &self,
        channels: usize,
        mixer: Arc<Mixer>,
        track: Arc<LocalAudioTrack>,
        provider: Arc<Mutex<dyn SampleProvider + Send>>,
        stream: Arc<UdpStream>,
        conn_rtcp: Arc<UdpSocket>,
    ) -> Result<()> {
        let mut media = self.media.lock().await;
        if media.stream.is_some() {
            return Err(Error::ErrSessionAlreadyBound);
        }

        media.channels = channels;
        media.mixer = Some(mixer);
        media.track = Some(track);
        media.provider = Some(provider);
        media.stream = Some(stream);
        media.conn_rtcp = Some(conn_rtcp);

        Ok(())
    }

    /// media returns a snapshot of the bound pipeline (clones of the Arcs).
    pub(crate) async fn media(&self) -> SessionMedia {
        self.media.lock().await.clone()
    }
}
