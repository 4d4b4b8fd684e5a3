
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use media::io::sample_builder::SampleBuilder;
use rtp::codecs::opus::OpusPacket;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use util::Marshal;

use crate::codec::{self, PayloadFormat, OPUS_CLOCK_RATE};
use crate::error::{Error, Result};
use crate::mixer::{Mixer, DEFAULT_INPUT_BUFFER_FRAMES, DEF_FRAME_DUR};
use crate::provider::RtpSampleProvider;
use crate::room::{
    ConnectOptions, OnTrackSubscribedHdlrFn, ParticipantKind, RemoteParticipant, RemoteTrack,
    RemoteTrackPublication, RoomCallbacks, RoomClient, TrackPublicationOptions,
};
use crate::session::Session;
use crate::stream::UdpStream;
use crate::track::{LocalAudioTrack, OnTrackRtcpHdlrFn, SampleProvider};
use crate::util::{unix_millis, unix_nanos};
use crate::writer::MediaWriter;

/// How many packets the jitter stage buffers before giving up on a gap.
const JITTER_MAX_LATE: u16 = 32;

/// BridgeConfig carries the conference-server credentials and URL.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Manager is the keyed registry of sessions. Connect, bind and disconnect
/// serialize on the write lock; ack and the subscribe callback only take the
/// read lock, so a session removed by disconnect is observed as not found.
pub struct Manager {
    config: BridgeConfig,
    client: Arc<dyn RoomClient + Send + Sync>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Manager {
    pub fn new(config: BridgeConfig, client: Arc<dyn RoomClient + Send + Sync>) -> Arc<Self> {
        Arc::new(Manager {
            config,
            client,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// connect_to_room joins the configured server's room as a SIP
    /// participant and registers a nascent session, returning its id.
    pub async fn connect_to_room(
        self: &Arc<Self>,
        room_name: &str,
        user: &str,
        identity: &str,
    ) -> Result<String> {
        let mut sessions = self.sessions.write().await;

        let timestamp = unix_nanos();
        let sid = format!("{room_name}-{identity}-{timestamp}");

        if sessions.contains_key(&sid) {
            log::info!("already connected to room: {room_name} ({user}:{identity})");
            return Ok(sid);
        }

        let started_at = Instant::now();
        log::info!("{sid}: started connecting to room: {room_name} (identity: {identity})");

        let callbacks = RoomCallbacks {
            on_track_subscribed: Some(self.subscribe_track(sid.clone(), identity.to_owned())),
        };

        let room = self
            .client
            .connect(
                &self.config.url,
                ConnectOptions {
                    api_key: self.config.api_key.clone(),
                    api_secret: self.config.api_secret.clone(),
                    room_name: room_name.to_owned(),
                    participant_name: user.to_owned(),
                    participant_identity: format!("{identity}-{timestamp}"),
                    participant_kind: ParticipantKind::Sip,
                },
                callbacks,
            )
            .await?;

        sessions.insert(sid.clone(), Arc::new(Session::new(room)));

        log::info!(
            "{sid}: finished connecting to room: {room_name} as user: {user} (identity: {identity}) in {:?}",
            started_at.elapsed()
        );

        Ok(sid)
    }

    /// bind_rtp_to_room assembles the media pipeline of a nascent session
    /// over the two sockets the signaling layer opened for the call.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind_rtp_to_room(
        &self,
        conn_rtp: Arc<UdpSocket>,
        conn_rtcp: Arc<UdpSocket>,
        sid: &str,
        identity: &str,
        payload_type: u8,
        clock_rate: u32,
        channels: usize,
        ptime: u32,
    ) -> Result<()> {
        log::info!(
            "bind {sid}: started binding to session (identity: {identity}) \
             payload:{payload_type}, clock_rate:{clock_rate}, channels:{channels}, ptime:{ptime}"
        );

        // Fail before any pipeline is spawned so the session stays nascent.
        PayloadFormat::new(payload_type)?;

        let sessions = self.sessions.write().await;

        let session = sessions.get(sid).ok_or(Error::ErrSessionNotFound)?;

        let started_at = Instant::now();

        let stream = UdpStream::new(conn_rtp, Arc::clone(&conn_rtcp));

        let bound = self
            .build_session_media(
                session,
                Arc::clone(&stream),
                Arc::clone(&conn_rtcp),
                payload_type,
                clock_rate,
                channels,
                ptime,
            )
            .await;

        if let Err(err) = bound {
            stream.close();
            log::warn!("bind {sid}: failed (identity: {identity}): {err}");
            return Err(err);
        }

        log::info!(
            "bind {sid}: finished (identity: {identity}) in {:?}",
            started_at.elapsed()
        );

        Ok(())
    }

    async fn build_session_media(
        &self,
        session: &Arc<Session>,
        stream: Arc<UdpStream>,
        conn_rtcp: Arc<UdpSocket>,
        payload_type: u8,
        clock_rate: u32,
        channels: usize,
        ptime: u32,
    ) -> Result<()> {
        let media_writer = MediaWriter::new(
            Arc::clone(&stream),
            payload_type,
            clock_rate,
            channels,
            ptime,
        )?;

        let provider = RtpSampleProvider::new(Arc::clone(&stream), payload_type, clock_rate, channels)?;
        let provider: Arc<Mutex<dyn SampleProvider + Send>> = Arc::new(Mutex::new(provider));

        let track = Arc::new(LocalAudioTrack::new(Some(rtcp_forward_handler(
            Arc::clone(&stream),
            conn_rtcp.clone(),
        ))));

        let mixer = Mixer::new(
            Box::new(media_writer),
            DEF_FRAME_DUR,
            session.stats(),
            channels,
            DEFAULT_INPUT_BUFFER_FRAMES,
        );

        session
            .set_params(channels, mixer, track, provider, stream, conn_rtcp)
            .await
    }

    /// ack publishes the session's track into the room and starts the
    /// outbound sample pump. The session must be bound.
    pub async fn ack(&self, sid: &str, identity: &str) -> Result<()> {
        let session = { self.sessions.read().await.get(sid).cloned() };

        let Some(session) = session else {
            log::warn!("ack: session not found: {sid} (identity: {identity})");
            return Err(Error::ErrSessionNotFound);
        };

        let started_at = Instant::now();

        let media = session.media().await;
        let (track, provider) = match (media.track, media.provider) {
            (Some(track), Some(provider)) => (track, provider),
            _ => {
                log::warn!("ack: session not bound yet: {sid} (identity: {identity})");
                return Err(Error::ErrSessionNotBound);
            }
        };

        session
            .room()
            .local_participant()
            .publish_track(
                Arc::clone(&track),
                TrackPublicationOptions {
                    name: format!("{identity}-{}", unix_millis()),
                    stream: track.stream_id().to_owned(),
                },
            )
            .await
            .map_err(|err| {
                Error::ErrOthers(format!(
                    "failed to publish track (sid: {sid}, identity: {identity}): {err}"
                ))
            })?;

        log::info!("{sid}: started ack (identity: {identity})");

        track.start_write(provider).await.map_err(|err| {
            Error::ErrOthers(format!(
                "start write to track failed (sid: {sid}, identity: {identity}): {err}"
            ))
        })?;

        log::info!(
            "{sid}: finished ack (identity: {identity}) in {:?}",
            started_at.elapsed()
        );

        Ok(())
    }

    /// disconnect_from_room tears the session down and removes it. The
    /// teardown order matters: stop the producer side first (UDP stream),
    /// then the mixer, then the track, then the room.
    pub async fn disconnect_from_room(&self, sid: &str) -> Result<()> {
        if sid.is_empty() {
            return Ok(());
        }

        let mut sessions = self.sessions.write().await;

        let session = sessions.remove(sid).ok_or(Error::ErrSessionNotFound)?;

        let media = session.media().await;

        if let Some(stream) = media.stream {
            stream.close();
        }

        if let Some(mixer) = media.mixer {
            mixer.stop().await;
        }

        if let Some(track) = media.track {
            if let Err(err) = track.close().await {
                log::warn!("disconnect: failed to close track {}: {err}", track.id());
            }
        }

        if let Err(err) = session.room().disconnect().await {
            log::warn!("disconnect: failed to disconnect room for {sid}: {err}");
        }

        Ok(())
    }

    /// subscribe_track builds the on-track-subscribed handler for one
    /// session: each remote audio track gets a jitter buffer, an Opus
    /// decoder and a mixer input for as long as it lives.
    fn subscribe_track(self: &Arc<Self>, sid: String, identity: String) -> OnTrackSubscribedHdlrFn {
        let manager = Arc::downgrade(self);

        Box::new(move |track, publication, participant| {
            let manager = manager.clone();
            let sid = sid.clone();
            let identity = identity.clone();

            Box::pin(async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };

                manager
                    .handle_subscribed_track(track, publication, participant, sid, identity)
                    .await;
            })
        })
    }

    async fn handle_subscribed_track(
        &self,
        track: Arc<dyn RemoteTrack + Send + Sync>,
        _publication: RemoteTrackPublication,
        participant: RemoteParticipant,
        sid: String,
        identity: String,
    ) {
        let track_id = track.id();

        log::info!(
            "{sid}: started on_track_subscribed: {track_id} (identity: {} ?== {identity})",
            participant.identity
        );

        let session = { self.sessions.read().await.get(&sid).cloned() };

        let Some(session) = session else {
            log::warn!("on_track_subscribed: session {sid} not found: {track_id}");
            return;
        };

        // Bind may not have run yet; this callback only proceeds on a ready
        // pipeline and otherwise drops the track.
        let media = session.media().await;

        let Some(mixer) = media.mixer else {
            log::warn!("on_track_subscribed: mixer in session {sid} not ready: {track_id}");
            return;
        };

        if media.conn_rtcp.is_none() {
            log::warn!("on_track_subscribed: rtcp conn in session {sid} not ready: {track_id}");
            return;
        }

        if media.stream.is_none() {
            log::warn!("on_track_subscribed: udp stream in session {sid} not ready: {track_id}");
            return;
        }

        let input = mixer.new_input().await;

        let channels = media.channels;
        let opus_channels = match codec::opus_channels(channels) {
            Ok(ch) => ch,
            Err(err) => {
                log::warn!("on_track_subscribed: bad channel count in session {sid}: {err}");
                input.close();
                mixer.remove_input(&input).await;
                return;
            }
        };

        let mut decoder = match opus::Decoder::new(mixer.sample_rate(), opus_channels) {
            Ok(decoder) => decoder,
            Err(err) => {
                log::warn!("on_track_subscribed: failed to create decoder in session {sid}: {err}");
                input.close();
                mixer.remove_input(&input).await;
                return;
            }
        };

        let mut jitter = SampleBuilder::new(JITTER_MAX_LATE, OpusPacket, OPUS_CLOCK_RATE);

        // 120 ms, the longest frame Opus can produce.
        let mut pcm = vec![0i16; (mixer.sample_rate() as usize * 120 / 1000) * channels];

        'recv: loop {
            let pkt = match track.read_rtp().await {
                Ok(pkt) => pkt,
                Err(Error::ErrStreamClosed) => break 'recv,
                Err(err) => {
                    log::warn!("on_track_subscribed: session {sid} read_rtp failed: {err}");
                    break 'recv;
                }
            };

            jitter.push(pkt);

            while let Some(sample) = jitter.pop() {
                let decoded = match decoder.decode(&sample.data, &mut pcm, false) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        log::warn!("on_track_subscribed: session {sid} opus decode failed: {err}");
                        break 'recv;
                    }
                };

                if input.write(&pcm[..decoded * channels]).await.is_err() {
                    break 'recv;
                }
            }
        }

        input.close();
        mixer.remove_input(&input).await;

        log::info!(
            "{sid}: finished on_track_subscribed: {track_id} (identity: {} ?== {identity})",
            participant.identity
        );
    }
}

/// rtcp_forward_handler forwards each RTCP packet the room emits for the
/// published track to the peer's learned RTCP address. Failures after the
/// stream closed are silent; anything else is logged and skipped.
fn rtcp_forward_handler(stream: Arc<UdpStream>, conn_rtcp: Arc<UdpSocket>) -> OnTrackRtcpHdlrFn {
    Box::new(move |packet| {
        let stream = Arc::clone(&stream);
        let conn_rtcp = Arc::clone(&conn_rtcp);

        Box::pin(async move {
            let data = match packet.marshal() {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("track rtcp handler: failed to marshal rtcp packet from room: {err}");
                    return;
                }
            };

            let r_addr = match stream.get_remote_addr_rtcp().await {
                Ok(addr) => addr,
                // Stream closed before (or after) the peer showed up.
                Err(_) => return,
            };

            if let Err(err) = conn_rtcp.send_to(&data, r_addr).await {
                if stream.is_closed() {
                    return;
                }

                log::warn!("track rtcp handler: failed to write rtcp packet to peer: {err}");
            }
        })
    })
}
