
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use media::Sample;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::codec::MIME_TYPE_OPUS;
use crate::error::{Error, Result};
use crate::util::math_rand_alpha;

/// SampleProvider is the source side of a published track: it blocks until
/// the next encoded sample is available and returns ErrStreamClosed at end
/// of stream. The bind hooks default to no-ops.
#[async_trait]
pub trait SampleProvider {
    async fn next_sample(&mut self) -> Result<Sample>;

    async fn on_bind(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_unbind(&mut self) -> Result<()> {
        Ok(())
    }
}

/// SampleSink is where a published track's samples go: the room
/// implementation binds one in during publish_track.
#[async_trait]
pub trait SampleSink {
    async fn write_sample(&self, sample: &Sample) -> Result<()>;
}

pub type OnTrackRtcpHdlrFn = Box<
    dyn (Fn(
            Box<dyn rtcp::packet::Packet + Send + Sync>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// LocalAudioTrack is the bridge's outbound room track. The room
/// implementation binds a sample sink at publish time and feeds room RTCP
/// into handle_rtcp; start_write pumps a SampleProvider into the sink until
/// end of stream or close.
pub struct LocalAudioTrack {
    id: String,
    stream_id: String,
    mime_type: String,

    rtcp_handler: Option<OnTrackRtcpHdlrFn>,

    sink: Mutex<Option<Arc<dyn SampleSink + Send + Sync>>>,
    pump: Mutex<Option<JoinHandle<()>>>,

    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl LocalAudioTrack {
    /// new creates an Opus track with generated id and stream id.
    pub fn new(rtcp_handler: Option<OnTrackRtcpHdlrFn>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        LocalAudioTrack {
            id: format!("TR_{}", math_rand_alpha(12)),
            stream_id: math_rand_alpha(16),
            mime_type: MIME_TYPE_OPUS.to_owned(),
            rtcp_handler,
            sink: Mutex::new(None),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// id is the unique identifier of this track.
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// stream_id is the group this track belongs to.
    pub fn stream_id(&self) -> &str {
        self.stream_id.as_str()
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_str()
    }

    /// bind attaches the room's sample sink. Called by the room
    /// implementation while publishing; at most once.
    pub async fn bind(&self, sink: Arc<dyn SampleSink + Send + Sync>) -> Result<()> {
        let mut slot = self.sink.lock().await;
        if slot.is_some() {
            return Err(Error::ErrTrackAlreadyBound);
        }
        *slot = Some(sink);
        Ok(())
    }

    /// handle_rtcp hands one parsed RTCP packet from the room to the
    /// track's handler, if any.
    pub async fn handle_rtcp(&self, packet: Box<dyn rtcp::packet::Packet + Send + Sync>) {
        if let Some(handler) = &self.rtcp_handler {
            handler(packet).await;
        }
    }

    /// start_write spawns the outbound sample pump. It fails before publish
    /// (no sink) and on repeated calls; the pump itself exits silently when
    /// the provider reports end of stream.
    pub async fn start_write(
        &self,
        provider: Arc<Mutex<dyn SampleProvider + Send>>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrStreamClosed);
        }

        let sink = {
            let slot = self.sink.lock().await;
            slot.clone().ok_or(Error::ErrTrackNotPublished)?
        };

        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return Err(Error::ErrStartWriteAlreadyCalled);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            if let Err(err) = provider.lock().await.on_bind().await {
                log::warn!("sample pump: on_bind failed: {err}");
            }

            loop {
                let res = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    res = async { provider.lock().await.next_sample().await } => res,
                };

                match res {
                    Ok(sample) => {
                        if let Err(err) = sink.write_sample(&sample).await {
                            log::error!("sample pump: failed to write sample: {err}");
                            break;
                        }
                    }
                    Err(Error::ErrStreamClosed) => break,
                    Err(err) => {
                        log::error!("sample pump: failed to read sample: {err}");
                        break;
                    }
                }
            }

            if let Err(err) = provider.lock().await.on_unbind().await {
                log::warn!("sample pump: on_unbind failed: {err}");
            }
        });

        *pump = Some(handle);

        Ok(())
    }

    /// close stops the pump and joins it. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(pump) = self.pump.lock().await.take() {
            let _ = pump.await;
        }

        Ok(())
    }
}
