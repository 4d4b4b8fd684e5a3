
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

/// Frame cadence of the mixer when the caller has no other preference.
pub const DEF_FRAME_DUR: Duration = Duration::from_millis(20);

/// How many frames of audio a single input may hold before the oldest
/// samples are discarded.
pub const DEFAULT_INPUT_BUFFER_FRAMES: usize = 5;

/// MixerStats is the counters bucket shared between a session and its mixer.
#[derive(Debug, Default)]
pub struct MixerStats {
    pub frames_mixed: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub inputs_added: AtomicUsize,
    pub inputs_removed: AtomicUsize,
}

/// PcmWriter is the mixer's sink: one PCM16 frame per tick.
#[async_trait]
pub trait PcmWriter {
    fn sample_rate(&self) -> u32;
    async fn write_sample(&mut self, pcm: &[i16]) -> Result<()>;
}

/// MixerInput buffers one source's PCM16 until the mixer's next tick.
/// Bounded; overflow drops the oldest samples first.
pub struct MixerInput {
    id: u64,
    queue: Mutex<VecDeque<i16>>,
    max_samples: usize,
    closed: AtomicBool,
    stats: Arc<MixerStats>,
}

impl MixerInput {
    /// write appends decoded samples for the next ticks. Returns
    /// ErrStreamClosed once the input has been closed.
    pub async fn write(&self, pcm: &[i16]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrStreamClosed);
        }

        let mut queue = self.queue.lock().await;
        queue.extend(pcm.iter().copied());

        let excess = queue.len().saturating_sub(self.max_samples);
        if excess > 0 {
            queue.drain(..excess);
            self.stats
                .samples_dropped
                .fetch_add(excess as u64, Ordering::Relaxed);
        }

        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Mixer sums any number of PCM16 inputs into a single stream and hands one
/// frame per tick to its writer. It runs its own timing loop from
/// construction until stop.
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    frame_size: usize,
    max_input_samples: usize,

    inputs: Arc<Mutex<Vec<Arc<MixerInput>>>>,
    next_input_id: AtomicU64,
    stats: Arc<MixerStats>,

    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Mixer {
    pub fn new(
        mut writer: Box<dyn PcmWriter + Send>,
        frame_dur: Duration,
        stats: Arc<MixerStats>,
        channels: usize,
        input_buffer_frames: usize,
    ) -> Arc<Self> {
        let sample_rate = writer.sample_rate();
        let frame_size = (sample_rate as usize * frame_dur.as_millis() as usize / 1000) * channels;
        let max_input_samples = frame_size * input_buffer_frames;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inputs: Arc<Mutex<Vec<Arc<MixerInput>>>> = Arc::new(Mutex::new(Vec::new()));

        let task_inputs = Arc::clone(&inputs);
        let task_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_dur);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut frame = vec![0i16; frame_size];

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {}
                }

                frame.fill(0);

                {
                    let inputs = task_inputs.lock().await;
                    for input in inputs.iter() {
                        let mut queue = input.queue.lock().await;
                        for slot in frame.iter_mut() {
                            let Some(s) = queue.pop_front() else { break };
                            *slot = slot.saturating_add(s);
                        }
                    }
                }

                if let Err(err) = writer.write_sample(&frame).await {
                    log::error!("mixer: writer failed, stopping: {err}");
                    return;
                }

                task_stats.frames_mixed.fetch_add(1, Ordering::Relaxed);
            }
        });

        Arc::new(Mixer {
            sample_rate,
            channels,
            frame_size,
            max_input_samples,
            inputs,
            next_input_id: AtomicU64::new(0),
            stats,
            stopped: AtomicBool::new(false),
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// new_input registers a fresh source with the mixer.
    pub async fn new_input(&self) -> Arc<MixerInput> {
        let input = Arc::new(MixerInput {
            id: self.next_input_id.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(VecDeque::new()),
            max_samples: self.max_input_samples,
            closed: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        });

        self.inputs.lock().await.push(Arc::clone(&input));
        self.stats.inputs_added.fetch_add(1, Ordering::Relaxed);

        input
    }

    /// remove_input detaches a source; pending samples are discarded.
    pub async fn remove_input(&self, input: &Arc<MixerInput>) {
        let mut inputs = self.inputs.lock().await;
        let before = inputs.len();
        inputs.retain(|i| i.id != input.id);
        if inputs.len() != before {
            self.stats.inputs_removed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// stop halts the timing loop. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}
