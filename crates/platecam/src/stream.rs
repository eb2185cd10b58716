//! Background frame streaming.
//!
//! [`Camera::read`] blocks, so [`FrameStream`] runs the read loop on a tokio
//! blocking thread and hands frames to async code through a bounded buffer.
//! When the consumer falls behind, the oldest buffered frame is evicted to
//! make room, so what arrives is always recent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::{self, Camera, CameraError, Frame};
use crate::error::{Error, Result};

/// A cloneable handle to stop a running [`FrameStream`] and read its counters.
#[derive(Debug, Clone, Default)]
pub struct StreamHandle {
    stop_signal: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

impl StreamHandle {
    /// Create a new stream handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the stream to stop after the current read.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Frames handed to the consumer.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Frames evicted unread because the consumer fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Reads that timed out.
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.counters.timeouts.load(Ordering::Relaxed)
    }
}

/// What a finished stream hands back.
#[derive(Debug)]
pub struct StreamOutcome<C> {
    /// The camera, no longer streaming but still open.
    pub camera: C,
    /// The error that ended the stream, if it did not end by request.
    pub error: Option<CameraError>,
}

#[derive(Debug)]
struct Slots {
    frames: VecDeque<Frame>,
    capacity: usize,
    closed: bool,
    receiver_gone: bool,
}

/// Bounded frame buffer that keeps the newest frames.
#[derive(Debug)]
struct LatestFrames {
    slots: Mutex<Slots>,
    ready: Notify,
}

#[derive(Debug, PartialEq, Eq)]
enum Push {
    Queued,
    Evicted,
    ReceiverGone,
}

impl LatestFrames {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                receiver_gone: false,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, frame: Frame) -> Push {
        let outcome = {
            let mut slots = self.lock();
            if slots.receiver_gone {
                return Push::ReceiverGone;
            }
            let outcome = if slots.frames.len() >= slots.capacity {
                slots.frames.pop_front();
                Push::Evicted
            } else {
                Push::Queued
            };
            slots.frames.push_back(frame);
            outcome
        };
        self.ready.notify_one();
        outcome
    }

    /// No more frames will be pushed.
    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut slots = self.lock();
                if let Some(frame) = slots.frames.pop_front() {
                    return Some(frame);
                }
                if slots.closed {
                    return None;
                }
            }
            // A push between the unlock and here leaves a permit behind.
            self.ready.notified().await;
        }
    }
}

/// Consumer side of [`LatestFrames`]; tells the producer when it goes away.
#[derive(Debug)]
struct FrameReceiver(Arc<LatestFrames>);

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        let mut slots = self.0.lock();
        slots.receiver_gone = true;
        slots.frames.clear();
    }
}

/// Frames read on a background thread.
#[derive(Debug)]
pub struct FrameStream<C> {
    handle: StreamHandle,
    frames: FrameReceiver,
    task: JoinHandle<StreamOutcome<C>>,
}

impl<C: Camera + 'static> FrameStream<C> {
    /// Start streaming from an open camera.
    ///
    /// `timeout` bounds each read; a read that times out is counted and
    /// retried. Any other read error ends the stream. At most `capacity`
    /// frames are buffered. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the camera's error if streaming cannot be started.
    pub fn spawn(mut camera: C, timeout: Duration, capacity: usize) -> camera::Result<Self> {
        if !camera.is_streaming() {
            camera.start_stream()?;
        }
        info!(camera = camera.name(), ?timeout, capacity, "Frame stream starting");

        let buffer = Arc::new(LatestFrames::new(capacity.max(1)));
        let handle = StreamHandle::new();
        let loop_handle = handle.clone();
        let loop_buffer = Arc::clone(&buffer);
        let task = tokio::task::spawn_blocking(move || {
            let outcome = read_loop(camera, &loop_buffer, &loop_handle, timeout);
            loop_buffer.close();
            outcome
        });

        Ok(Self {
            handle,
            frames: FrameReceiver(buffer),
            task,
        })
    }

    /// A handle sharing this stream's stop signal and counters.
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Wait for the oldest buffered frame.
    ///
    /// Returns `None` once the stream has ended and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        let frame = self.frames.0.pop().await?;
        self.handle.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Stop the stream and take the camera back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the read thread panicked.
    pub async fn stop(self) -> Result<StreamOutcome<C>> {
        let Self {
            handle,
            frames,
            task,
        } = self;
        handle.stop();
        drop(frames);

        let outcome = task
            .await
            .map_err(|e| Error::internal(format!("frame stream task failed: {e}")))?;
        info!(
            delivered = handle.delivered(),
            dropped = handle.dropped(),
            timeouts = handle.timeouts(),
            "Frame stream stopped"
        );
        Ok(outcome)
    }
}

fn read_loop<C: Camera>(
    mut camera: C,
    buffer: &LatestFrames,
    handle: &StreamHandle,
    timeout: Duration,
) -> StreamOutcome<C> {
    let counters = &handle.counters;
    let mut error = None;

    while !handle.should_stop() {
        match camera.read(Some(timeout)) {
            Ok(frame) => match buffer.push(frame) {
                Push::Queued => {}
                Push::Evicted => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Push::ReceiverGone => {
                    debug!("Frame consumer went away");
                    break;
                }
            },
            Err(e) if e.is_timeout() => {
                let n = counters.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(timeouts = n, ?timeout, "No frame within timeout");
            }
            Err(e) => {
                error!(error = %e, "Frame stream failed");
                error = Some(e);
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        warn!(error = %e, "Failed to stop camera stream");
    }
    StreamOutcome { camera, error }
}

/// Frame-rate accounting.
///
/// Tracks an overall rate since creation and a windowed rate that resets
/// each time it is read with [`FpsMeter::take_window`].
#[derive(Debug, Clone)]
pub struct FpsMeter {
    started: Instant,
    frames: u64,
    window_started: Instant,
    window_frames: u64,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    /// Start measuring now.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            frames: 0,
            window_started: now,
            window_frames: 0,
        }
    }

    /// Count one frame.
    pub fn tick(&mut self) {
        self.frames += 1;
        self.window_frames += 1;
    }

    /// Frames counted since creation.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Time since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average rate since creation.
    #[must_use]
    pub fn fps(&self) -> f64 {
        rate(self.frames, self.started.elapsed())
    }

    /// Rate since the previous call (or creation), then start a new window.
    pub fn take_window(&mut self) -> f64 {
        let fps = rate(self.window_frames, self.window_started.elapsed());
        self.window_started = Instant::now();
        self.window_frames = 0;
        fps
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}
