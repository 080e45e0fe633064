//! A service that pulls frames from its connected input and delivers them
//! to a sink (spec §3.5, §4.9).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::Result;
use crate::frame::Frame;
use crate::producer::Producer;
use crate::properties::Properties;
use crate::service::Service;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

impl From<u8> for RunState {
    fn from(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

/// Consumer is a pull driver: `connect` sets the input, `start` runs the
/// loop (synchronously or on a producer/render thread pair), `stop` halts
/// it. `render` is the sink-specific step (encode to disk, blit to screen,
/// ...).
pub trait Consumer: Service {
    fn properties(&self) -> &Properties;
    fn properties_mut(&mut self) -> &mut Properties;

    /// May only be called while stopped (spec §4.9).
    fn connect(&mut self, input: Arc<Mutex<dyn Producer>>);

    fn is_stopped(&self) -> bool;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);

    /// Number of frames silently dropped in real-time mode.
    fn dropped(&self) -> u64 {
        0
    }

    /// Sink-specific per-frame work (encode, draw, ...). Image/audio reads
    /// happen here.
    fn render(&mut self, frame: &mut Frame) -> Result<()>;
}

/// Shared state machine + pull loop used by every concrete consumer. A
/// concrete consumer embeds one of these and delegates `connect`/`start`/
/// `stop`/`is_stopped` to it.
pub struct PullDriver {
    input: Mutex<Option<Arc<Mutex<dyn Producer>>>>,
    state: AtomicU8,
    dropped: AtomicU64,
    /// `0` = synchronous, `>0` = real-time with bounded queue and drops
    /// allowed, `<0` = real-time with unbounded catch-up and no drops.
    real_time: i32,
    queue_capacity: usize,
}

impl PullDriver {
    pub fn new(real_time: i32, queue_capacity: usize) -> Self {
        Self {
            input: Mutex::new(None),
            state: AtomicU8::new(0),
            dropped: AtomicU64::new(0),
            real_time,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn connect(&self, input: Arc<Mutex<dyn Producer>>) {
        assert!(self.is_stopped(), "connect() only valid while stopped");
        *self.input.lock() = Some(input);
    }

    pub fn run_state(&self) -> RunState {
        RunState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.run_state(), RunState::Stopped)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Idempotent: only `Running -> Stopping` actually changes anything.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            RunState::Running as u8,
            RunState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn finish(&self) {
        self.state.store(RunState::Stopped as u8, Ordering::Release);
    }

    /// Synchronous mode (spec §4.9): the loop runs at the source's own
    /// speed, calling `render` for each frame until the producer returns
    /// `None` or `stop()` is observed.
    pub fn run_sync(&self, mut render: impl FnMut(&mut Frame) -> Result<()>) -> Result<()> {
        self.state.store(RunState::Running as u8, Ordering::Release);
        tracing::info!("consumer starting (sync)");

        loop {
            if !matches!(self.run_state(), RunState::Running) {
                break;
            }
            let Some(input) = self.input.lock().clone() else { break };
            let index = input.lock().position();
            let frame = input.lock().get_frame(index)?;
            let Some(mut frame) = frame else { break };
            render(&mut frame)?;
            frame.close();
            input.lock().prepare_next();
        }

        tracing::info!("consumer stopped (sync)");
        self.finish();
        Ok(())
    }

    /// Real-time mode: a producer thread fills a bounded queue; the caller
    /// (render thread) drains it at `frame_duration` intervals. When the
    /// queue is empty at a deadline the last frame is repeated once; if
    /// still empty at the next deadline the position is advanced without
    /// rendering and `dropped` increments (spec §4.9). `real_time < 0`
    /// disables dropping and lets the render side block indefinitely
    /// instead (unbounded catch-up).
    pub fn run_real_time(
        &self,
        frame_duration: Duration,
        mut render: impl FnMut(&mut Frame) -> Result<()>,
    ) -> Result<()> {
        self.state.store(RunState::Running as u8, Ordering::Release);
        tracing::info!(real_time = self.real_time, "consumer starting (real-time)");

        let Some(input) = self.input.lock().clone() else {
            self.finish();
            return Ok(());
        };

        let (tx, rx): (Sender<Frame>, Receiver<Frame>) = bounded(self.queue_capacity);
        let stop_flag = Arc::new(AtomicU8::new(0));
        let producer_stop = stop_flag.clone();
        let producer_input = input.clone();

        let producer_thread = std::thread::spawn(move || -> Result<()> {
            loop {
                if producer_stop.load(Ordering::Acquire) != 0 {
                    break;
                }
                let index = producer_input.lock().position();
                let frame = producer_input.lock().get_frame(index)?;
                let Some(frame) = frame else { break };
                producer_input.lock().prepare_next();
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut last_frame: Option<Frame> = None;
        let mut deadline = Instant::now();
        loop {
            if !matches!(self.run_state(), RunState::Running) {
                break;
            }
            deadline += frame_duration;
            let now = Instant::now();
            let wait = deadline.saturating_duration_since(now);

            match rx.recv_timeout(wait) {
                Ok(mut frame) => {
                    render(&mut frame)?;
                    last_frame = Some(frame.clone_frame(false));
                    frame.close();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.real_time < 0 {
                        // Unbounded catch-up: block until the next frame arrives.
                        match rx.recv() {
                            Ok(mut frame) => {
                                render(&mut frame)?;
                                frame.close();
                            }
                            Err(_) => break,
                        }
                    } else if let Some(mut repeat) = last_frame.take() {
                        tracing::warn!("repeating last frame, queue empty");
                        render(&mut repeat)?;
                    } else {
                        tracing::warn!("dropping frame, queue empty");
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        stop_flag.store(1, Ordering::Release);
        let _ = producer_thread.join();
        tracing::info!(dropped = self.dropped(), "consumer stopped (real-time)");
        self.finish();
        Ok(())
    }
}
