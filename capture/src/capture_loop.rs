use chrono::Utc;
use screen_stream_common::buffer::FrameSink;
use screen_stream_common::frame::EncodedFrame;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::codec::{Encoding, FrameCodec};
use crate::session::CaptureSession;
use crate::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

struct CaptureOutput {
    encoding: Encoding,
    sink: Arc<dyn FrameSink>,
}

/// Everything the capture thread owns while running.
struct Worker {
    codec: FrameCodec,
    outputs: Vec<CaptureOutput>,
    interval: Duration,
    next_seq: u64,
}

enum LoopState {
    Idle(Worker),
    Running {
        /// Dropping the sender wakes the worker out of its inter-tick wait.
        stop_tx: Sender<()>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Periodic capture → encode → publish loop on a dedicated thread.
///
/// Each tick takes the session's latest frame, encodes it once per output and
/// publishes the result into that output's sink. The next tick is armed only
/// after the current one finishes; a tick that overruns the interval is
/// followed immediately by the next one instead of a burst of missed ticks.
pub struct CaptureLoop {
    state: LoopState,
}

impl CaptureLoop {
    pub fn new(codec: FrameCodec, interval: Duration) -> Self {
        Self {
            state: LoopState::Idle(Worker {
                codec,
                outputs: Vec::new(),
                interval,
                next_seq: 0,
            }),
        }
    }

    /// Adds a sink fed with frames compressed as `encoding`. Ignored once started.
    pub fn with_output(mut self, encoding: Encoding, sink: Arc<dyn FrameSink>) -> Self {
        if let LoopState::Idle(worker) = &mut self.state {
            worker.outputs.push(CaptureOutput { encoding, sink });
        }
        self
    }

    pub fn status(&self) -> LoopStatus {
        match self.state {
            LoopState::Idle(_) => LoopStatus::Idle,
            LoopState::Running { .. } => LoopStatus::Running,
            LoopState::Stopped => LoopStatus::Stopped,
        }
    }

    pub fn start(&mut self, session: Box<dyn CaptureSession>) -> Result<(), CaptureError> {
        self.start_with(session, |body| {
            std::thread::Builder::new()
                .name("capture-loop".into())
                .spawn(body)
        })
    }

    /// `start` with the thread spawner supplied by the caller. The worker and
    /// session are handed to the thread only once it exists, so a failed spawn
    /// releases the session and leaves the loop idle.
    fn start_with<S>(
        &mut self,
        mut session: Box<dyn CaptureSession>,
        spawn: S,
    ) -> Result<(), CaptureError>
    where
        S: FnOnce(Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let worker = match std::mem::replace(&mut self.state, LoopState::Stopped) {
            LoopState::Idle(worker) => worker,
            other => {
                self.state = other;
                return Err(CaptureError::NotIdle(self.status()));
            }
        };

        let interval_ms = worker.interval.as_millis() as u64;
        let outputs = worker.outputs.len();
        let session_name = session.name().to_string();
        let (stop_tx, stop_rx) = mpsc::channel();
        let (handoff_tx, handoff_rx) = mpsc::channel::<(Worker, Box<dyn CaptureSession>)>();
        let spawned = spawn(Box::new(move || {
            if let Ok((worker, session)) = handoff_rx.recv() {
                worker.run(session, stop_rx);
            }
        }));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                session.release();
                self.state = LoopState::Idle(worker);
                return Err(CaptureError::Spawn(e));
            }
        };
        if let Err(mpsc::SendError((worker, mut session))) = handoff_tx.send((worker, session)) {
            session.release();
            self.state = LoopState::Idle(worker);
            if handle.join().is_err() {
                error!("capture thread panicked before its first tick");
            }
            return Err(CaptureError::Spawn(io::Error::other(
                "capture thread exited before receiving its session",
            )));
        }

        info!(interval_ms, outputs, session = session_name, "capture loop started");
        self.state = LoopState::Running { stop_tx, handle };
        Ok(())
    }

    /// Stops ticking and releases the session. Returns once the capture
    /// thread has exited, so no tick runs after this call. Idempotent.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, LoopState::Stopped) {
            LoopState::Running { stop_tx, handle } => {
                drop(stop_tx);
                if handle.join().is_err() {
                    error!("capture thread panicked outside a tick");
                }
                info!("capture loop stopped");
            }
            LoopState::Idle(_) | LoopState::Stopped => {}
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Worker {
    fn run(mut self, mut session: Box<dyn CaptureSession>, stop_rx: Receiver<()>) {
        let mut deadline = Instant::now();
        loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(session.as_mut())));
            if outcome.is_err() {
                error!(seq = self.next_seq, "capture tick panicked, skipping");
            }

            deadline += self.interval;
            let now = Instant::now();
            if deadline < now {
                debug!(
                    behind_ms = (now - deadline).as_millis() as u64,
                    "capture tick overran its interval"
                );
                deadline = now;
            }

            match stop_rx.recv_timeout(deadline.saturating_duration_since(now)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        session.release();
        info!(
            frames = self.next_seq,
            session = session.name(),
            "capture session released"
        );
    }

    fn tick(&mut self, session: &mut dyn CaptureSession) {
        let raw = match session.acquire_latest_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to acquire frame, skipping tick");
                return;
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let captured_at_ms = Utc::now().timestamp_millis();

        for output in &self.outputs {
            match self.codec.encode(&raw, output.encoding) {
                Ok(payload) => {
                    debug!(
                        seq,
                        sink = output.sink.name(),
                        bytes = payload.bytes().len(),
                        "publishing frame"
                    );
                    output
                        .sink
                        .publish(EncodedFrame::new(payload, captured_at_ms, seq));
                }
                Err(e) => {
                    warn!(error = %e, seq, sink = output.sink.name(), "failed to encode frame, skipping");
                }
            }
        }
        // `raw` is dropped here, handing its image back to the session.
    }
}
