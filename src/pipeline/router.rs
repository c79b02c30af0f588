//! Fans track output out to the sinks.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RipConfig;
use crate::event::{StatusEvent, StatusSender};
use crate::session::SessionState;
use crate::sink::TrackSink;
use crate::{RipError, SinkError, Track};

/// One step of track output, produced by the ripper under the shared guard
/// and applied to the sinks after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkOp {
    /// A saved track begins.
    Start(Track),
    /// A track the rules excluded; nothing is written for it.
    Skip(Track),
    /// Bytes of the current track, tags included.
    Data(Vec<u8>),
    /// The current track ends.
    End(Track),
}

struct SinkSlot {
    sink: Box<dyn TrackSink>,
    /// Set after the sink gave up on the current track.
    failed: bool,
}

/// Delivers [`SinkOp`]s to every sink with retry and reports the outcome.
pub(crate) struct TrackRouter {
    slots: Vec<SinkSlot>,
    status: StatusSender,
    retry_attempts: u32,
    retry_delay: Duration,
    stop_on_file_error: bool,
    session: Arc<SessionState>,
}

impl TrackRouter {
    pub fn new(
        sinks: Vec<Box<dyn TrackSink>>,
        config: &RipConfig,
        status: StatusSender,
        session: Arc<SessionState>,
    ) -> Self {
        Self {
            slots: sinks
                .into_iter()
                .map(|sink| SinkSlot {
                    sink,
                    failed: false,
                })
                .collect(),
            status,
            retry_attempts: config.sink_retry_attempts.max(1),
            retry_delay: config.sink_retry_delay(),
            stop_on_file_error: config.stop_on_file_error,
            session,
        }
    }

    /// Applies `ops` in order.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Sink`] when a sink gave up and file errors are
    /// configured to stop the session.
    pub fn apply(&mut self, ops: Vec<SinkOp>) -> Result<(), RipError> {
        for op in ops {
            self.apply_one(op)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, op: SinkOp) -> Result<(), RipError> {
        match op {
            SinkOp::Start(track) => {
                for slot in &mut self.slots {
                    slot.failed = false;
                }
                tracing::info!(number = track.number, name = %track.file_stem(), partial = track.partial, "track started");
                self.each_sink(self.retry_attempts, |sink| sink.start_track(&track))?;
                self.status.emit(StatusEvent::TrackStarted { track });
            }
            SinkOp::Skip(track) => {
                tracing::info!(name = %track.file_stem(), "track skipped by rules");
                self.status.emit(StatusEvent::TrackSkipped { track });
            }
            SinkOp::Data(bytes) => {
                // A failed write may have been partial; repeating it could
                // duplicate bytes.
                self.each_sink(1, |sink| sink.write(&bytes))?;
            }
            SinkOp::End(track) => {
                let paths = self.each_sink(self.retry_attempts, |sink| sink.end_track(&track))?;
                let path: Option<PathBuf> = paths.into_iter().flatten().next();
                self.session.tracks_completed.fetch_add(1, Ordering::SeqCst);
                tracing::info!(number = track.number, path = ?path, "track finished");
                self.status.emit(StatusEvent::TrackFinished { track, path });
            }
        }
        Ok(())
    }

    /// Runs `op`, up to `attempts` times, on every sink that hasn't given up
    /// on the current track.
    fn each_sink<T>(
        &mut self,
        attempts: u32,
        mut op: impl FnMut(&mut dyn TrackSink) -> Result<T, SinkError>,
    ) -> Result<Vec<T>, RipError> {
        let mut results = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter_mut().filter(|slot| !slot.failed) {
            match with_retry(slot.sink.as_mut(), attempts, self.retry_delay, &mut op) {
                Ok(value) => results.push(value),
                Err(e) => {
                    slot.failed = true;
                    tracing::warn!(sink = slot.sink.name(), error = %e, "sink gave up on track");
                    self.status.emit(StatusEvent::Error {
                        message: format!("sink {}: {e}", slot.sink.name()),
                        recoverable: !self.stop_on_file_error,
                    });
                    if self.stop_on_file_error {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(results)
    }
}

/// Retries `op` with exponential backoff.
fn with_retry<T>(
    sink: &mut dyn TrackSink,
    attempts: u32,
    delay: Duration,
    op: &mut impl FnMut(&mut dyn TrackSink) -> Result<T, SinkError>,
) -> Result<T, SinkError> {
    let mut delay = delay;
    let mut attempt = 1;
    loop {
        match op(&mut *sink) {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::debug!(sink = sink.name(), attempt, error = %e, "sink operation failed, retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
        }
    }
}
