//! Reader (C4): a lazy, non-restartable, finite iterator over the
//! worker's output frames. Runs entirely on the calling thread (T1).

use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bridge_protocol::{
    read_frame, read_frame_header, read_int32, read_timing, read_utf, FrameHeader, ProtocolError,
    Sentinel,
};

use bridge_accumulator::{AccumulatorSink, Batch};

use crate::error::BridgeError;
use crate::feeder::FeederSlot;
use crate::host::TaskContext;

enum StepOutcome {
    Data(Vec<u8>),
    UserError(String),
    Done,
}

/// Reads the worker's output stream and yields `Result<Vec<u8>,
/// BridgeError>` values, one per emitted data frame, consuming timing,
/// exception, and accumulator control frames transparently.
pub struct Reader<R: Read> {
    inner: BufReader<R>,
    feeder_slot: FeederSlot,
    context: Arc<dyn TaskContext>,
    accumulator_sink: Arc<dyn AccumulatorSink>,
    local_accumulator: Batch,
    finished: bool,
    clean: Arc<AtomicBool>,
}

impl<R: Read> Reader<R> {
    pub fn new(
        inner: R,
        buffer_size: usize,
        feeder_slot: FeederSlot,
        context: Arc<dyn TaskContext>,
        accumulator_sink: Arc<dyn AccumulatorSink>,
    ) -> Self {
        Self {
            inner: BufReader::with_capacity(buffer_size, inner),
            feeder_slot,
            context,
            accumulator_sink,
            local_accumulator: Vec::new(),
            finished: false,
            clean: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag the driver inspects after the iterator is exhausted:
    /// true only if the session reached `EndOfStream` without error.
    pub fn clean_flag(&self) -> Arc<AtomicBool> {
        self.clean.clone()
    }

    /// Accumulator updates collected in worker-side mode (empty when
    /// the sink forwards to a remote aggregator instead).
    pub fn local_accumulator(&self) -> &[Vec<u8>] {
        &self.local_accumulator
    }

    fn take_feeder_failure(&self) -> Option<String> {
        self.feeder_slot
            .lock()
            .expect("feeder slot poisoned")
            .as_ref()
            .map(|f| f.to_string())
    }

    fn step(&mut self) -> Result<StepOutcome, BridgeError> {
        loop {
            match read_frame_header(&mut self.inner)? {
                FrameHeader::Data(n) => return Ok(StepOutcome::Data(read_frame(&mut self.inner, n)?)),
                FrameHeader::Control(Sentinel::TimingData) => {
                    let timing = read_timing(&mut self.inner)?;
                    self.context.record_timing(timing);
                }
                FrameHeader::Control(Sentinel::ExceptionThrown) => {
                    let n = match read_frame_header(&mut self.inner)? {
                        FrameHeader::Data(n) => n,
                        other => {
                            return Err(BridgeError::message(format!(
                                "expected a UTF frame after ExceptionThrown, got {other:?}"
                            )))
                        }
                    };
                    return Ok(StepOutcome::UserError(read_utf(&mut self.inner, n)?));
                }
                FrameHeader::Control(Sentinel::EndOfDataSection) => {
                    let count = read_int32(&mut self.inner)?;
                    let mut batch: Batch = Vec::with_capacity(count.max(0) as usize);
                    for _ in 0..count {
                        match read_frame_header(&mut self.inner)? {
                            FrameHeader::Data(n) => batch.push(read_frame(&mut self.inner, n)?),
                            other => {
                                return Err(BridgeError::message(format!(
                                    "expected a data frame in the accumulator section, got {other:?}"
                                )))
                            }
                        }
                    }
                    self.accumulator_sink.merge(&mut self.local_accumulator, batch)?;

                    let terminal = read_int32(&mut self.inner)?;
                    if Sentinel::from_code(terminal) == Some(Sentinel::EndOfStream) {
                        return Ok(StepOutcome::Done);
                    }
                    return Err(ProtocolError::UnknownSentinel(terminal).into());
                }
                FrameHeader::Control(Sentinel::EndOfStream) => {
                    return Err(BridgeError::message(
                        "end-of-stream sentinel appeared outside the accumulator section",
                    ));
                }
            }
        }
    }

    fn next_internal(&mut self) -> Option<Result<Vec<u8>, BridgeError>> {
        if self.finished {
            return None;
        }

        if let Some(message) = self.take_feeder_failure() {
            self.finished = true;
            return Some(Err(BridgeError::WorkerInputFailure { message }));
        }

        match self.step() {
            Ok(StepOutcome::Data(bytes)) => Some(Ok(bytes)),
            Ok(StepOutcome::Done) => {
                self.finished = true;
                self.clean.store(true, Ordering::SeqCst);
                None
            }
            Ok(StepOutcome::UserError(message)) => {
                self.finished = true;
                let cause = self.take_feeder_failure().map(|m| {
                    Box::new(BridgeError::WorkerInputFailure { message: m })
                });
                Some(Err(BridgeError::UserError { message, cause }))
            }
            Err(BridgeError::Protocol(inner)) if is_io_rooted(&inner) => {
                self.finished = true;
                if let Some(message) = self.take_feeder_failure() {
                    return Some(Err(BridgeError::WorkerInputFailure { message }));
                }
                if self.context.is_cancelled() {
                    Some(Err(BridgeError::TaskCancelled))
                } else if self.context.is_host_shutting_down() {
                    None
                } else {
                    Some(Err(BridgeError::WorkerCrashed))
                }
            }
            Err(other) => {
                self.finished = true;
                Some(Err(other))
            }
        }
    }
}

fn is_io_rooted(err: &ProtocolError) -> bool {
    matches!(err, ProtocolError::UnexpectedEof { .. } | ProtocolError::Io { .. })
}

impl<R: Read> Iterator for Reader<R> {
    type Item = Result<Vec<u8>, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_internal()
    }
}
