//! Accumulator sink (component C7). Two modes behind one trait:
//! worker-side buffering (appends batches to a local list) and
//! driver-side forwarding (relays each batch to a remote aggregator
//! over a persistent, lazily-opened TCP connection).

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use tracing::{debug, warn};

use bridge_protocol::{read_frame, read_int32, write_frame, write_int32};

use crate::error::{AccumulatorError, AccumulatorResult};

/// One accumulator batch: a list of opaque byte-string updates produced
/// by a worker session.
pub type Batch = Vec<Vec<u8>>;

/// A sink that merges accumulator batches, in one of two modes: local
/// buffering or forwarding to a remote aggregator.
pub trait AccumulatorSink: Send + Sync {
    /// Merge `batch` into `local`. Worker-side sinks mutate `local` in
    /// place; driver-side sinks ignore it (the aggregator holds the
    /// authoritative state) but the signature stays uniform so callers
    /// don't need to know which mode they're talking to.
    fn merge(&self, local: &mut Batch, batch: Batch) -> AccumulatorResult<()>;
}

/// Worker-side mode: no remote aggregator configured. `merge` simply
/// appends the batch to the running local list.
#[derive(Debug, Default)]
pub struct LocalAccumulatorSink;

impl AccumulatorSink for LocalAccumulatorSink {
    fn merge(&self, local: &mut Batch, batch: Batch) -> AccumulatorResult<()> {
        local.extend(batch);
        Ok(())
    }
}

/// Driver-side mode: forwards every batch to a remote aggregator over a
/// TCP connection opened lazily on first use and kept open across
/// calls. All access is serialized by an internal lock.
pub struct RemoteAccumulatorSink {
    host: String,
    port: u16,
    conn: Mutex<Option<TcpStream>>,
}

impl RemoteAccumulatorSink {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            conn: Mutex::new(None),
        }
    }

    fn connect(&self) -> AccumulatorResult<TcpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(AccumulatorError::from)?
            .next()
            .ok_or_else(|| AccumulatorError::Message {
                message: format!("could not resolve aggregator address {}:{}", self.host, self.port),
            })?;
        let stream = TcpStream::connect(addr)?;
        debug!(host = %self.host, port = self.port, "connected to aggregator");
        Ok(stream)
    }
}

impl AccumulatorSink for RemoteAccumulatorSink {
    fn merge(&self, _local: &mut Batch, batch: Batch) -> AccumulatorResult<()> {
        let mut guard = self.conn.lock().expect("aggregator connection lock poisoned");

        let freshly_opened = guard.is_none();
        if freshly_opened {
            *guard = Some(self.connect()?);
        }

        match send_batch_and_wait_ack(guard.as_mut().unwrap(), &batch) {
            Ok(()) => Ok(()),
            // An aggregator protocol violation is fatal and must surface as
            // such, never masked by a reconnect-and-resend: the aggregator
            // saw the batch (or part of it) and the caller needs to know
            // that, not silently risk delivering it twice.
            Err(err @ AccumulatorError::AggregatorProtocolError) => {
                *guard = None;
                Err(err)
            }
            // A transient I/O error on a connection we just opened this
            // call is not "stale" by definition; nothing is gained by
            // retrying inline.
            Err(err) if freshly_opened => {
                *guard = None;
                Err(err)
            }
            // Otherwise the connection was a pre-existing one that may have
            // gone stale between calls: reopen once and retry, surfacing
            // (not swallowing) whatever the fresh attempt reports.
            Err(_) => {
                warn!("aggregator connection appears stale, reopening");
                *guard = None;
                let mut fresh = self.connect()?;
                send_batch_and_wait_ack(&mut fresh, &batch)?;
                *guard = Some(fresh);
                Ok(())
            }
        }
    }
}

fn send_batch_and_wait_ack(stream: &mut TcpStream, batch: &Batch) -> AccumulatorResult<()> {
    write_int32(stream, batch.len() as i32)?;
    for item in batch {
        write_frame(stream, item)?;
    }
    stream.flush()?;

    let mut ack = [0u8; 1];
    match stream.read_exact(&mut ack) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(AccumulatorError::AggregatorProtocolError)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;
    use std::net::TcpListener;

    #[test]
    fn local_sink_appends_batches() {
        let sink = LocalAccumulatorSink;
        let mut local = Vec::new();
        sink.merge(&mut local, vec![b"a".to_vec()]).unwrap();
        sink.merge(&mut local, vec![b"b".to_vec(), b"c".to_vec()]).unwrap();
        assert_eq!(local, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    /// Two sequential merges against a mock aggregator that echoes one
    /// ack byte per batch; both calls must return successfully, having
    /// consumed exactly one ack byte each.
    #[test]
    fn driver_side_ack_per_batch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut total_bytes_in = 0usize;

            for _ in 0..2 {
                let count = read_int32(&mut reader).unwrap();
                total_bytes_in += 4;
                for _ in 0..count {
                    let len = read_int32(&mut reader).unwrap();
                    total_bytes_in += 4;
                    let frame = read_frame(&mut reader, len as u32).unwrap();
                    total_bytes_in += frame.len();
                }
                writer.write_all(&[1u8]).unwrap();
                writer.flush().unwrap();
            }
            total_bytes_in
        });

        let sink = RemoteAccumulatorSink::new("127.0.0.1", addr.port());
        let mut local = Vec::new();

        let batch1 = vec![b"x".to_vec(), b"y".to_vec()];
        sink.merge(&mut local, batch1.clone()).unwrap();

        let batch2: Batch = (0..5).map(|i| format!("item-{i}").into_bytes()).collect();
        sink.merge(&mut local, batch2.clone()).unwrap();

        let total_bytes_in = server.join().unwrap();
        let expected = 4 + batch1.iter().map(|b| 4 + b.len()).sum::<usize>()
            + 4
            + batch2.iter().map(|b| 4 + b.len()).sum::<usize>();
        assert_eq!(total_bytes_in, expected);
        // Worker-side local list is untouched in driver-side mode.
        assert!(local.is_empty());
    }

    /// EOF before the ack byte is a fatal aggregator protocol error: it
    /// must surface immediately from the call that observed it, with no
    /// inline retry against a second connection (the caller, not `merge`,
    /// is responsible for deciding whether to call again).
    #[test]
    fn eof_before_ack_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let count = read_int32(&mut reader).unwrap();
            for _ in 0..count {
                let len = read_int32(&mut reader).unwrap();
                let _ = read_frame(&mut reader, len as u32).unwrap();
            }
            // Drop the stream without sending an ack byte. No second
            // `accept()` here: a correct `merge()` must not attempt a
            // second connection after this fatal error.
        });

        let sink = RemoteAccumulatorSink::new("127.0.0.1", addr.port());
        let mut local = Vec::new();
        let result = sink.merge(&mut local, vec![b"only".to_vec()]);
        server.join().unwrap();
        assert!(matches!(result, Err(AccumulatorError::AggregatorProtocolError)));
    }

    /// After a fatal protocol error the connection is dropped, not
    /// retried inline; the next `merge()` call lazily reopens it.
    #[test]
    fn reconnects_lazily_on_the_next_call_after_a_fatal_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            // First connection: accept, read the batch, then drop without
            // acking (triggers the fatal error on the first `merge`).
            let (stream, _) = listener.accept().unwrap();
            {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let count = read_int32(&mut reader).unwrap();
                for _ in 0..count {
                    let len = read_int32(&mut reader).unwrap();
                    let _ = read_frame(&mut reader, len as u32).unwrap();
                }
            }
            drop(stream);

            // Second connection: the next `merge` call's own lazy reopen.
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let count = read_int32(&mut reader).unwrap();
            for _ in 0..count {
                let len = read_int32(&mut reader).unwrap();
                let _ = read_frame(&mut reader, len as u32).unwrap();
            }
            writer.write_all(&[1u8]).unwrap();
            writer.flush().unwrap();
        });

        let sink = RemoteAccumulatorSink::new("127.0.0.1", addr.port());
        let mut local = Vec::new();

        let first = sink.merge(&mut local, vec![b"only".to_vec()]);
        assert!(matches!(first, Err(AccumulatorError::AggregatorProtocolError)));

        let second = sink.merge(&mut local, vec![b"next".to_vec()]);
        assert!(second.is_ok(), "the second call must open a fresh connection and succeed");

        server.join().unwrap();
    }
}
