//! Feeder (C3): writes the task header then the upstream record stream
//! into the worker's input, then the terminal sentinels. Runs on a
//! dedicated background thread and must never let an error escape that
//! thread — failures are recorded in a shared slot and the socket's
//! write half is half-closed so the reader observes EOF.

use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bridge_protocol::{write_frame, write_sentinel, write_task_header, write_utf, Sentinel, TaskHeader};

use crate::host::MemoryManagers;

/// One upstream input record. The feeder peeks the first element of a
/// stream to pick an encoding and enforces that every later element
/// matches it.
#[derive(Debug, Clone)]
pub enum Record {
    Bytes(Vec<u8>),
    Utf8(String),
    BytesPair(Vec<u8>, Vec<u8>),
    Utf8Pair(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Bytes,
    Utf8,
    BytesPair,
    Utf8Pair,
}

impl Record {
    fn kind(&self) -> RecordKind {
        match self {
            Record::Bytes(_) => RecordKind::Bytes,
            Record::Utf8(_) => RecordKind::Utf8,
            Record::BytesPair(..) => RecordKind::BytesPair,
            Record::Utf8Pair(..) => RecordKind::Utf8Pair,
        }
    }
}

/// A feeder failure, recorded in the shared slot rather than thrown.
#[derive(Debug, thiserror::Error)]
pub enum FeederFailure {
    #[error("{0}")]
    Protocol(#[from] bridge_protocol::ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected element type: stream began with {first:?}, saw {other:?} partway through")]
    UnexpectedElementType { first: String, other: String },
}

/// Shared slot the reader checks before every read. `None` means the
/// feeder has not (yet) failed.
pub type FeederSlot = Arc<Mutex<Option<FeederFailure>>>;

pub fn new_feeder_slot() -> FeederSlot {
    Arc::new(Mutex::new(None))
}

/// Everything the feeder needs to write the task header, ahead of the
/// record stream.
#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub partition_index: i32,
    pub working_dir: String,
    pub include_paths: Vec<String>,
    pub broadcast_delta: Vec<bridge_protocol::DeltaEntry>,
    pub command_blob: Vec<u8>,
    pub buffer_size: usize,
}

/// Spawn the feeder on a background thread. Returns a handle the driver
/// joins during teardown; never panics the caller's thread regardless
/// of what goes wrong inside.
///
/// The feeder has no cancellation flag of its own: it notices a task
/// stopping early the same way it notices the worker going away, by
/// getting an I/O error back from a write. Teardown drives this by
/// shutting down the write half of the socket (`Worker::shutdown_write`)
/// before joining this handle, which is what actually bounds the join.
pub fn spawn_feeder(
    mut writer: TcpStream,
    config: FeederConfig,
    records: Vec<Record>,
    slot: FeederSlot,
    memory: Arc<dyn MemoryManagers>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let result = feed(&mut writer, &config, records);
        if let Err(err) = result {
            *slot.lock().expect("feeder slot poisoned") = Some(err);
        }

        memory.release_shuffle_memory_for_current_thread();
        memory.release_unroll_memory_for_current_thread();

        // Half-close so the worker (and therefore the reader) observes
        // EOF instead of hanging on a half-written session.
        let _ = writer.shutdown(Shutdown::Write);
    })
}

fn feed(
    writer: &mut TcpStream,
    config: &FeederConfig,
    records: Vec<Record>,
) -> Result<(), FeederFailure> {
    let mut out = BufWriter::with_capacity(config.buffer_size, writer);

    let header = TaskHeader {
        partition_index: config.partition_index,
        working_dir: config.working_dir.clone(),
        include_paths: config.include_paths.clone(),
        broadcast_delta: config.broadcast_delta.clone(),
        command_blob: config.command_blob.clone(),
    };
    write_task_header(&mut out, &header)?;

    let first_kind = records.first().map(Record::kind);
    for record in &records {
        if let Some(kind) = first_kind {
            if record.kind() != kind {
                return Err(FeederFailure::UnexpectedElementType {
                    first: format!("{kind:?}"),
                    other: format!("{:?}", record.kind()),
                });
            }
        }
        match record {
            Record::Bytes(b) => write_frame(&mut out, b)?,
            Record::Utf8(s) => write_utf(&mut out, s)?,
            Record::BytesPair(k, v) => {
                write_frame(&mut out, k)?;
                write_frame(&mut out, v)?;
            }
            Record::Utf8Pair(k, v) => {
                write_utf(&mut out, k)?;
                write_utf(&mut out, v)?;
            }
        }
    }

    write_sentinel(&mut out, Sentinel::EndOfDataSection)?;
    write_sentinel(&mut out, Sentinel::EndOfStream)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{read_frame_header, read_task_header, FrameHeader};
    use std::io::BufReader;
    use std::net::TcpListener;

    struct NoopMemory;
    impl MemoryManagers for NoopMemory {
        fn release_shuffle_memory_for_current_thread(&self) {}
        fn release_unroll_memory_for_current_thread(&self) {}
    }

    fn base_config() -> FeederConfig {
        FeederConfig {
            partition_index: 3,
            working_dir: "/tmp/work".to_string(),
            include_paths: vec![],
            broadcast_delta: vec![],
            command_blob: vec![0xAA],
            buffer_size: 65536,
        }
    }

    #[test]
    fn writes_header_then_records_then_terminal_sentinels() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let slot = new_feeder_slot();
        let records = vec![Record::Bytes(b"hi".to_vec()), Record::Bytes(b"there".to_vec())];
        let handle = spawn_feeder(client, base_config(), records, slot.clone(), Arc::new(NoopMemory));

        let mut reader = BufReader::new(server);
        let header = read_task_header(&mut reader).unwrap();
        assert_eq!(header.partition_index, 3);
        assert_eq!(header.command_blob, vec![0xAA]);

        let mut seen = Vec::new();
        loop {
            match read_frame_header(&mut reader).unwrap() {
                FrameHeader::Data(n) => seen.push(bridge_protocol::read_frame(&mut reader, n).unwrap()),
                FrameHeader::Control(bridge_protocol::Sentinel::EndOfDataSection) => break,
                other => panic!("unexpected control frame {other:?}"),
            }
        }
        assert_eq!(seen, vec![b"hi".to_vec(), b"there".to_vec()]);

        match read_frame_header(&mut reader).unwrap() {
            FrameHeader::Control(bridge_protocol::Sentinel::EndOfStream) => {}
            other => panic!("expected end of stream, got {other:?}"),
        }

        handle.join().unwrap();
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn mixed_element_types_record_a_failure_without_panicking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        // Drain whatever the feeder manages to write so it doesn't block.
        let drain = std::thread::spawn(move || {
            let mut reader = BufReader::new(server);
            let _ = read_task_header(&mut reader);
            let mut buf = Vec::new();
            let _ = std::io::Read::read_to_end(&mut reader, &mut buf);
        });

        let slot = new_feeder_slot();
        let records = vec![Record::Bytes(b"hi".to_vec()), Record::Utf8("there".to_string())];
        let handle = spawn_feeder(client, base_config(), records, slot.clone(), Arc::new(NoopMemory));
        handle.join().unwrap();
        drain.join().unwrap();

        let guard = slot.lock().unwrap();
        assert!(matches!(*guard, Some(FeederFailure::UnexpectedElementType { .. })));
    }
}
