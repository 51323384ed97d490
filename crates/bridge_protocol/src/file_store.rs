//! Persisted frame files (§6): the same length-prefixed codec used on
//! the wire, written to local disk. No headers, no checksums, no
//! sentinels — EOF terminates the sequence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use crate::error::{ProtocolError, Result};
use crate::frame::{write_frame, DEFAULT_BUFFER_SIZE};

/// Write a sequence of byte-string records to `path` as consecutive
/// data frames.
pub fn write_frames_to_file<P: AsRef<Path>>(
    path: P,
    frames: impl IntoIterator<Item = Vec<u8>>,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);
    for frame in frames {
        write_frame(&mut writer, &frame)?;
    }
    Ok(())
}

/// A single broadcast variable's payload, persisted as one data frame.
pub fn write_broadcast_file<P: AsRef<Path>>(path: P, payload: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);
    write_frame(&mut writer, payload)
}

pub fn read_broadcast_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let mut reader = FrameFileReader::open(path)?;
    reader
        .next()
        .transpose()?
        .ok_or_else(|| ProtocolError::UnexpectedEof { wanted: 1, got: 0 })
}

/// Iterator over consecutive data frames in a file, terminated by EOF
/// rather than any in-band sentinel.
pub struct FrameFileReader {
    reader: BufReader<File>,
}

impl FrameFileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file),
        })
    }
}

impl Iterator for FrameFileReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let len = i32::from_be_bytes(len_buf);
        if len < 0 {
            return Some(Err(ProtocolError::UnknownSentinel(len)));
        }
        let mut body = vec![0u8; len as usize];
        if let Err(e) = self.reader.read_exact(&mut body) {
            return Some(Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof {
                    wanted: len as usize,
                    got: 0,
                },
                _ => e.into(),
            }));
        }
        Some(Ok(body))
    }
}

/// Convenience wrapper equivalent to constructing a [`FrameFileReader`]
/// and collecting it lazily.
pub fn read_frames_from_file<P: AsRef<Path>>(path: P) -> Result<FrameFileReader> {
    FrameFileReader::open(path)
}
