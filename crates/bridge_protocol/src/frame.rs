//! Length-prefixed frame codec (component C1).
//!
//! A frame on the wire is either a *data frame* — a non-negative `i32`
//! length `n` followed by exactly `n` bytes — or a *control frame*: a
//! negative length that is one of the [`Sentinel`] values. All integers
//! are big-endian two's-complement, matching §3 of the protocol spec.
//! There is no magic header and no version negotiation; the protocol is
//! implicit in the byte stream itself.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};

/// Default buffer size for both socket halves, recognized config key
/// `io.buffer.size` (see `ConfigStore`).
pub const DEFAULT_BUFFER_SIZE: usize = 65536;
pub const IO_BUFFER_SIZE_KEY: &str = "io.buffer.size";
pub const WORKER_REUSE_KEY: &str = "worker.reuse";

/// In-band control sentinels multiplexed over the data stream.
///
/// Encoded as the frame length field when it is negative. Values are
/// fixed by the wire contract; any other negative length is a protocol
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Worker has finished emitting data records.
    EndOfDataSection,
    /// Followed by one data frame carrying a UTF-8 error message.
    ExceptionThrown,
    /// Followed by five big-endian `i64`s: boot-complete, init-complete,
    /// finish, memory-bytes-spilled, disk-bytes-spilled.
    TimingData,
    /// Terminal frame; appears after the accumulator section.
    EndOfStream,
}

impl Sentinel {
    pub fn code(self) -> i32 {
        match self {
            Sentinel::EndOfDataSection => -1,
            Sentinel::ExceptionThrown => -2,
            Sentinel::TimingData => -3,
            Sentinel::EndOfStream => -4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Sentinel::EndOfDataSection),
            -2 => Some(Sentinel::ExceptionThrown),
            -3 => Some(Sentinel::TimingData),
            -4 => Some(Sentinel::EndOfStream),
            _ => None,
        }
    }
}

/// What a length-field read decoded to: a data frame of `n` bytes still
/// to be read, or a recognized control sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Data(u32),
    Control(Sentinel),
}

/// Five timing counters carried by a `TimingData` control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingMetrics {
    pub boot_complete_time: i64,
    pub init_complete_time: i64,
    pub finish_time: i64,
    pub memory_bytes_spilled: i64,
    pub disk_bytes_spilled: i64,
}

pub fn write_int32<W: Write>(w: &mut W, value: i32) -> Result<()> {
    w.write_i32::<BigEndian>(value)?;
    Ok(())
}

pub fn write_int64<W: Write>(w: &mut W, value: i64) -> Result<()> {
    w.write_i64::<BigEndian>(value)?;
    Ok(())
}

pub fn read_int32<R: Read>(r: &mut R) -> Result<i32> {
    r.read_i32::<BigEndian>().map_err(Into::into)
}

pub fn read_int64<R: Read>(r: &mut R) -> Result<i64> {
    r.read_i64::<BigEndian>().map_err(Into::into)
}

/// Read exactly `n` bytes or fail with `UnexpectedEof`.
pub fn read_frame<R: Read>(r: &mut R, n: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n as usize];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof {
                wanted: n as usize,
                got: 0,
            }
        } else {
            e.into()
        }
    })?;
    Ok(buf)
}

pub fn read_utf<R: Read>(r: &mut R, n: u32) -> Result<String> {
    let bytes = read_frame(r, n)?;
    String::from_utf8(bytes).map_err(|e| ProtocolError::Io {
        message: format!("frame is not valid UTF-8: {e}"),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}

/// Write a data frame: `i32` length followed by `bytes`.
pub fn write_frame<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    if bytes.len() > i32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge(bytes.len() as i64));
    }
    write_int32(w, bytes.len() as i32)?;
    w.write_all(bytes)?;
    Ok(())
}

pub fn write_utf<W: Write>(w: &mut W, s: &str) -> Result<()> {
    write_frame(w, s.as_bytes())
}

/// Write a control sentinel (just the negative length field; any typed
/// payload that follows is the caller's responsibility).
pub fn write_sentinel<W: Write>(w: &mut W, sentinel: Sentinel) -> Result<()> {
    write_int32(w, sentinel.code())
}

pub fn write_timing<W: Write>(w: &mut W, timing: &TimingMetrics) -> Result<()> {
    write_sentinel(w, Sentinel::TimingData)?;
    write_int64(w, timing.boot_complete_time)?;
    write_int64(w, timing.init_complete_time)?;
    write_int64(w, timing.finish_time)?;
    write_int64(w, timing.memory_bytes_spilled)?;
    write_int64(w, timing.disk_bytes_spilled)?;
    Ok(())
}

pub fn read_timing<R: Read>(r: &mut R) -> Result<TimingMetrics> {
    Ok(TimingMetrics {
        boot_complete_time: read_int64(r)?,
        init_complete_time: read_int64(r)?,
        finish_time: read_int64(r)?,
        memory_bytes_spilled: read_int64(r)?,
        disk_bytes_spilled: read_int64(r)?,
    })
}

/// Read the next length field and classify it as data or control.
pub fn read_frame_header<R: Read>(r: &mut R) -> Result<FrameHeader> {
    let code = read_int32(r)?;
    if code >= 0 {
        return Ok(FrameHeader::Data(code as u32));
    }
    Sentinel::from_code(code)
        .map(FrameHeader::Control)
        .ok_or(ProtocolError::UnknownSentinel(code))
}
