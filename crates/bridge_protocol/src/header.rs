//! Task header encoding (§3): written once per task at the start of a
//! worker session, before any record data.

use std::io::{Read, Write};

use crate::broadcast::{read_delta, write_delta, DeltaEntry};
use crate::error::Result;
use crate::frame::{read_frame, read_int32, read_utf, write_frame, write_int32, write_utf};

/// Everything the feeder writes before the upstream record stream
/// begins: partition index, working directory, include paths, the
/// broadcast delta, and the opaque command blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHeader {
    pub partition_index: i32,
    pub working_dir: String,
    pub include_paths: Vec<String>,
    pub broadcast_delta: Vec<DeltaEntry>,
    pub command_blob: Vec<u8>,
}

pub fn write_task_header<W: Write>(w: &mut W, header: &TaskHeader) -> Result<()> {
    write_int32(w, header.partition_index)?;
    write_utf(w, &header.working_dir)?;

    write_int32(w, header.include_paths.len() as i32)?;
    for path in &header.include_paths {
        write_utf(w, path)?;
    }

    write_delta(w, &header.broadcast_delta)?;

    write_frame(w, &header.command_blob)?;
    Ok(())
}

pub fn read_task_header<R: Read>(r: &mut R) -> Result<TaskHeader> {
    let partition_index = read_int32(r)?;
    let working_dir_len = read_int32(r)?;
    let working_dir = read_utf(r, working_dir_len as u32)?;

    let include_count = read_int32(r)?;
    let mut include_paths = Vec::with_capacity(include_count.max(0) as usize);
    for _ in 0..include_count {
        let len = read_int32(r)?;
        include_paths.push(read_utf(r, len as u32)?);
    }

    let broadcast_delta = read_delta(r)?;

    let command_len = read_int32(r)?;
    let command_blob = read_frame(r, command_len as u32)?;

    Ok(TaskHeader {
        partition_index,
        working_dir,
        include_paths,
        broadcast_delta,
        command_blob,
    })
}
