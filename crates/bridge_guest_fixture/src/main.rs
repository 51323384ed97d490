//! A minimal stand-in for the worker side of the wire protocol, used
//! only by integration tests. A real deployment speaks this side of the
//! protocol from a different-language interpreter; this binary exists
//! so the Rust-side feeder/reader/monitor/driver can be exercised over
//! a real socket and a real subprocess without requiring one.
//!
//! Behavior is selected entirely through environment variables so test
//! code can spawn it with different scripted scenarios:
//!
//! - `WORKER_CONNECT_PORT` (required): port to dial back on `127.0.0.1`.
//! - `FIXTURE_MODE`: `echo_upper` (default) | `hang`.
//! - `FIXTURE_RAISE_AFTER`: if set, raise an exception after this many
//!   echoed records instead of finishing normally.
//! - `FIXTURE_RAISE_MESSAGE`: exception message (default `"boom"`).
//! - `FIXTURE_TIMING`: `"boot,init,finish,mem,disk"` — if set, emit one
//!   `TimingData` control frame after the first echoed record.
//! - `FIXTURE_ACCUM_COUNT`: number of accumulator frames to emit in the
//!   accumulator section (each is `b"accum-<i>"`).

use std::io::BufReader;
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, info};

use bridge_logging::{init_logging, LogConfig};
use bridge_protocol::{
    read_frame_header, read_task_header, write_frame, write_sentinel, write_timing, FrameHeader,
    Sentinel, TimingMetrics,
};

fn main() {
    let _ = init_logging(LogConfig {
        app_name: "bridge_guest_fixture",
        verbose: std::env::var("FIXTURE_VERBOSE").is_ok(),
    });

    let port: u16 = std::env::var("WORKER_CONNECT_PORT")
        .expect("WORKER_CONNECT_PORT must be set")
        .parse()
        .expect("WORKER_CONNECT_PORT must be a valid port number");

    let mode = std::env::var("FIXTURE_MODE").unwrap_or_else(|_| "echo_upper".to_string());
    info!(mode = %mode, port, "guest fixture dialing back");

    let stream = TcpStream::connect(("127.0.0.1", port)).expect("failed to dial host");

    if mode == "hang" {
        // Deliberately unresponsive: never read or write again. The
        // monitor is expected to kill this process to unblock the
        // reader.
        std::thread::sleep(Duration::from_secs(3600));
        return;
    }

    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut writer = stream;

    let header = read_task_header(&mut reader).expect("failed to read task header");
    debug!(partition_index = header.partition_index, "read task header");

    let mut echoed = Vec::new();
    loop {
        match read_frame_header(&mut reader).expect("failed to read frame header") {
            FrameHeader::Data(n) => {
                let bytes = bridge_protocol::read_frame(&mut reader, n).expect("read frame body");
                echoed.push(bytes);
            }
            FrameHeader::Control(Sentinel::EndOfDataSection) => break,
            FrameHeader::Control(other) => {
                panic!("unexpected control frame from feeder: {other:?}")
            }
        }
    }

    let raise_after: Option<usize> = std::env::var("FIXTURE_RAISE_AFTER")
        .ok()
        .and_then(|s| s.parse().ok());
    let raise_message =
        std::env::var("FIXTURE_RAISE_MESSAGE").unwrap_or_else(|_| "boom".to_string());
    let timing: Option<TimingMetrics> = std::env::var("FIXTURE_TIMING").ok().map(|s| {
        let parts: Vec<i64> = s.split(',').map(|p| p.parse().unwrap()).collect();
        TimingMetrics {
            boot_complete_time: parts[0],
            init_complete_time: parts[1],
            finish_time: parts[2],
            memory_bytes_spilled: parts[3],
            disk_bytes_spilled: parts[4],
        }
    });
    let accum_count: usize = std::env::var("FIXTURE_ACCUM_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    for (i, record) in echoed.iter().enumerate() {
        if let Some(n) = raise_after {
            if i == n {
                write_sentinel(&mut writer, Sentinel::ExceptionThrown).unwrap();
                bridge_protocol::write_utf(&mut writer, &raise_message).unwrap();
                return;
            }
        }

        let upper = record.to_ascii_uppercase();
        write_frame(&mut writer, &upper).unwrap();

        if i == 0 {
            if let Some(t) = &timing {
                write_timing(&mut writer, t).unwrap();
            }
        }
    }

    write_sentinel(&mut writer, Sentinel::EndOfDataSection).unwrap();

    bridge_protocol::write_int32(&mut writer, accum_count as i32).unwrap();
    for i in 0..accum_count {
        write_frame(&mut writer, format!("accum-{i}").as_bytes()).unwrap();
    }

    write_sentinel(&mut writer, Sentinel::EndOfStream).unwrap();
}
