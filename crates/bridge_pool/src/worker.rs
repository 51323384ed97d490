//! A connected worker: a subprocess plus the bidirectional socket it
//! connected back on. `Worker` is a cheap, cloneable handle (`Arc`
//! inside) so the pool, the monitor, and the feeder/reader can each
//! hold a reference without fighting over ownership.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{PoolError, PoolResult};

pub type WorkerId = u64;

/// Environment variable carrying the TCP port the worker should connect
/// back on. Set by the pool before spawning.
pub const CONNECT_PORT_ENV: &str = "WORKER_CONNECT_PORT";
/// Set to "1" on the child's environment when worker reuse is enabled
/// (`spec.md` §4.2), so the guest knows to stay resident between tasks.
pub const REUSE_WORKER_ENV: &str = "REUSE_WORKER";
/// Comma-separated local working-directory list populated by the pool
/// from the host's `LocalStorage` before every `acquire` (`spec.md` §4.2).
pub const LOCAL_DIRS_ENV: &str = "LOCAL_DIRS";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct WorkerInner {
    id: WorkerId,
    child: Mutex<Child>,
    stream: TcpStream,
    destroyed: AtomicBool,
}

/// A pooled worker: a connected subprocess. Clone is cheap and shares
/// the same underlying process/socket.
#[derive(Clone)]
pub struct Worker(Arc<WorkerInner>);

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.0.id
    }

    /// Obtain an independent handle to the socket for exclusive use by
    /// one side (reader or feeder). Both halves share the same
    /// underlying file descriptor; closing one does not affect the
    /// other's ability to detect shutdown via I/O errors.
    pub fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.0.stream.try_clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::SeqCst)
    }

    pub fn process_id(&self) -> Option<u32> {
        self.0.child.lock().ok().map(|c| c.id())
    }

    /// Half-close the write side of the socket. Unlike `kill`, this
    /// neither terminates the child nor shuts down the read side: it
    /// exists so a caller on another thread can unblock a feeder stuck
    /// in a blocking write without deciding yet whether the worker is
    /// being released back to the pool or destroyed.
    pub fn shutdown_write(&self) {
        let _ = self.0.stream.shutdown(std::net::Shutdown::Write);
    }

    /// Forcibly terminate. Safe to call more than once — the pool's
    /// `destroy` relies on this for the monitor/completion-hook race
    /// (`spec.md` §4.5, §9).
    pub(crate) fn kill(&self) {
        if self.0.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut child) = self.0.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = self.0.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// What to spawn: an executable plus arguments, independent of the
/// `(executable, env)` pool key (args do not participate in pooling).
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub executable: String,
    pub args: Vec<String>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Spawn a guest subprocess and accept its callback connection, honoring
/// `connect_timeout`. Mirrors the bind-then-poll-then-accept shape used
/// for subprocess-to-host callback connections: the port is allocated
/// first (so it can be handed to the child via the environment), then
/// the listener is polled non-blockingly so a dead child is detected
/// promptly instead of hanging until the OS-level accept times out.
pub fn spawn_and_connect(
    spec: &SpawnSpec,
    env: &std::collections::BTreeMap<String, String>,
    connect_timeout: Duration,
) -> PoolResult<Worker> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    listener.set_nonblocking(true)?;

    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args);
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.env(CONNECT_PORT_ENV, port.to_string());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        PoolError::message(format!(
            "failed to spawn guest process '{}': {e}",
            spec.executable
        ))
    })?;

    let stream = match accept_with_timeout(&listener, &mut child, connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };
    stream.set_nonblocking(false)?;

    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    debug!(worker_id = id, executable = %spec.executable, "guest connected");

    Ok(Worker(Arc::new(WorkerInner {
        id,
        child: Mutex::new(child),
        stream,
        destroyed: AtomicBool::new(false),
    })))
}

fn accept_with_timeout(
    listener: &TcpListener,
    child: &mut Child,
    timeout: Duration,
) -> PoolResult<TcpStream> {
    let start = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        if let Ok(Some(status)) = child.try_wait() {
            // One more attempt: a connection may have raced the exit.
            if let Ok((stream, _)) = listener.accept() {
                return Ok(stream);
            }
            return Err(PoolError::ExitedBeforeConnect {
                executable: format!("pid {}", child.id()),
                status,
            });
        }

        if start.elapsed() >= timeout {
            warn!("guest connect timed out after {:.1}s", timeout.as_secs_f64());
            return Err(PoolError::ConnectTimeout {
                executable: format!("pid {}", child.id()),
                timeout_secs: timeout.as_secs_f64(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
