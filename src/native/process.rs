use std::io::ErrorKind;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::traits::runner::KillSignal;

/// How long to wait for pipes to close after the process group is gone. A
/// descendant that left the group could otherwise hold a pipe open indefinitely.
const PIPE_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

#[derive(Debug)]
pub struct Supervised {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub killed: bool,
}

impl Supervised {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    #[cfg(unix)]
    pub fn signal(&self) -> Option<i32> {
        use std::os::unix::process::ExitStatusExt;
        self.status.and_then(|s| s.signal())
    }

    #[cfg(not(unix))]
    pub fn signal(&self) -> Option<i32> {
        None
    }
}

/// The process group led by a child spawned with `process_group(0)`.
/// Killed when dropped, so abandoning a supervised future reaps its descendants too.
#[derive(Debug)]
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    #[cfg(unix)]
    fn kill(&self) {
        let Some(pgid) = self.leader.and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        if pgid <= 0 {
            return;
        }
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!("Failed to kill process group {}: {}", pgid, err);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Reads a pipe into a shared buffer so that whatever arrived before the
/// reader is abandoned is still available.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<std::io::Result<()>>,
}

impl Capture {
    fn spawn<R>(mut pipe: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let reader = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let n = pipe.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
        });
        Self { buffer, reader }
    }

    async fn finish(capture: Option<Self>, deadline: Instant) -> Vec<u8> {
        let Some(Capture { buffer, mut reader }) = capture else {
            return Vec::new();
        };
        match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("Failed to read output: {}", e),
            Ok(Err(e)) => tracing::warn!("Pipe task failed: {}", e),
            Err(_) => {
                tracing::warn!("Pipe still open after the process ended");
                reader.abort();
            }
        }
        std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Feeds `input` (then EOF), drains both output pipes while the child runs,
/// and waits for exit, the time limit or a kill request, whichever comes first.
/// On timeout or kill the child's whole process group is force-killed and the
/// child reaped. Output read before that point is kept.
pub async fn supervise(
    mut child: Child,
    started: Instant,
    input: Option<Vec<u8>>,
    limit: Duration,
    kill: &mut KillSignal,
) -> Supervised {
    let group = ProcessGroup::of(&child);
    let stdout = child.stdout.take().map(Capture::spawn);
    let stderr = child.stderr.take().map(Capture::spawn);
    let writer = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(input)) => Some(tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            // Dropping closes the pipe, which is the EOF the program waits for.
            drop(stdin);
            result
        })),
        _ => None,
    };

    enum Ending {
        Exited(std::io::Result<ExitStatus>),
        TimedOut,
        Killed,
    }

    let ending = tokio::select! {
        status = child.wait() => Ending::Exited(status),
        _ = tokio::time::sleep(limit) => Ending::TimedOut,
        _ = kill.triggered() => Ending::Killed,
    };
    let elapsed = started.elapsed();

    let (status, timed_out, killed) = match ending {
        Ending::Exited(Ok(status)) => (Some(status), false, false),
        Ending::Exited(Err(e)) => {
            tracing::error!("Failed to wait for process: {}", e);
            (terminate(&mut child, &group).await, false, false)
        }
        Ending::TimedOut => (terminate(&mut child, &group).await, true, false),
        Ending::Killed => (terminate(&mut child, &group).await, false, true),
    };
    // Background descendants of a program that exited would keep the pipes open.
    group.kill();

    let deadline = Instant::now() + PIPE_GRACE;
    let (stdout, stderr, ()) = tokio::join!(
        Capture::finish(stdout, deadline),
        Capture::finish(stderr, deadline),
        finish_writer(writer, deadline),
    );

    Supervised {
        status,
        stdout,
        stderr,
        elapsed,
        timed_out,
        killed,
    }
}

async fn terminate(child: &mut Child, group: &ProcessGroup) -> Option<ExitStatus> {
    group.kill();
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill process: {}", e);
    }
    match child.try_wait() {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Failed to reap process: {}", e);
            None
        }
    }
}

async fn finish_writer(writer: Option<JoinHandle<std::io::Result<()>>>, deadline: Instant) {
    let Some(mut writer) = writer else {
        return;
    };
    match tokio::time::timeout_at(deadline, &mut writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) if e.kind() == ErrorKind::BrokenPipe => {
            tracing::debug!("Program exited without reading all input");
        }
        Ok(Ok(Err(e))) => tracing::warn!("Failed to write stdin: {}", e),
        Ok(Err(e)) => tracing::warn!("Stdin task failed: {}", e),
        Err(_) => {
            tracing::warn!("Stdin still blocked after the process ended");
            writer.abort();
        }
    }
}
