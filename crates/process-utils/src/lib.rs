//! Small process-related helpers shared across the workspace.
//!
//! External tools such as ffmpeg write progress to one pipe and diagnostics to
//! the other. If only one of them is read, the other can fill its buffer and
//! stall the child forever. [`spawn_line_drain`] reads both pipes on their own
//! tasks and merges the decoded lines into a single channel.

use std::ffi::OsStr;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` for an external tool.
///
/// The child never inherits a console window on Windows and is killed if the
/// owning `Child` handle is dropped before it exits.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single decoded line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Handle over the reader tasks started by [`spawn_line_drain`].
pub struct LineDrain {
    /// Lines from both pipes, in arrival order per pipe.
    ///
    /// The channel closes once both pipes reached EOF.
    pub lines: mpsc::UnboundedReceiver<OutputLine>,
    tasks: Vec<JoinHandle<io::Result<()>>>,
}

impl LineDrain {
    /// Wait for the reader tasks to finish, returning the first read error.
    pub async fn join(self) -> io::Result<()> {
        let mut result = Ok(());
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(e) => {
                    if result.is_ok() {
                        result = Err(io::Error::other(e));
                    }
                }
            }
        }
        result
    }
}

/// Take the piped stdout/stderr of `child` and drain both concurrently.
///
/// Lines are split on `\n` as well as `\r`, since progress meters usually
/// rewrite the same terminal line with carriage returns. Pipes that were not
/// configured as `Stdio::piped()` are simply skipped.
///
/// The readers keep consuming output even after the receiver has been
/// dropped, so the child can never block on a full pipe.
pub fn spawn_line_drain(child: &mut Child) -> LineDrain {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tasks = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(pump(stderr, OutputStream::Stderr, tx.clone())));
    }

    LineDrain { lines: rx, tasks }
}

async fn pump<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<OutputLine>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut pending, stream, &tx);
            } else {
                pending.push(byte);
            }
        }
        reader.consume(len);
    }

    emit(&mut pending, stream, &tx);
    Ok(())
}

fn emit(pending: &mut Vec<u8>, stream: OutputStream, tx: &mpsc::UnboundedSender<OutputLine>) {
    if pending.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    // A closed receiver only means nobody is listening any more.
    let _ = tx.send(OutputLine { stream, text });
}
