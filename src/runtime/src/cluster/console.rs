//! Serial console access through `virtctl console`.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use containerdisks_core::error::{DiskError, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Console of a VM, attached through a `virtctl console` child process.
///
/// The process is killed when the console is dropped.
pub struct VirtctlConsole {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl VirtctlConsole {
    /// Attach to the console of `name` in `namespace`.
    pub fn spawn(virtctl: &str, namespace: &str, name: &str) -> Result<Self> {
        let mut cmd = Command::new(virtctl);
        cmd.arg("console")
            .arg("--namespace")
            .arg(namespace)
            .arg(name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            DiskError::ConsoleError(format!(
                "failed to spawn {}: {} (is virtctl installed?)",
                virtctl, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DiskError::ConsoleError("virtctl stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DiskError::ConsoleError("virtctl stdout not captured".to_string()))?;

        tracing::debug!(vm = name, namespace, "Attached to serial console");

        Ok(Self {
            _child: child,
            stdin,
            stdout,
        })
    }
}

impl AsyncRead for VirtctlConsole {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for VirtctlConsole {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
