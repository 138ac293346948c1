//! Minimal expect-style driver for serial consoles.

use std::time::Duration;

use containerdisks_core::error::{DiskError, Result};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Console output kept for matching; older output is discarded.
const MAX_BUFFER: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// Sends input to a console and waits for output matching regular expressions.
///
/// Output is accumulated in a buffer. A successful match consumes the buffer
/// up to the end of the match; unmatched output stays for the next expectation.
pub struct Expecter<S> {
    stream: S,
    buffer: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Expecter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    pub async fn send(&mut self, input: &str) -> Result<()> {
        tracing::trace!(input = ?input, "console send");
        self.stream
            .write_all(input.as_bytes())
            .await
            .map_err(|e| DiskError::ConsoleError(format!("write failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| DiskError::ConsoleError(format!("flush failed: {}", e)))
    }

    /// Wait up to `timeout` for `pattern`; returns the matched text.
    pub async fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let (_, matched) = self.expect_any_until(&[pattern], deadline).await?;
        Ok(matched)
    }

    /// Wait until `deadline` for the earliest match of any pattern.
    ///
    /// Returns the index of the matching pattern and the matched text.
    pub async fn expect_any_until(
        &mut self,
        patterns: &[&Regex],
        deadline: Instant,
    ) -> Result<(usize, String)> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((index, end, matched)) = self.find(patterns) {
                self.buffer.drain(..end);
                tracing::trace!(pattern = %patterns[index], matched = ?matched, "console match");
                return Ok((index, matched));
            }

            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await;
            match read {
                Err(_) => {
                    return Err(DiskError::TimeoutError(format!(
                        "expecting {}",
                        patterns
                            .iter()
                            .map(|p| p.as_str())
                            .collect::<Vec<_>>()
                            .join(" | ")
                    )))
                }
                Ok(Err(e)) => {
                    return Err(DiskError::ConsoleError(format!("read failed: {}", e)));
                }
                Ok(Ok(0)) => {
                    return Err(DiskError::ConsoleError("console closed".to_string()));
                }
                Ok(Ok(n)) => self.append(&chunk[..n]),
            }
        }
    }

    /// Drop all buffered output.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn find(&self, patterns: &[&Regex]) -> Option<(usize, usize, String)> {
        patterns
            .iter()
            .enumerate()
            .filter_map(|(index, pattern)| {
                pattern
                    .find(&self.buffer)
                    .map(|m| (index, m.start(), m.end(), m.as_str().to_string()))
            })
            .min_by_key(|(index, start, _, _)| (*start, *index))
            .map(|(index, _, end, matched)| (index, end, matched))
    }

    fn append(&mut self, data: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(data));
        if self.buffer.len() > MAX_BUFFER {
            let mut cut = self.buffer.len() - MAX_BUFFER;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expect_match_consumes_buffer() {
        let (console, mut guest) = tokio::io::duplex(1024);
        let mut expecter = Expecter::new(console);

        guest.write_all(b"booting...\r\nlocalhost login: rest").await.unwrap();
        let login = Regex::new(r"(localhost|vm) login: ").unwrap();
        let matched = expecter.expect(&login, Duration::from_secs(1)).await.unwrap();
        assert_eq!(matched, "localhost login: ");
        assert_eq!(expecter.buffer, "rest");
    }

    #[tokio::test]
    async fn test_expect_earliest_pattern_wins() {
        let (console, mut guest) = tokio::io::duplex(1024);
        let mut expecter = Expecter::new(console);

        guest.write_all(b"Password: \r\nLogin incorrect").await.unwrap();
        let password = Regex::new("Password:").unwrap();
        let incorrect = Regex::new("Login incorrect").unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);

        let (index, _) = expecter
            .expect_any_until(&[&incorrect, &password], deadline)
            .await
            .unwrap();
        assert_eq!(index, 1);
        let (index, _) = expecter
            .expect_any_until(&[&incorrect, &password], deadline)
            .await
            .unwrap();
        assert_eq!(index, 0);
    }

    #[tokio::test]
    async fn test_expect_timeout() {
        let (console, _guest) = tokio::io::duplex(1024);
        let mut expecter = Expecter::new(console);
        let result = expecter
            .expect(&Regex::new("never").unwrap(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(DiskError::TimeoutError(_))));
    }

    #[tokio::test]
    async fn test_expect_closed_console() {
        let (console, guest) = tokio::io::duplex(1024);
        drop(guest);
        let mut expecter = Expecter::new(console);
        let result = expecter
            .expect(&Regex::new("never").unwrap(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DiskError::ConsoleError(_))));
    }

    #[tokio::test]
    async fn test_send_reaches_guest() {
        let (console, mut guest) = tokio::io::duplex(1024);
        let mut expecter = Expecter::new(console);
        expecter.send("sudo su\n").await.unwrap();

        let mut received = [0u8; 8];
        guest.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"sudo su\n");
    }

    #[test]
    fn test_buffer_is_bounded() {
        let (console, _guest) = tokio::io::duplex(16);
        let mut expecter = Expecter::new(console);
        expecter.append(&vec![b'x'; MAX_BUFFER + 100]);
        assert_eq!(expecter.buffer.len(), MAX_BUFFER);
    }
}
