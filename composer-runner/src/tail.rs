// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Following files that are being written to by another process.
//!
//! Both the instrumentation output and the device log are written to disk by child processes while
//! composer reads them. A [`FileTail`] yields complete lines as they appear, waiting for more when
//! it reaches the end of the file. Once its [`StopSignal`] fires, it reads whatever is left on
//! disk, yields the final unterminated line (if any), and ends.

use crate::errors::TailError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::VecDeque, io, time::Duration};
use tokio::{fs::File, io::AsyncReadExt, sync::watch};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Creates a connected [`StopHandle`] and [`StopSignal`].
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// The sending half of a stop channel.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Signals all receivers to stop. Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// The receiving half of a stop channel.
///
/// Dropping the [`StopHandle`] counts as a stop.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Returns true if a stop has been signaled.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until a stop is signaled.
    pub async fn stopped(&mut self) {
        // An error means the sender was dropped.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TailState {
    Following,
    Draining,
    Done,
}

/// Reads lines from a file as it grows.
#[derive(Debug)]
pub struct FileTail {
    path: Utf8PathBuf,
    file: File,
    position: u64,
    partial: Vec<u8>,
    lines: VecDeque<String>,
    state: TailState,
    stop: StopSignal,
    poll_interval: Duration,
}

impl FileTail {
    /// Opens `path` for following.
    ///
    /// Returns [`TailError::NotFound`] if the file doesn't exist.
    pub async fn open(
        path: &Utf8Path,
        stop: StopSignal,
        poll_interval: Duration,
    ) -> Result<Self, TailError> {
        let file = File::open(path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                TailError::NotFound {
                    path: path.to_owned(),
                }
            } else {
                TailError::Io {
                    path: path.to_owned(),
                    err,
                }
            }
        })?;

        Ok(Self {
            path: path.to_owned(),
            file,
            position: 0,
            partial: Vec::new(),
            lines: VecDeque::new(),
            state: TailState::Following,
            stop,
            poll_interval,
        })
    }

    /// Returns the path being followed.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the next line, without its line terminator.
    ///
    /// Waits for more data while the stop signal hasn't fired. Returns `Ok(None)` once the file
    /// has been drained after a stop.
    pub async fn next_line(&mut self) -> Result<Option<String>, TailError> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }

            match self.state {
                TailState::Done => return Ok(None),
                TailState::Draining => {
                    if self.read_available().await? == 0 {
                        self.state = TailState::Done;
                        if !self.partial.is_empty() {
                            let partial = std::mem::take(&mut self.partial);
                            return Ok(Some(decode_line(&partial)));
                        }
                    }
                }
                TailState::Following => {
                    if self.read_available().await? == 0 {
                        let poll = tokio::time::sleep(self.poll_interval);
                        let stopped = tokio::select! {
                            () = poll => false,
                            () = self.stop.stopped() => true,
                        };
                        if stopped {
                            self.state = TailState::Draining;
                        }
                    }
                }
            }
        }
    }

    /// Reads everything currently on disk, returning the number of bytes read.
    async fn read_available(&mut self) -> Result<usize, TailError> {
        let len = self
            .file
            .metadata()
            .await
            .map_err(|err| TailError::Io {
                path: self.path.clone(),
                err,
            })?
            .len();
        if len < self.position {
            return Err(TailError::Rotated {
                path: self.path.clone(),
                position: self.position,
                len,
            });
        }

        let mut chunk = vec![0; READ_CHUNK_SIZE];
        let mut total = 0;
        loop {
            let n = self
                .file
                .read(&mut chunk)
                .await
                .map_err(|err| TailError::Io {
                    path: self.path.clone(),
                    err,
                })?;
            if n == 0 {
                break;
            }
            total += n;
            self.position += n as u64;
            self.split_lines(&chunk[..n]);
        }

        Ok(total)
    }

    fn split_lines(&mut self, mut bytes: &[u8]) {
        while let Some(newline) = bytes.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&bytes[..newline]);
            let line = std::mem::take(&mut self.partial);
            self.lines.push_back(decode_line(&line));
            bytes = &bytes[newline + 1..];
        }
        self.partial.extend_from_slice(bytes);
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const POLL: Duration = Duration::from_millis(5);

    async fn collect(tail: &mut FileTail) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = tail.next_line().await.expect("tail succeeds") {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn drains_existing_content_after_stop() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "first\r\nsecond\nunterminated").expect("wrote file");

        let (handle, signal) = stop_channel();
        let mut tail = FileTail::open(&path, signal, POLL).await.expect("opened");
        handle.stop();

        assert_eq!(collect(&mut tail).await, vec!["first", "second", "unterminated"]);
        // Once done, the tail stays done.
        assert_eq!(tail.next_line().await.expect("tail succeeds"), None);
    }

    #[tokio::test]
    async fn follows_appended_lines() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "").expect("created file");

        let (handle, signal) = stop_channel();
        let mut tail = FileTail::open(&path, signal, POLL).await.expect("opened");

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .expect("opened for append");
                // Write a line in two pieces to exercise partial-line buffering.
                write!(file, "line").expect("wrote");
                file.flush().expect("flushed");
                writeln!(file, " {i}").expect("wrote");
            }
            handle.stop();
        });

        let lines = collect(&mut tail).await;
        writer.await.expect("writer succeeded");
        assert_eq!(lines, vec!["line 0", "line 1", "line 2"]);
    }

    #[tokio::test]
    async fn dropped_handle_counts_as_stop() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "only\n").expect("wrote file");

        let (handle, signal) = stop_channel();
        let mut tail = FileTail::open(&path, signal, POLL).await.expect("opened");
        drop(handle);

        assert_eq!(collect(&mut tail).await, vec!["only"]);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let (_handle, signal) = stop_channel();
        let err = FileTail::open(&dir.path().join("missing.txt"), signal, POLL)
            .await
            .expect_err("file is missing");
        assert!(matches!(err, TailError::NotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn shrinking_file_is_rotation() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "one\ntwo\n").expect("wrote file");

        let (_handle, signal) = stop_channel();
        let mut tail = FileTail::open(&path, signal, POLL).await.expect("opened");
        assert_eq!(
            tail.next_line().await.expect("read line"),
            Some("one".to_owned())
        );
        assert_eq!(
            tail.next_line().await.expect("read line"),
            Some("two".to_owned())
        );

        std::fs::write(&path, "x\n").expect("truncated file");
        let err = tail.next_line().await.expect_err("rotation detected");
        assert!(
            matches!(
                err,
                TailError::Rotated {
                    position: 8,
                    len: 2,
                    ..
                }
            ),
            "{err:?}"
        );
    }
}
