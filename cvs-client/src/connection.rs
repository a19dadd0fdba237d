//! Transport plumbing shared by the pserver and ssh/fake schemes.
//!
//! The protocol is newline-delimited except while a declared byte count is
//! being consumed, so the reader buffers incoming bytes and hands out either
//! whole lines or raw chunks. A line that grows past the protocol buffer size
//! without a newline is an error.

use std::{process::Stdio, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    process::{Child, Command},
    time::timeout,
};

use crate::Error;

pub(crate) const PROTOCOL_BUFFER_SIZE: usize = 8192;

const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

pub(crate) struct Connection {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    buf: Vec<u8>,
}

impl Connection {
    pub(crate) async fn tcp(host: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| Error::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        let (reader, writer) = stream.into_split();

        Ok(Self::from_parts(reader, writer, None))
    }

    /// Spawns a server subprocess and talks the protocol over its stdio.
    /// Stderr is drained into the log so a wedged server stays diagnosable.
    pub(crate) fn spawn(mut command: Command, display: &str) -> Result<Self, Error> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: display.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().expect("stdin was requested as a pipe");
        let stdout = child.stdout.take().expect("stdout was requested as a pipe");
        let stderr = child.stderr.take().expect("stderr was requested as a pipe");
        tokio::spawn(log_stderr(stderr));

        Ok(Self::from_parts(stdout, stdin, Some(child)))
    }

    pub(crate) fn from_parts<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child,
            buf: Vec::new(),
        }
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads one newline-terminated line, including the newline. `None` means
    /// a clean EOF between lines.
    pub(crate) async fn read_line(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(idx) = self.buf.iter().position(|&c| c == b'\n') {
                let rest = self.buf.split_off(idx + 1);
                let line = std::mem::replace(&mut self.buf, rest);
                return Ok(Some(line));
            }

            if self.buf.len() >= PROTOCOL_BUFFER_SIZE {
                return Err(Error::protocol("overlong response from CVS server", &self.buf));
            }

            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::protocol(
                    "connection closed mid-line",
                    &self.buf,
                ));
            }
        }
    }

    /// Reads up to `max` raw bytes; used while consuming a declared byte
    /// count. An empty return means EOF.
    pub(crate) async fn read_raw(&mut self, max: usize) -> Result<Vec<u8>, Error> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(Vec::new());
        }

        let take = max.min(self.buf.len());
        let rest = self.buf.split_off(take);
        Ok(std::mem::replace(&mut self.buf, rest))
    }

    async fn fill(&mut self) -> Result<usize, Error> {
        let mut chunk = [0u8; PROTOCOL_BUFFER_SIZE];
        let n = self.reader.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Tears the connection down. A subprocess transport gets killed and then
    /// waited on with a bounded timeout so a stuck `ssh` cannot hang the
    /// visit.
    pub(crate) async fn shutdown(mut self) -> Result<(), Error> {
        let _ = self.writer.shutdown().await;

        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), child.wait())
                .await
                .map_err(|_| Error::ShutdownTimeout(SHUTDOWN_TIMEOUT_SECS))??;
        }

        Ok(())
    }
}

async fn log_stderr<R: AsyncRead + Unpin>(stderr: R) {
    use tokio::io::AsyncBufReadExt;

    let mut lines = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(line)) = lines.next_segment().await {
        log::debug!("cvs server stderr: {}", String::from_utf8_lossy(&line));
    }
}
