//! Coordination session client

use crate::common::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// One session against the coordination service.
///
/// The session lives exactly as long as the TCP connection: dropping the
/// client closes the connection and the service removes every ephemeral
/// node this session created. All operations share one request deadline.
pub struct CoordSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    deadline: Duration,
}

impl CoordSession {
    /// Open a session.
    pub async fn connect(addr: &str, deadline: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to coordination {addr}")))?
            .map_err(|e| Error::ConnectionFailed(format!("coordination {addr}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            deadline,
        })
    }

    /// Create a persistent node if it does not exist.
    pub async fn ensure(&mut self, path: &str) -> Result<()> {
        let parts = self.request(format!("ENSURE|{path}")).await?;
        expect_tag(&parts, "OK")?;
        Ok(())
    }

    /// Create an ephemeral-sequential child of `parent`; returns its name.
    pub async fn create_sequential(&mut self, parent: &str, prefix: &str) -> Result<String> {
        let parts = self.request(format!("CREATE_SEQ|{parent}|{prefix}")).await?;
        expect_tag(&parts, "CREATED")?;
        parts
            .get(1)
            .cloned()
            .ok_or_else(|| Error::Coordination("CREATED without a name".into()))
    }

    /// List the ephemeral children of `path`, unordered.
    pub async fn children(&mut self, path: &str) -> Result<Vec<String>> {
        let parts = self.request(format!("CHILDREN|{path}")).await?;
        expect_tag(&parts, "CHILDREN")?;
        let n: usize = parts
            .get(1)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| Error::Coordination("CHILDREN without a count".into()))?;
        if parts.len() != n + 2 {
            return Err(Error::Coordination(format!(
                "CHILDREN claims {n} names, carries {}",
                parts.len().saturating_sub(2)
            )));
        }
        Ok(parts[2..].to_vec())
    }

    /// Refresh the session without doing anything else.
    pub async fn ping(&mut self) -> Result<()> {
        let parts = self.request("PING".to_string()).await?;
        expect_tag(&parts, "PONG")?;
        Ok(())
    }

    async fn request(&mut self, line: String) -> Result<Vec<String>> {
        let reply = tokio::time::timeout(self.deadline, async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;

            let mut buf = String::new();
            let n = self.reader.read_line(&mut buf).await?;
            if n == 0 {
                return Err(Error::SessionLost);
            }
            Ok(buf.trim_end_matches('\n').to_string())
        })
        .await
        .map_err(|_| Error::Timeout("coordination request".into()))??;

        let parts: Vec<String> = reply.split('|').map(str::to_string).collect();
        if parts.first().map(String::as_str) == Some("ERR") {
            return Err(Error::Coordination(
                parts.get(1).cloned().unwrap_or_else(|| "unspecified".into()),
            ));
        }
        Ok(parts)
    }
}

fn expect_tag(parts: &[String], tag: &str) -> Result<()> {
    if parts.first().map(String::as_str) == Some(tag) {
        Ok(())
    } else {
        Err(Error::Coordination(format!(
            "expected {tag}, got {:?}",
            parts.first()
        )))
    }
}
