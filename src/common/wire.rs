//! Line-delimited wire protocol
//!
//! Every frame is a single ASCII line terminated by `\n`, with fields
//! separated by `|` and no escaping. Payloads and record ids therefore must
//! not contain `|` or `\n`; `Message::encode` rejects offenders before they
//! reach a socket. Each connection carries exactly one request and one
//! reply.

use crate::common::{Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Upper bound on a single frame, including the newline.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One stored record as it travels in a BATCHVAL reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub pos: u64,
    pub record_id: String,
    pub payload: String,
}

/// Every message of the protocol, requests and replies alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `APPEND|record_id|client_id|payload` (client → sequencer)
    Append {
        record_id: String,
        client_id: String,
        payload: String,
    },
    Ack,
    Retry,
    /// `HB|view|rep_id|last_ordered` (leader → peer)
    Hb {
        view: u64,
        rep_id: u64,
        last_ordered: u64,
    },
    HbAck,
    /// `HBQ` (anyone → sequencer)
    Hbq,
    /// `HB_REPLY|view|is_leader|last_ordered|stable`
    HbReply {
        view: u64,
        is_leader: bool,
        last_ordered: u64,
        stable: u64,
    },
    /// `STABLE_UPDATE|stable` (leader → peer)
    StableUpdate { stable: u64 },
    StableAck,
    /// `GC|upto` (reserved, no-op)
    Gc { upto: u64 },
    GcOk,
    /// `PUT|pos|rid|payload` (leader → shard)
    Put {
        pos: u64,
        record_id: String,
        payload: String,
    },
    PutOk,
    /// `UPDATESTABLE|upto` (leader → shard)
    UpdateStable { upto: u64 },
    Ok,
    /// `READRANGE|from|to` (client → shard)
    ReadRange { from: u64, to: u64 },
    /// `BATCHVAL|n|pos|rid|payload|…`
    BatchVal { entries: Vec<Entry> },
    NotReady,
    /// `ERR` or `ERR|reason`
    Err { reason: Option<String> },
}

fn clean(field: &str) -> Result<&str> {
    if field.contains('|') || field.contains('\n') {
        return Err(Error::InvalidPayload);
    }
    Ok(field)
}

fn parse_u64(field: &str, what: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|_| Error::Protocol(format!("bad {what}: {field:?}")))
}

fn field_at<'a>(parts: &[&'a str], tag: &str, i: usize) -> Result<&'a str> {
    parts
        .get(i)
        .copied()
        .ok_or_else(|| Error::Protocol(format!("{tag}: missing field {i}")))
}

impl Message {
    /// The leading tag of the encoded frame.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Append { .. } => "APPEND",
            Message::Ack => "ACK",
            Message::Retry => "RETRY",
            Message::Hb { .. } => "HB",
            Message::HbAck => "HB_ACK",
            Message::Hbq => "HBQ",
            Message::HbReply { .. } => "HB_REPLY",
            Message::StableUpdate { .. } => "STABLE_UPDATE",
            Message::StableAck => "STABLE_ACK",
            Message::Gc { .. } => "GC",
            Message::GcOk => "GC_OK",
            Message::Put { .. } => "PUT",
            Message::PutOk => "PUT_OK",
            Message::UpdateStable { .. } => "UPDATESTABLE",
            Message::Ok => "OK",
            Message::ReadRange { .. } => "READRANGE",
            Message::BatchVal { .. } => "BATCHVAL",
            Message::NotReady => "NOT_READY",
            Message::Err { .. } => "ERR",
        }
    }

    /// Encode into a single line without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let line = match self {
            Message::Append {
                record_id,
                client_id,
                payload,
            } => format!(
                "APPEND|{}|{}|{}",
                clean(record_id)?,
                clean(client_id)?,
                clean(payload)?
            ),
            Message::Hb {
                view,
                rep_id,
                last_ordered,
            } => format!("HB|{view}|{rep_id}|{last_ordered}"),
            Message::HbReply {
                view,
                is_leader,
                last_ordered,
                stable,
            } => format!(
                "HB_REPLY|{view}|{}|{last_ordered}|{stable}",
                if *is_leader { 1 } else { 0 }
            ),
            Message::StableUpdate { stable } => format!("STABLE_UPDATE|{stable}"),
            Message::Gc { upto } => format!("GC|{upto}"),
            Message::Put {
                pos,
                record_id,
                payload,
            } => format!("PUT|{pos}|{}|{}", clean(record_id)?, clean(payload)?),
            Message::UpdateStable { upto } => format!("UPDATESTABLE|{upto}"),
            Message::ReadRange { from, to } => format!("READRANGE|{from}|{to}"),
            Message::BatchVal { entries } => {
                let mut line = format!("BATCHVAL|{}", entries.len());
                for e in entries {
                    line.push('|');
                    line.push_str(&e.pos.to_string());
                    line.push('|');
                    line.push_str(clean(&e.record_id)?);
                    line.push('|');
                    line.push_str(clean(&e.payload)?);
                }
                line
            }
            Message::Err { reason } => match reason {
                Some(r) => format!("ERR|{}", clean(r)?),
                None => "ERR".to_string(),
            },
            bare => bare.tag().to_string(),
        };
        if line.len() + 1 > MAX_FRAME_BYTES {
            return Err(Error::FrameTooLarge(line.len() + 1));
        }
        Ok(line)
    }

    /// Parse one line (without the newline) into a message.
    pub fn parse(line: &str) -> Result<Message> {
        let parts: Vec<&str> = line.split('|').collect();
        let tag = parts[0];
        let field = |i: usize| field_at(&parts, tag, i);

        let msg = match tag {
            "APPEND" => Message::Append {
                record_id: field(1)?.to_string(),
                client_id: field(2)?.to_string(),
                payload: field(3)?.to_string(),
            },
            "ACK" => Message::Ack,
            "RETRY" => Message::Retry,
            "HB" => Message::Hb {
                view: parse_u64(field(1)?, "view")?,
                rep_id: parse_u64(field(2)?, "rep_id")?,
                last_ordered: parse_u64(field(3)?, "last_ordered")?,
            },
            "HB_ACK" => Message::HbAck,
            "HBQ" => Message::Hbq,
            "HB_REPLY" => Message::HbReply {
                view: parse_u64(field(1)?, "view")?,
                is_leader: match field(2)? {
                    "1" => true,
                    "0" => false,
                    other => {
                        return Err(Error::Protocol(format!("bad is_leader: {other:?}")));
                    }
                },
                last_ordered: parse_u64(field(3)?, "last_ordered")?,
                stable: parse_u64(field(4)?, "stable")?,
            },
            "STABLE_UPDATE" => Message::StableUpdate {
                stable: parse_u64(field(1)?, "stable")?,
            },
            "STABLE_ACK" => Message::StableAck,
            "GC" => Message::Gc {
                upto: parse_u64(field(1)?, "upto")?,
            },
            "GC_OK" => Message::GcOk,
            "PUT" => Message::Put {
                pos: parse_u64(field(1)?, "pos")?,
                record_id: field(2)?.to_string(),
                payload: field(3)?.to_string(),
            },
            "PUT_OK" => Message::PutOk,
            "UPDATESTABLE" => Message::UpdateStable {
                upto: parse_u64(field(1)?, "upto")?,
            },
            "OK" => Message::Ok,
            "READRANGE" => Message::ReadRange {
                from: parse_u64(field(1)?, "from")?,
                to: parse_u64(field(2)?, "to")?,
            },
            "BATCHVAL" => {
                let n = parse_u64(field(1)?, "count")? as usize;
                if parts.len() != 2 + 3 * n {
                    return Err(Error::Protocol(format!(
                        "BATCHVAL claims {n} entries, carries {} fields",
                        parts.len().saturating_sub(2)
                    )));
                }
                let mut entries = Vec::with_capacity(n);
                let mut idx = 2;
                for _ in 0..n {
                    entries.push(Entry {
                        pos: parse_u64(field(idx)?, "pos")?,
                        record_id: field(idx + 1)?.to_string(),
                        payload: field(idx + 2)?.to_string(),
                    });
                    idx += 3;
                }
                Message::BatchVal { entries }
            }
            "NOT_READY" => Message::NotReady,
            "ERR" => Message::Err {
                reason: parts.get(1).map(|r| r.to_string()),
            },
            other => return Err(Error::UnknownTag(other.to_string())),
        };
        Ok(msg)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Write one frame to a stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let mut line = msg.encode()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from a buffered stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Message> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(Error::ConnectionFailed("peer closed".into()));
    }
    if n > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge(n));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    let line = std::str::from_utf8(&buf)
        .map_err(|_| Error::Protocol("frame is not valid UTF-8".into()))?;
    Message::parse(line)
}

/// One-shot RPC: connect, send a single frame, read the single reply, close.
///
/// An `ERR` reply surfaces as [`Error::Remote`].
pub async fn call(addr: &str, msg: &Message, deadline: Duration) -> Result<Message> {
    let reply = tokio::time::timeout(deadline, async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{addr}: {e}")))?;
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);
        write_frame(&mut write_half, msg).await?;
        read_frame(&mut reader).await
    })
    .await
    .map_err(|_| Error::Timeout(format!("{} to {addr}", msg.tag())))??;

    match reply {
        Message::Err { reason } => Err(Error::Remote(reason)),
        other => Ok(other),
    }
}
