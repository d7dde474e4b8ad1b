//! Minimal coordination service
//!
//! A compatible stand-in for the external ZooKeeper-style service: sessions
//! are TCP connections, ephemeral-sequential nodes die with their session,
//! and children listings drive the election. Shipped as `lazylog-coordsvc`
//! and booted in-process by the integration tests.

use crate::common::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Registry {
    /// Full path → owning session; `None` marks a persistent node.
    nodes: HashMap<String, Option<u64>>,
    /// Per-parent sequence counters for CREATE_SEQ.
    counters: HashMap<String, u64>,
    /// Live sessions and their last activity.
    sessions: HashMap<u64, Instant>,
    next_session: u64,
}

impl Registry {
    fn open_session(&mut self) -> u64 {
        self.next_session += 1;
        let id = self.next_session;
        self.sessions.insert(id, Instant::now());
        id
    }

    fn close_session(&mut self, session: u64) {
        self.sessions.remove(&session);
        self.nodes.retain(|_, owner| *owner != Some(session));
    }

    fn expire_stale(&mut self, timeout: Duration) -> Vec<u64> {
        let stale: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, last)| last.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.close_session(*id);
        }
        stale
    }

    fn children(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{parent}/");
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }
}

/// The coordination service.
pub struct CoordServer {
    listener: TcpListener,
    state: Arc<Mutex<Registry>>,
    session_timeout: Duration,
}

impl CoordServer {
    /// Bind the service; `addr` may use port 0.
    pub async fn bind(addr: &str, session_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(Registry::default())),
            session_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until the process exits.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("Coordination service listening on {addr}");
        tracing::info!("  Session timeout: {:?}", self.session_timeout);

        let reaper_state = self.state.clone();
        let timeout = self.session_timeout;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeout / 4).await;
                let stale = reaper_state.lock().unwrap().expire_stale(timeout);
                for id in stale {
                    tracing::info!("Session {id} expired, ephemerals removed");
                }
            }
        });

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_session(stream, state).await {
                    tracing::debug!("Session from {peer} ended: {e}");
                }
            });
        }
    }
}

async fn handle_session(mut stream: TcpStream, state: Arc<Mutex<Registry>>) -> Result<()> {
    let session = state.lock().unwrap().open_session();
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let result = loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => break Err(Error::Io(e)),
        };
        if n == 0 {
            break Ok(());
        }
        let reply = {
            let mut reg = state.lock().unwrap();
            if !reg.sessions.contains_key(&session) {
                "ERR|SESSION_EXPIRED".to_string()
            } else {
                reg.sessions.insert(session, Instant::now());
                dispatch(&mut reg, session, line.trim_end_matches('\n'))
            }
        };
        if let Err(e) = write_half.write_all(format!("{reply}\n").as_bytes()).await {
            break Err(Error::Io(e));
        }
    };

    state.lock().unwrap().close_session(session);
    result
}

fn dispatch(reg: &mut Registry, session: u64, line: &str) -> String {
    let parts: Vec<&str> = line.split('|').collect();
    match parts[0] {
        "ENSURE" => match parts.get(1) {
            Some(path) if !path.is_empty() => {
                reg.nodes.entry(path.to_string()).or_insert(None);
                "OK".to_string()
            }
            _ => "ERR|BAD_PATH".to_string(),
        },
        "CREATE_SEQ" => {
            let (parent, prefix) = match (parts.get(1), parts.get(2)) {
                (Some(parent), Some(prefix)) if !parent.is_empty() => (*parent, *prefix),
                _ => return "ERR|BAD_PATH".to_string(),
            };
            if !reg.nodes.contains_key(parent) {
                return "ERR|NO_NODE".to_string();
            }
            let counter = reg.counters.entry(parent.to_string()).or_insert(0);
            let name = format!("{prefix}{:010}", *counter);
            *counter += 1;
            reg.nodes
                .insert(format!("{parent}/{name}"), Some(session));
            format!("CREATED|{name}")
        }
        "CHILDREN" => match parts.get(1) {
            Some(path) if reg.nodes.contains_key(*path) => {
                let names = reg.children(path);
                let mut reply = format!("CHILDREN|{}", names.len());
                for name in names {
                    reply.push('|');
                    reply.push_str(&name);
                }
                reply
            }
            Some(_) => "ERR|NO_NODE".to_string(),
            None => "ERR|BAD_PATH".to_string(),
        },
        "PING" => "PONG".to_string(),
        _ => "ERR|UNKNOWN".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordSession, ELECTION_PATH, ELECTION_PREFIX, ROOT_PATH};

    async fn start_server(session_timeout: Duration) -> String {
        let server = CoordServer::bind("127.0.0.1:0", session_timeout)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.serve());
        addr
    }

    #[tokio::test]
    async fn test_sequential_creation_and_listing() {
        let addr = start_server(Duration::from_secs(30)).await;
        let deadline = Duration::from_secs(2);

        let mut a = CoordSession::connect(&addr, deadline).await.unwrap();
        a.ensure(ROOT_PATH).await.unwrap();
        a.ensure(ELECTION_PATH).await.unwrap();
        let name_a = a
            .create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        let mut b = CoordSession::connect(&addr, deadline).await.unwrap();
        let name_b = b
            .create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        assert_eq!(name_a, "n_0000000000");
        assert_eq!(name_b, "n_0000000001");

        let children = a.children(ELECTION_PATH).await.unwrap();
        assert_eq!(children, vec![name_a, name_b]);
    }

    #[tokio::test]
    async fn test_session_close_removes_ephemerals() {
        let addr = start_server(Duration::from_secs(30)).await;
        let deadline = Duration::from_secs(2);

        let mut a = CoordSession::connect(&addr, deadline).await.unwrap();
        a.ensure(ELECTION_PATH).await.unwrap();
        let _ = a
            .create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        let mut b = CoordSession::connect(&addr, deadline).await.unwrap();
        let name_b = b
            .create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        drop(a);

        // The service prunes a's node when its connection closes.
        let mut remaining = b.children(ELECTION_PATH).await.unwrap();
        for _ in 0..50 {
            if remaining == vec![name_b.clone()] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = b.children(ELECTION_PATH).await.unwrap();
        }
        assert_eq!(remaining, vec![name_b]);
    }

    #[tokio::test]
    async fn test_session_expiry_removes_ephemerals() {
        let addr = start_server(Duration::from_millis(200)).await;
        let deadline = Duration::from_secs(2);

        let mut a = CoordSession::connect(&addr, deadline).await.unwrap();
        a.ensure(ELECTION_PATH).await.unwrap();
        a.create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        // Stay silent past the session timeout; the reaper drops the node.
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut b = CoordSession::connect(&addr, deadline).await.unwrap();
        let children = b.children(ELECTION_PATH).await.unwrap();
        assert!(children.is_empty());

        // The stale session's own connection now gets an expiry error.
        assert!(a.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_create_seq_requires_parent() {
        let addr = start_server(Duration::from_secs(30)).await;
        let mut s = CoordSession::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        let err = s
            .create_sequential("/nowhere", ELECTION_PREFIX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Coordination(r) if r == "NO_NODE"));
    }

    #[tokio::test]
    async fn test_ping_refreshes_session() {
        let addr = start_server(Duration::from_millis(300)).await;
        let mut s = CoordSession::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        s.ensure(ELECTION_PATH).await.unwrap();
        s.create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await
            .unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            s.ping().await.unwrap();
        }

        let children = s.children(ELECTION_PATH).await.unwrap();
        assert_eq!(children.len(), 1);
    }
}
