//! Utility functions for lazylog

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Uniform random duration in `[min_ms, max_ms]`, used for heartbeat jitter.
pub fn jitter_ms(min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Validate a `host:port` peer address.
pub fn validate_peer(addr: &str) -> crate::Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| crate::Error::InvalidConfig(format!("peer {addr:?} is not host:port")))?;
    if host.is_empty() {
        return Err(crate::Error::InvalidConfig(format!(
            "peer {addr:?} has an empty host"
        )));
    }
    port.parse::<u16>()
        .map_err(|_| crate::Error::InvalidConfig(format!("peer {addr:?} has a bad port")))?;
    Ok(())
}

/// Parse a comma-separated peer list, validating each entry.
pub fn parse_peer_list(list: &[String]) -> crate::Result<Vec<String>> {
    let mut peers = Vec::new();
    for chunk in list {
        for addr in chunk.split(',') {
            let addr = addr.trim();
            if addr.is_empty() {
                continue;
            }
            validate_peer(addr)?;
            peers.push(addr.to_string());
        }
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = jitter_ms(100, 300);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(300));
        }
        assert_eq!(jitter_ms(200, 200), Duration::from_millis(200));
    }

    #[test]
    fn test_validate_peer() {
        assert!(validate_peer("127.0.0.1:5001").is_ok());
        assert!(validate_peer("example.com:80").is_ok());
        assert!(validate_peer("no-port").is_err());
        assert!(validate_peer(":5001").is_err());
        assert!(validate_peer("host:notaport").is_err());
    }

    #[test]
    fn test_parse_peer_list_flattens_commas() {
        let peers = parse_peer_list(&[
            "127.0.0.1:5001,127.0.0.1:5002".to_string(),
            "127.0.0.1:5003".to_string(),
        ])
        .unwrap();
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[2], "127.0.0.1:5003");
    }

    #[test]
    fn test_timestamp_is_epoch_millis() {
        let t = timestamp_now_millis();
        // Past 2020-01-01 and below year ~5000
        assert!(t > 1_577_836_800_000);
        assert!(t < 100_000_000_000_000);
    }
}
