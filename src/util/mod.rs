use std::net::{IpAddr, SocketAddr, UdpSocket};

use local_ip_address::list_afinet_netifas;
use serde_json::Value;
use str0m::net::Protocol;
use str0m::Candidate;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::model::endpoint::Metadata;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_log(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Random identifier used for media stream ids.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse `key=value` into a metadata entry. The value is read as JSON when
/// possible and as a plain string otherwise.
pub fn parse_pair(pair: &str) -> Result<(String, Value), String> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{pair}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{pair}`"));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn metadata_from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Metadata {
    pairs.into_iter().collect()
}

/// Host candidates for every routable IPv4 interface, on the port `socket`
/// is bound to.
pub fn host_candidates(socket: &UdpSocket) -> Vec<Candidate> {
    let port = match socket.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            warn!("Socket has no local address: {}", e);
            return Vec::new();
        }
    };

    let interfaces = match list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for (name, ip) in interfaces {
        let IpAddr::V4(ip4) = ip else {
            continue;
        };
        if ip4.is_loopback() || ip4.is_link_local() {
            continue;
        }

        debug!("iface: {} / {}", name, ip4);
        match Candidate::host(SocketAddr::new(ip, port), Protocol::Udp) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!("Skipping interface {}: {:?}", name, e),
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_prefer_json_values() {
        assert_eq!(parse_pair("n=3").unwrap(), ("n".to_string(), Value::from(3)));
        assert_eq!(
            parse_pair("token=abc").unwrap(),
            ("token".to_string(), Value::from("abc"))
        );
        assert_eq!(
            parse_pair("url=a=b").unwrap(),
            ("url".to_string(), Value::from("a=b"))
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(random_id(), random_id());
    }
}
