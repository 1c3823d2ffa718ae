//! LAN sweep for STBs listening on the control port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;

use crate::error::{ClientError, Result};
use crate::pool::WorkerPool;

/// A host that accepted a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SweepHit {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Parse `A.B.C.0`, `A.B.C`, or `A.B.C.0/24` into the network address.
pub fn parse_subnet(text: &str) -> Result<Ipv4Addr> {
    let text = text.trim();
    let base = text.strip_suffix("/24").unwrap_or(text);
    let parts: Vec<&str> = base.split('.').collect();
    let octets: Vec<u8> = match parts.len() {
        3 | 4 => parts[..3]
            .iter()
            .map(|p| p.parse::<u8>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| ClientError::Config(format!("invalid subnet: {}", text)))?,
        _ => return Err(ClientError::Config(format!("invalid subnet: {}", text))),
    };
    Ok(Ipv4Addr::new(octets[0], octets[1], octets[2], 0))
}

/// Host addresses .1 through .254 of the /24 containing `base`.
pub fn hosts(base: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    let [a, b, c, _] = base.octets();
    (1..=254u8).map(move |d| Ipv4Addr::new(a, b, c, d))
}

async fn accepts_connection(addr: SocketAddr, connect_timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Try every host of the /24 on each port through `pool`.
/// Returns responsive `(ip, port)` pairs sorted by address.
pub async fn sweep_subnet(
    base: Ipv4Addr,
    ports: &[u16],
    connect_timeout: Duration,
    pool: &WorkerPool,
) -> Vec<SweepHit> {
    info!(
        "[Sweep] {}/24 on ports {:?} ({} workers)",
        base,
        ports,
        pool.max_workers()
    );

    let handles: Vec<_> = hosts(base)
        .flat_map(|ip| ports.iter().map(move |port| SweepHit { ip, port: *port }))
        .map(|hit| {
            pool.spawn(async move {
                let addr = SocketAddr::from((hit.ip, hit.port));
                accepts_connection(addr, connect_timeout).await.then_some(hit)
            })
        })
        .collect();

    let mut hits = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Some(hit)) => {
                debug!("[Sweep] {}:{} open", hit.ip, hit.port);
                hits.push(hit);
            }
            Ok(None) => {}
            Err(e) => debug!("[Sweep] connect task failed: {}", e),
        }
    }
    hits.sort();
    info!("[Sweep] {} responsive endpoints", hits.len());
    hits
}
