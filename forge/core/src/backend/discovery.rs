//! Backend Auto-Discovery
//!
//! Scans the local /24 network for an Ollama instance when the
//! configured address stops answering. Probes run as a bounded set of
//! concurrent futures under one stream: at most `max_probes` are in
//! flight, each with its own timeout, and the first hit wins - dropping
//! the probe stream abandons everything still outstanding or queued, so
//! a winner cancels the rest instead of waiting for them.
//!
//! Worst-case wall clock is roughly `ceil(254 / max_probes) *
//! probe_timeout`; most hosts on a home network time out rather than
//! refuse, which is why the per-host timeout is the dominant cost lever.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use super::url;

/// Parameters for one subnet scan.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Port to probe on every candidate host.
    pub port: u16,
    /// Per-host probe timeout.
    pub probe_timeout: Duration,
    /// Concurrency cap: probes in flight at once.
    pub max_probes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: 11434,
            probe_timeout: Duration::from_millis(750),
            max_probes: 20,
        }
    }
}

/// A backend instance found by scanning.
#[derive(Clone, Debug)]
pub struct DiscoveredServer {
    /// Host that answered.
    pub host: Ipv4Addr,
    /// Server base URL (no `/api` suffix).
    pub base_url: String,
    /// When the winning probe completed.
    pub probed_at: Instant,
}

/// Determine the local IPv4 address used for outbound traffic.
///
/// Connecting a UDP socket assigns the outbound interface address
/// without sending a packet; the target address is irrelevant.
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = match tokio::net::UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(error = %err, "Unable to bind socket for local address detection");
            return None;
        }
    };
    if let Err(err) = socket.connect("8.8.8.8:80").await {
        tracing::debug!(error = %err, "Unable to determine local network configuration");
        return None;
    }
    match socket.local_addr() {
        Ok(std::net::SocketAddr::V4(addr)) => Some(*addr.ip()),
        _ => None,
    }
}

/// All candidate hosts in the /24 around `local`, excluding `local`.
pub fn subnet_hosts(local: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = local.octets();
    (1..=254)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .filter(|host| *host != local)
        .collect()
}

/// Scan the local subnet for a backend instance.
///
/// Returns `None` both when the local network cannot be determined and
/// when no host answers - not-found is a signal for the caller's
/// fallback flow, never an error.
pub async fn discover(http: &reqwest::Client, config: &DiscoveryConfig) -> Option<DiscoveredServer> {
    let local = local_ipv4().await?;
    let hosts = subnet_hosts(local);
    tracing::info!(
        subnet = %format!("{}.{}.{}.0/24", local.octets()[0], local.octets()[1], local.octets()[2]),
        port = config.port,
        probes = config.max_probes,
        "Scanning for backend instances"
    );
    scan(http, &hosts, config).await
}

/// Probe an explicit candidate list, first match wins.
pub async fn scan(
    http: &reqwest::Client,
    hosts: &[Ipv4Addr],
    config: &DiscoveryConfig,
) -> Option<DiscoveredServer> {
    let mut probes = stream::iter(hosts.iter().copied())
        .map(|host| probe(http.clone(), host, config.port, config.probe_timeout))
        .buffer_unordered(config.max_probes.max(1));

    while let Some(result) = probes.next().await {
        if let Some(found) = result {
            tracing::info!(host = %found.host, "Discovered backend instance");
            // Dropping `probes` here abandons every outstanding and
            // not-yet-started probe.
            return Some(found);
        }
    }

    tracing::info!("Discovery scan completed without finding a backend");
    None
}

/// Probe one host: the identity endpoint must answer with the expected
/// shape within the timeout. Reachability alone is not enough - an
/// unrelated service could be listening on the port.
async fn probe(
    http: reqwest::Client,
    host: Ipv4Addr,
    port: u16,
    timeout: Duration,
) -> Option<DiscoveredServer> {
    let base = format!("http://{host}:{port}");
    if identity_check(&http, &base, timeout).await {
        Some(DiscoveredServer {
            host,
            base_url: base,
            probed_at: Instant::now(),
        })
    } else {
        None
    }
}

/// Shared identity check: GET the version endpoint and require a JSON
/// object carrying a string `version` field.
pub(crate) async fn identity_check(http: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let response = match http
        .get(url::version_url(base))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::trace!(base, error = %err, "Identity probe failed");
            return false;
        }
    };

    if !response.status().is_success() {
        tracing::trace!(base, status = %response.status(), "Identity probe rejected");
        return false;
    }

    match response.json::<serde_json::Value>().await {
        Ok(body) => {
            let valid = body.get("version").map(serde_json::Value::is_string) == Some(true);
            if !valid {
                tracing::debug!(base, "Endpoint answered but does not look like a backend");
            }
            valid
        }
        Err(_) => false,
    }
}
