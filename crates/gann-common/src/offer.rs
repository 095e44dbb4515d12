//! QUIC offer and relay-info shapes exchanged through signaling.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Initiator-advertised QUIC parameters.
///
/// Opaque to the signaling layer; produced and consumed by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuicOffer {
    /// Reachable `host:port` candidates for the direct path.
    #[serde(default)]
    pub candidates: Vec<String>,
    /// DER certificate of the offering endpoint, base64.
    #[serde(default)]
    pub cert_der_b64: String,
    /// SHA-256 fingerprint of the certificate, lowercase hex.
    #[serde(default)]
    pub fingerprint_sha256: String,
    /// ALPN protocol the endpoint expects.
    #[serde(default)]
    pub alpn: String,
    /// TLS server name the endpoint presents.
    #[serde(default)]
    pub server_name: String,
    /// Optional X25519 public key for end-to-end sealing, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2ee_pubkey_b64: Option<String>,
}

/// Directory-provided relay coordinates for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuicRelayInfo {
    /// Session the relay binding is scoped to.
    #[serde(default)]
    pub session_id: String,
    /// `host:port` of the relay's QUIC listener.
    #[serde(default)]
    pub quic_addr: String,
    /// SHA-256 fingerprint of the relay certificate, lowercase hex.
    #[serde(default)]
    pub server_fingerprint_sha256: String,
    /// ALPN protocol the relay expects, when it deviates from the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    /// TLS server name of the relay, when it deviates from the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

/// Rewrites any-address candidates to their loopback equivalents.
///
/// A peer that bound `0.0.0.0:p` or `[::]:p` would otherwise advertise an
/// address the remote side cannot dial; `127.0.0.1:p` / `[::1]:p` at least
/// reach co-located peers. Unparseable entries pass through untouched.
#[must_use]
pub fn normalize_candidates(candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .map(|candidate| match candidate.parse::<SocketAddr>() {
            Ok(mut addr) if addr.ip().is_unspecified() => {
                match addr.ip() {
                    IpAddr::V4(_) => addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                    IpAddr::V6(_) => addr.set_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)),
                }
                addr.to_string()
            }
            _ => candidate.clone(),
        })
        .collect()
}
