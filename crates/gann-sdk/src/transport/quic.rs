//! quinn-backed implementation of the transport seam.
//!
//! Direct peers authenticate each other by certificate fingerprint: each
//! side generates a self-signed certificate, advertises its SHA-256 digest
//! in the offer, and the dialing side pins exactly that digest. The relay
//! transport pins the directory-advertised relay fingerprint the same way.

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use gann_common::offer::normalize_candidates;
use gann_common::{QuicOffer, QuicRelayInfo};

use crate::error::{Error, Result};
use crate::transport::{
    BiStream, PeerClient, PeerConnection, PeerServer, RelayClient, RelayDataFrame, RelayTransport,
    TransportFactory,
};

const PEER_ALPN: &str = "gann-peer";
const PEER_SERVER_NAME: &str = "gann-peer";
const RELAY_ALPN: &str = "gann-relay";
const RELAY_SERVER_NAME: &str = "gann-relay";

const DEFAULT_READ_CHUNK: usize = 64 * 1024;
const MAX_RELAY_FRAME: usize = 1_048_576;

static INSTALL_PROVIDER: Once = Once::new();

pub(crate) fn ensure_crypto_provider() {
    INSTALL_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Accepts exactly the certificate whose SHA-256 digest was advertised.
#[derive(Debug)]
struct FingerprintVerifier {
    expected: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
    fn from_hex(fingerprint_hex: &str) -> Result<Self> {
        let expected = hex_decode(fingerprint_hex)
            .filter(|bytes| bytes.len() == 32)
            .ok_or_else(|| {
                Error::validation("offer carries a malformed sha-256 fingerprint")
            })?;
        Ok(Self {
            expected,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() == self.expected.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn pinned_client_config(fingerprint_hex: &str, alpn: &str) -> Result<quinn::ClientConfig> {
    let verifier = FingerprintVerifier::from_hex(fingerprint_hex)?;
    let mut tls = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    tls.alpn_protocols = vec![alpn.as_bytes().to_vec()];
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls).map_err(Error::transport)?;
    Ok(quinn::ClientConfig::new(Arc::new(crypto)))
}

/// quinn-backed [`TransportFactory`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QuicTransportFactory;

impl QuicTransportFactory {
    /// Creates the factory, installing the process crypto provider on first
    /// use.
    #[must_use]
    pub fn new() -> Self {
        ensure_crypto_provider();
        Self
    }
}

#[async_trait]
impl TransportFactory for QuicTransportFactory {
    async fn peer_server(&self, bind_addr: SocketAddr) -> Result<Box<dyn PeerServer>> {
        Ok(Box::new(QuicPeerServer::bind(bind_addr)?))
    }

    async fn peer_client(&self, bind_addr: SocketAddr) -> Result<Box<dyn PeerClient>> {
        Ok(Box::new(QuicPeerClient::bind(bind_addr)?))
    }

    async fn relay_client(&self, bind_addr: SocketAddr) -> Result<Box<dyn RelayClient>> {
        Ok(Box::new(QuicRelayClient::bind(bind_addr)?))
    }
}

/// Direct-path listener with a fresh self-signed identity.
pub struct QuicPeerServer {
    endpoint: quinn::Endpoint,
    cert_der: CertificateDer<'static>,
    fingerprint_hex: String,
}

impl QuicPeerServer {
    /// Binds a QUIC listener and generates its certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when certificate generation or the UDP
    /// bind fails.
    pub fn bind(bind_addr: SocketAddr) -> Result<Self> {
        ensure_crypto_provider();
        let certified = rcgen::generate_simple_self_signed(vec![PEER_SERVER_NAME.to_string()])
            .map_err(Error::transport)?;
        let cert_der: CertificateDer<'static> = certified.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        let fingerprint_hex = hex_encode(&Sha256::digest(cert_der.as_ref()));

        let mut tls = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], PrivateKeyDer::Pkcs8(key_der))
            .map_err(Error::transport)?;
        tls.alpn_protocols = vec![PEER_ALPN.as_bytes().to_vec()];
        let crypto =
            quinn::crypto::rustls::QuicServerConfig::try_from(tls).map_err(Error::transport)?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

        let endpoint = quinn::Endpoint::server(server_config, bind_addr).map_err(Error::transport)?;
        debug!(addr = %endpoint.local_addr().map(|a| a.to_string()).unwrap_or_default(), "peer server bound");
        Ok(Self {
            endpoint,
            cert_der,
            fingerprint_hex,
        })
    }
}

#[async_trait]
impl PeerServer for QuicPeerServer {
    fn offer(&self, advertised_candidates: Option<&[String]>) -> QuicOffer {
        let candidates = match advertised_candidates {
            Some(candidates) => candidates.to_vec(),
            None => self
                .endpoint
                .local_addr()
                .map(|addr| vec![addr.to_string()])
                .unwrap_or_default(),
        };
        QuicOffer {
            candidates: normalize_candidates(&candidates),
            cert_der_b64: BASE64.encode(self.cert_der.as_ref()),
            fingerprint_sha256: self.fingerprint_hex.clone(),
            alpn: PEER_ALPN.to_string(),
            server_name: PEER_SERVER_NAME.to_string(),
            e2ee_pubkey_b64: None,
        }
    }

    async fn accept(&self) -> Result<Box<dyn PeerConnection>> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| Error::transport("peer server endpoint closed"))?;
        let connection = incoming.await.map_err(Error::transport)?;
        debug!(remote = %connection.remote_address(), "direct peer accepted");
        Ok(Box::new(QuicPeerConnection {
            connection,
            endpoint: self.endpoint.clone(),
        }))
    }

    fn close(&self) {
        self.endpoint.close(0u32.into(), b"closed");
    }
}

/// Direct-path dialer.
pub struct QuicPeerClient {
    endpoint: quinn::Endpoint,
}

impl QuicPeerClient {
    /// Binds a client endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the UDP bind fails.
    pub fn bind(bind_addr: SocketAddr) -> Result<Self> {
        ensure_crypto_provider();
        let endpoint = quinn::Endpoint::client(bind_addr).map_err(Error::transport)?;
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl PeerClient for QuicPeerClient {
    async fn connect(&self, offer: &QuicOffer) -> Result<Box<dyn PeerConnection>> {
        let config = pinned_client_config(&offer.fingerprint_sha256, &offer.alpn)?;
        let server_name = if offer.server_name.is_empty() {
            PEER_SERVER_NAME
        } else {
            offer.server_name.as_str()
        };

        let mut last_error = Error::validation("offer carries no usable candidates");
        for candidate in &offer.candidates {
            let Ok(addr) = candidate.parse::<SocketAddr>() else {
                continue;
            };
            let connecting = match self.endpoint.connect_with(config.clone(), addr, server_name) {
                Ok(connecting) => connecting,
                Err(e) => {
                    last_error = Error::transport(e);
                    continue;
                }
            };
            match connecting.await {
                Ok(connection) => {
                    debug!(remote = %connection.remote_address(), "direct peer connected");
                    return Ok(Box::new(QuicPeerConnection {
                        connection,
                        endpoint: self.endpoint.clone(),
                    }));
                }
                Err(e) => last_error = Error::transport(e),
            }
        }
        Err(last_error)
    }
}

/// An established direct connection. Keeps an endpoint handle so the UDP
/// driver outlives the factory objects that created it.
pub struct QuicPeerConnection {
    connection: quinn::Connection,
    #[allow(dead_code)]
    endpoint: quinn::Endpoint,
}

#[async_trait]
impl PeerConnection for QuicPeerConnection {
    async fn open_bi(&self) -> Result<Box<dyn BiStream>> {
        let (send, recv) = self.connection.open_bi().await.map_err(Error::transport)?;
        Ok(Box::new(QuicBiStream {
            send: Some(send),
            recv: Some(recv),
        }))
    }

    async fn accept_bi(&self) -> Result<Box<dyn BiStream>> {
        let (send, recv) = self.connection.accept_bi().await.map_err(Error::transport)?;
        Ok(Box::new(QuicBiStream {
            send: Some(send),
            recv: Some(recv),
        }))
    }

    fn close(&self) {
        self.connection.close(0u32.into(), b"closed");
    }
}

/// A bidirectional QUIC stream pair.
pub struct QuicBiStream {
    send: Option<quinn::SendStream>,
    recv: Option<quinn::RecvStream>,
}

#[async_trait]
impl BiStream for QuicBiStream {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let send = self
            .send
            .as_mut()
            .ok_or_else(|| Error::transport("send stream closed"))?;
        send.write_all(data).await.map_err(Error::transport)
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut send) = self.send.take() {
            send.finish().map_err(Error::transport)?;
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: Option<usize>) -> Result<Option<Vec<u8>>> {
        let Some(recv) = self.recv.as_mut() else {
            return Ok(None);
        };
        let max = max_bytes.unwrap_or(DEFAULT_READ_CHUNK);
        match recv.read_chunk(max, true).await.map_err(Error::transport)? {
            Some(chunk) => Ok(Some(chunk.bytes.to_vec())),
            None => {
                // FIN
                self.recv = None;
                Ok(None)
            }
        }
    }
}

/// Relay dialer.
pub struct QuicRelayClient {
    endpoint: quinn::Endpoint,
}

impl QuicRelayClient {
    /// Binds a client endpoint for the relay path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the UDP bind fails.
    pub fn bind(bind_addr: SocketAddr) -> Result<Self> {
        ensure_crypto_provider();
        let endpoint = quinn::Endpoint::client(bind_addr).map_err(Error::transport)?;
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl RelayClient for QuicRelayClient {
    async fn connect_transport(&self, relay: &QuicRelayInfo) -> Result<Box<dyn RelayTransport>> {
        let addr: SocketAddr = relay
            .quic_addr
            .parse()
            .map_err(|_| Error::validation(format!("invalid relay address: {}", relay.quic_addr)))?;
        let alpn = relay.alpn.as_deref().unwrap_or(RELAY_ALPN);
        let server_name = relay.server_name.as_deref().unwrap_or(RELAY_SERVER_NAME);
        let config = pinned_client_config(&relay.server_fingerprint_sha256, alpn)?;

        let connection = self
            .endpoint
            .connect_with(config, addr, server_name)
            .map_err(Error::transport)?
            .await
            .map_err(Error::transport)?;
        debug!(remote = %connection.remote_address(), "relay transport connected");
        Ok(Box::new(QuicRelayTransport {
            connection,
            endpoint: self.endpoint.clone(),
        }))
    }
}

/// Relay connection speaking the JSON-framed relay protocol: requests go out
/// on fresh streams, forwarded frames arrive on relay-initiated
/// unidirectional streams.
pub struct QuicRelayTransport {
    connection: quinn::Connection,
    #[allow(dead_code)]
    endpoint: quinn::Endpoint,
}

impl QuicRelayTransport {
    async fn request(&self, body: &Value) -> Result<Value> {
        let (mut send, mut recv) = self.connection.open_bi().await.map_err(Error::transport)?;
        let encoded = serde_json::to_vec(body).map_err(Error::transport)?;
        send.write_all(&encoded).await.map_err(Error::transport)?;
        send.finish().map_err(Error::transport)?;
        let response = recv
            .read_to_end(MAX_RELAY_FRAME)
            .await
            .map_err(Error::transport)?;
        serde_json::from_slice(&response).map_err(Error::transport)
    }
}

#[async_trait]
impl RelayTransport for QuicRelayTransport {
    async fn relay_bind(&self, token: &str, session_id: &str) -> Result<bool> {
        let response = self
            .request(&json!({
                "op": "bind",
                "token": token,
                "session_id": session_id,
            }))
            .await?;
        Ok(response
            .get("peer_ready")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn relay_send(&self, token: &str, session_id: &str, payload: &Value) -> Result<()> {
        let mut send = self.connection.open_uni().await.map_err(Error::transport)?;
        let frame = json!({
            "op": "send",
            "token": token,
            "session_id": session_id,
            "payload": payload,
        });
        let encoded = serde_json::to_vec(&frame).map_err(Error::transport)?;
        send.write_all(&encoded).await.map_err(Error::transport)?;
        send.finish().map_err(Error::transport)?;
        Ok(())
    }

    async fn recv_relay_data(&self) -> Result<RelayDataFrame> {
        let mut recv = self.connection.accept_uni().await.map_err(Error::transport)?;
        let frame = recv
            .read_to_end(MAX_RELAY_FRAME)
            .await
            .map_err(Error::transport)?;
        serde_json::from_slice(&frame).map_err(Error::transport)
    }

    fn close(&self) {
        self.connection.close(0u32.into(), b"closed");
    }
}
