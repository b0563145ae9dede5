//! Authenticated RouterOS API session
//!
//! A [`Session`] is owned by the operation that opened it and is closed on
//! every exit path, either through [`Session::close`] or by dropping it,
//! which releases the socket.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, trace, warn};

use super::codec::{Attributes, Reply, read_sentence, write_sentence};
use super::error::{DeviceError, DeviceResult};

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Timeouts applied to one session
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Connect, TLS handshake and login
    pub connect_timeout: Duration,

    /// One command round trip
    pub command_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(15),
        }
    }
}

/// Where and how to reach a device
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub use_tls: bool,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

pub struct Session {
    stream: Option<Box<dyn Stream>>,
    endpoint: Endpoint,
    command_timeout: Duration,
}

impl Session {
    /// Connect and log in.
    #[instrument(skip(endpoint, username, password, options), fields(endpoint = %endpoint))]
    pub async fn connect(
        endpoint: &Endpoint,
        username: &str,
        password: &str,
        options: SessionOptions,
    ) -> DeviceResult<Self> {
        let limit = options.connect_timeout;
        let target = endpoint.to_string();

        trace!("opening TCP connection");
        let tcp = timeout(limit, TcpStream::connect(&target))
            .await
            .map_err(|_| DeviceError::Timeout(limit))?
            .map_err(|e| DeviceError::Offline {
                address: target.clone(),
                reason: e.to_string(),
            })?;

        let stream: Box<dyn Stream> = if endpoint.use_tls {
            trace!("starting TLS handshake");
            let tls = timeout(limit, tls_handshake(&endpoint.address, tcp))
                .await
                .map_err(|_| DeviceError::Timeout(limit))??;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let mut session = Self {
            stream: Some(stream),
            endpoint: endpoint.clone(),
            command_timeout: options.command_timeout,
        };

        match timeout(limit, session.login(username, password)).await {
            Ok(Ok(())) => {
                debug!("session established");
                Ok(session)
            }
            Ok(Err(e)) => {
                session.close().await;
                Err(e)
            }
            Err(_) => {
                session.close().await;
                Err(DeviceError::Timeout(limit))
            }
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> DeviceResult<()> {
        let words = [
            "/login".to_string(),
            format!("=name={username}"),
            format!("=password={password}"),
        ];

        match self.exchange(&words).await {
            Ok(_) => Ok(()),
            Err(DeviceError::Rejected(reason)) => {
                debug!("login rejected: {reason}");
                Err(DeviceError::AuthFailure(username.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Run one command and collect its `!re` rows.
    ///
    /// `words` is the command path followed by attribute and query words.
    #[instrument(skip(self, words), fields(endpoint = %self.endpoint, command = %words.first().map(String::as_str).unwrap_or("")))]
    pub async fn run(&mut self, words: &[String]) -> DeviceResult<Vec<Attributes>> {
        let limit = self.command_timeout;
        match timeout(limit, self.exchange(words)).await {
            Ok(result) => result,
            Err(_) => {
                // framing state is unknown after an interrupted exchange
                self.close().await;
                Err(DeviceError::Timeout(limit))
            }
        }
    }

    /// Shorthand for a command without arguments.
    pub async fn query(&mut self, path: &str) -> DeviceResult<Vec<Attributes>> {
        self.run(&[path.to_string()]).await
    }

    async fn exchange(&mut self, words: &[String]) -> DeviceResult<Vec<Attributes>> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(DeviceError::ProtocolError("session is closed".to_string()));
        };

        write_sentence(stream, words).await?;

        let mut rows = Vec::new();
        let mut trap = None;

        loop {
            let sentence = read_sentence(stream).await?;
            match Reply::parse(&sentence)? {
                Reply::Row(attrs) => rows.push(attrs),
                Reply::Empty => {}
                Reply::Trap(message) => trap = Some(message),
                Reply::Done(_) => break,
                Reply::Fatal(message) => {
                    self.stream = None;
                    return Err(DeviceError::ProtocolError(format!(
                        "device closed the session: {message}"
                    )));
                }
            }
        }

        match trap {
            Some(message) => Err(DeviceError::Rejected(message)),
            None => Ok(rows),
        }
    }

    /// Close the session. Errors on the way out are ignored.
    pub async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        let quit = timeout(Duration::from_secs(1), async {
            let _ = write_sentence(&mut stream, &["/quit"]).await;
            let _ = stream.shutdown().await;
        });

        if quit.await.is_err() {
            warn!(endpoint = %self.endpoint, "session did not close cleanly");
        }
        trace!(endpoint = %self.endpoint, "session closed");
    }
}

async fn tls_handshake(
    address: &str,
    tcp: TcpStream,
) -> DeviceResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| DeviceError::ProtocolError(format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptDeviceCertificate(provider)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(address.to_string())
        .map_err(|e| DeviceError::InvalidInput(format!("invalid device address: {e}")))?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| DeviceError::ProtocolError(format!("TLS handshake failed: {e}")))
}

/// Devices ship self-signed certificates, so the chain is not checked.
/// Handshake signatures still are.
#[derive(Debug)]
struct AcceptDeviceCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptDeviceCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
