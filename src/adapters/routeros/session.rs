//! RouterOS API session and the factory the connection pool uses to open it
//!
//! API-SSL (8729 by default) goes through rustls; port 8728 is plain TCP.
//! Commands on one session are serialized; any failure other than a device
//! trap marks the session dead so the pool replaces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

use super::wire::{encode_sentence, parse_reply, read_sentence, Attrs, Reply};
use crate::config::AdapterConfig;
use crate::error::DeviceError;
use crate::pool::{PoolKey, SessionFactory};

/// What the adapter needs from a pooled session
#[async_trait]
pub trait ApiCommand: Send + Sync {
    /// Run one command and collect its `!re` rows
    async fn command(
        &self,
        path: &str,
        args: &[(String, String)],
    ) -> Result<Vec<Attrs>, DeviceError>;
}

/// Plain-text API port; everything else is dialed with TLS
pub const PLAIN_API_PORT: u16 = 8728;

pub trait ApiStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ApiStream for T {}

pub struct ApiSession {
    stream: Mutex<Box<dyn ApiStream>>,
    read_timeout: Duration,
    peer: String,
    broken: AtomicBool,
}

impl ApiSession {
    pub fn new(stream: Box<dyn ApiStream>, read_timeout: Duration, peer: &str) -> Self {
        Self {
            stream: Mutex::new(stream),
            read_timeout,
            peer: peer.to_string(),
            broken: AtomicBool::new(false),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Post-6.43 plaintext login (the transport is already TLS)
    pub async fn login(&self, username: &str, password: &str) -> Result<(), DeviceError> {
        let args = vec![
            ("name".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ];
        let (_, done) = self
            .exchange("/login", &args)
            .await
            .map_err(|e| match e {
                DeviceError::Trap(msg) => DeviceError::Auth(msg),
                other => other,
            })?;

        if done.contains_key("ret") {
            return Err(DeviceError::Unsupported(
                "challenge login (RouterOS older than 6.43)".into(),
            ));
        }
        Ok(())
    }

    async fn exchange(
        &self,
        path: &str,
        args: &[(String, String)],
    ) -> Result<(Vec<Attrs>, Attrs), DeviceError> {
        if self.is_broken() {
            return Err(DeviceError::Closed(format!("session to {} is broken", self.peer)));
        }

        let mut stream = self.stream.lock().await;
        let result = self.exchange_locked(&mut **stream, path, args).await;

        // A trap arrives with its !done so the stream is still in step.
        // Anything else may have left part of a reply unread.
        if let Err(ref e) = result {
            if !matches!(e, DeviceError::Trap(_)) {
                self.broken.store(true, Ordering::Relaxed);
            }
        }
        result
    }

    async fn exchange_locked(
        &self,
        stream: &mut dyn ApiStream,
        path: &str,
        args: &[(String, String)],
    ) -> Result<(Vec<Attrs>, Attrs), DeviceError> {
        let mut words = Vec::with_capacity(args.len() + 1);
        words.push(path.to_string());
        for (key, value) in args {
            if key.starts_with('?') {
                // Query words are passed through as-is
                words.push(format!("{}={}", key, value));
            } else {
                words.push(format!("={}={}", key, value));
            }
        }

        let request = encode_sentence(&words);
        tokio::time::timeout(self.read_timeout, async {
            stream.write_all(&request).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| DeviceError::Timeout(format!("write to {}", self.peer)))??;

        let mut rows = Vec::new();
        let mut trap: Option<String> = None;

        loop {
            let sentence = tokio::time::timeout(self.read_timeout, read_sentence(stream))
                .await
                .map_err(|_| DeviceError::Timeout(format!("{} on {}", path, self.peer)))??;

            match parse_reply(&sentence)? {
                Reply::Re(attrs) => rows.push(attrs),
                Reply::Trap(attrs) => {
                    // A !done always follows a !trap; keep reading to stay in sync
                    trap = Some(
                        attrs
                            .get("message")
                            .cloned()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    );
                }
                Reply::Empty => {}
                Reply::Fatal(reason) => return Err(DeviceError::Closed(reason)),
                Reply::Done(attrs) => {
                    return match trap {
                        Some(message) => Err(DeviceError::Trap(message)),
                        None => Ok((rows, attrs)),
                    };
                }
            }
        }
    }

    /// Polite logout; errors are ignored because the session is going away anyway
    pub async fn close(&self) {
        let mut stream = self.stream.lock().await;
        let quit = encode_sentence(&["/quit"]);
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            stream.write_all(&quit).await?;
            stream.shutdown().await
        })
        .await;
        self.broken.store(true, Ordering::Relaxed);
        tracing::debug!("[RouterOS] Session to {} closed", self.peer);
    }
}

#[async_trait]
impl ApiCommand for ApiSession {
    async fn command(
        &self,
        path: &str,
        args: &[(String, String)],
    ) -> Result<Vec<Attrs>, DeviceError> {
        self.exchange(path, args).await.map(|(rows, _)| rows)
    }
}

/// Device certificates are self-signed; the API session only needs transport
/// encryption.
#[derive(Debug)]
struct AcceptDeviceCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptDeviceCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Opens authenticated API sessions for the pool
pub struct ApiSessionFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: TlsConnector,
}

impl ApiSessionFactory {
    pub fn new(config: &AdapterConfig) -> Result<Self, DeviceError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls_config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| DeviceError::Transport(format!("TLS setup: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptDeviceCert(provider)))
            .with_no_client_auth();

        Ok(Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            tls: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    async fn dial(&self, key: &PoolKey) -> Result<Box<dyn ApiStream>, DeviceError> {
        let addr = format!("{}:{}", key.host, key.port);
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DeviceError::Timeout(format!("connect to {}", addr)))??;
        let _ = tcp.set_nodelay(true);

        if key.port == PLAIN_API_PORT {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(key.host.clone())
            .map_err(|e| DeviceError::Transport(format!("invalid host {}: {}", key.host, e)))?;
        let tls = tokio::time::timeout(self.connect_timeout, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| DeviceError::Timeout(format!("TLS handshake with {}", addr)))?
            .map_err(|e| DeviceError::Transport(format!("TLS handshake with {}: {}", addr, e)))?;
        Ok(Box::new(tls))
    }
}

#[async_trait]
impl SessionFactory for ApiSessionFactory {
    type Session = ApiSession;

    async fn open(&self, key: &PoolKey, password: &str) -> Result<ApiSession, DeviceError> {
        let stream = self.dial(key).await?;
        let session = ApiSession::new(stream, self.read_timeout, &key.host);
        session.login(&key.identity, password).await?;
        tracing::info!("[RouterOS] Logged in to {}", key);
        Ok(session)
    }

    async fn close(&self, session: Arc<ApiSession>) {
        session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn session(mock: tokio_test::io::Mock) -> ApiSession {
        ApiSession::new(Box::new(mock), Duration::from_secs(5), "10.0.0.1")
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/login", "=name=admin", "=password=pw"]))
            .read(&encode_sentence(&["!done"]))
            .build();
        tokio_test::assert_ok!(session(mock).login("admin", "pw").await);
    }

    #[tokio::test]
    async fn test_login_rejected_is_auth_error() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/login", "=name=admin", "=password=bad"]))
            .read(&encode_sentence(&["!trap", "=message=invalid user name or password (6)"]))
            .read(&encode_sentence(&["!done"]))
            .build();
        let err = session(mock).login("admin", "bad").await.unwrap_err();
        assert!(matches!(err, DeviceError::Auth(_)));
    }

    #[tokio::test]
    async fn test_legacy_challenge_is_unsupported() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/login", "=name=admin", "=password=pw"]))
            .read(&encode_sentence(&["!done", "=ret=ebddd18303a54111e2dea05a92ab46b4"]))
            .build();
        let err = session(mock).login("admin", "pw").await.unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_command_collects_rows() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/interface/print", "?type=ether"]))
            .read(&encode_sentence(&["!re", "=name=ether1"]))
            .read(&encode_sentence(&["!re", "=name=ether2"]))
            .read(&encode_sentence(&["!done"]))
            .build();
        let rows = session(mock)
            .command("/interface/print", &[("?type".into(), "ether".into())])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], "ether2");
    }

    #[tokio::test]
    async fn test_fatal_marks_session_broken() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/system/resource/print"]))
            .read(&encode_sentence(&["!fatal", "not logged in"]))
            .build();
        let s = session(mock);
        let err = s.command("/system/resource/print", &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Closed(_)));
        assert!(s.is_broken());

        // Subsequent calls fail fast without touching the stream
        let again = s.command("/system/resource/print", &[]).await.unwrap_err();
        assert!(again.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_reply_marks_session_broken() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/system/resource/print"]))
            .read(&encode_sentence(&["!bogus"]))
            .build();
        let s = session(mock);
        let err = s.command("/system/resource/print", &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
        assert!(s.is_broken());

        // The leftover reply is never read as the answer to the next command
        let again = s.command("/interface/print", &[]).await.unwrap_err();
        assert!(matches!(again, DeviceError::Closed(_)));
    }

    #[tokio::test]
    async fn test_trap_keeps_session_usable() {
        let mock = Builder::new()
            .write(&encode_sentence(&["/interface/wifi/print"]))
            .read(&encode_sentence(&["!trap", "=message=no such command prefix"]))
            .read(&encode_sentence(&["!done"]))
            .write(&encode_sentence(&["/interface/print"]))
            .read(&encode_sentence(&["!re", "=name=ether1"]))
            .read(&encode_sentence(&["!done"]))
            .build();
        let s = session(mock);
        let err = s.command("/interface/wifi/print", &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Trap(_)));
        assert!(!s.is_broken());

        let rows = s.command("/interface/print", &[]).await.unwrap();
        assert_eq!(rows[0]["name"], "ether1");
    }
}
