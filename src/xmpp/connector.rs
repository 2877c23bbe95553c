//! Transports for the chat stream.
//!
//! [`TlsConnector`] is used against the real chat servers. [`TcpConnector`] speaks plain TCP and
//! exists for local relays and tests.

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::error::StreamError;

/// A bidirectional byte stream the chat protocol runs over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens a [`Transport`] to a chat server.
#[async_trait]
pub trait Connector: fmt::Debug + Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport, StreamError>;
}

/// TLS over TCP, trusting the platform's root certificates.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

impl TlsConnector {
    pub fn new() -> Result<Self, StreamError> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();

        #[cfg(feature = "tracing")]
        for e in &native.errors {
            tracing::warn!(error = %e, "unable to load a platform certificate");
        }

        let (added, _ignored) = roots.add_parsable_certificates(native.certs);
        if added == 0 {
            return Err(StreamError::Tls(io::Error::new(
                io::ErrorKind::NotFound,
                "no usable root certificates found",
            )));
        }

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| StreamError::Tls(io::Error::other(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport, StreamError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(StreamError::Connect)?;

        let name = ServerName::try_from(host.to_owned())
            .map_err(|e| StreamError::Tls(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let stream = self
            .inner
            .connect(name, tcp)
            .await
            .map_err(StreamError::Tls)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(host, port, "TLS established");

        Ok(Box::new(stream))
    }
}

/// Plain, unencrypted TCP.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedTransport, StreamError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(StreamError::Connect)?;
        tcp.set_nodelay(true).map_err(StreamError::Connect)?;

        Ok(Box::new(tcp))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_connector_round_trips_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            socket.write_all(b"<presence/>").await?;
            io::Result::Ok(())
        });

        let mut transport = TcpConnector.connect("127.0.0.1", port).await?;
        let mut buf = [0_u8; 16];
        let read = transport.read(&mut buf).await?;

        assert_eq!(&buf[..read], b"<presence/>");
        server.await??;

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_host_is_connect_error() -> io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        // `BoxedTransport` is not `Debug`, so `unwrap_err` is unavailable here.
        let Err(err) = TcpConnector.connect("127.0.0.1", port).await else {
            panic!("connecting to a closed port should fail");
        };

        assert!(
            matches!(err, StreamError::Connect(_)),
            "unexpected error: {err:?}"
        );

        Ok(())
    }
}
