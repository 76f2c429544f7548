//! Upstream connections
//!
//! One fresh connection per forwarded request; plain TCP for `http` targets,
//! rustls over TCP for `https` targets.

use crate::config::{UpstreamScheme, UpstreamTarget};
use futures::future::BoxFuture;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
#[cfg(test)]
use tokio::io::DuplexStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use webpki_roots::TLS_SERVER_ROOTS;

/// Opens connections to proxy targets.
pub trait UpstreamConnector: Send + Sync {
    fn connect<'a>(&'a self, target: &'a UpstreamTarget) -> BoxFuture<'a, io::Result<UpstreamStream>>;
}

fn build_tls_client_config() -> ClientConfig {
    let root_store = RootCertStore::from_iter(TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

/// Connector backed by real sockets.
pub struct TcpConnector {
    tls_client_config: Option<Arc<ClientConfig>>,
}

impl TcpConnector {
    /// TLS client state is only built when some target needs it.
    pub fn new(enable_tls: bool) -> Self {
        Self {
            tls_client_config: enable_tls.then(|| Arc::new(build_tls_client_config())),
        }
    }

    async fn open(&self, target: &UpstreamTarget) -> io::Result<UpstreamStream> {
        let stream = TcpStream::connect(target.socket_addr()).await?;
        let _ = stream.set_nodelay(true);

        match target.scheme {
            UpstreamScheme::Http => Ok(UpstreamStream::Plain(stream)),
            UpstreamScheme::Https => {
                let config = self.tls_client_config.clone().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "TLS client config unavailable")
                })?;
                let server_name = ServerName::try_from(target.host.clone()).map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid server name {}", target.host),
                    )
                })?;
                let tls = TlsConnector::from(config)
                    .connect(server_name, stream)
                    .await?;
                Ok(UpstreamStream::Tls(Box::new(tls)))
            }
        }
    }
}

impl UpstreamConnector for TcpConnector {
    fn connect<'a>(&'a self, target: &'a UpstreamTarget) -> BoxFuture<'a, io::Result<UpstreamStream>> {
        Box::pin(self.open(target))
    }
}

pub enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(test)]
    Mock(DuplexStream),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(test)]
            UpstreamStream::Mock(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_write(cx, data),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, data),
            #[cfg(test)]
            UpstreamStream::Mock(stream) => Pin::new(stream).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(test)]
            UpstreamStream::Mock(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(test)]
            UpstreamStream::Mock(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
