use std::{
    fmt::{self, Debug},
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::{self, Error};

/// Parameters for a TLS session with an SMTP server
///
/// Server certificates are verified against the bundled Mozilla root set
/// ([`webpki_roots`]).
#[derive(Clone)]
pub struct TlsParameters {
    domain: String,
    connector: TlsConnector,
}

impl TlsParameters {
    /// Creates parameters verifying certificates for `domain`
    pub fn new(domain: String) -> Result<TlsParameters, Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::new_with_root_certificates(domain, roots)
    }

    /// Creates parameters trusting `roots` instead of the bundled set
    ///
    /// For servers whose certificates chain to a private CA.
    pub fn new_with_root_certificates(
        domain: String,
        roots: RootCertStore,
    ) -> Result<TlsParameters, Error> {
        // reject names rustls cannot use before any socket is opened
        ServerName::try_from(domain.clone()).map_err(error::tls)?;

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(TlsParameters {
            domain,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// The domain certificates are checked against
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn server_name(&self) -> Result<ServerName<'static>, Error> {
        ServerName::try_from(self.domain.clone()).map_err(error::tls)
    }
}

impl Debug for TlsParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsParameters")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// A plain or TLS-wrapped TCP connection to an SMTP server
pub(crate) enum NetworkStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl NetworkStream {
    /// Opens a TCP connection, wrapping it in TLS immediately when
    /// `implicit_tls` is set (SMTPS, port 465)
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        implicit_tls: Option<&TlsParameters>,
    ) -> Result<NetworkStream, Error> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(error::connection)?;

        match implicit_tls {
            Some(tls) => NetworkStream::Plain(tcp).upgrade_tls(tls).await,
            None => Ok(NetworkStream::Plain(tcp)),
        }
    }

    /// Wraps the underlying TCP stream in TLS
    ///
    /// Used for the STARTTLS upgrade; no bytes may be in flight when called.
    pub(crate) async fn upgrade_tls(self, tls: &TlsParameters) -> Result<NetworkStream, Error> {
        match self {
            NetworkStream::Plain(tcp) => {
                let stream = tls
                    .connector
                    .connect(tls.server_name()?, tcp)
                    .await
                    .map_err(error::tls)?;
                Ok(NetworkStream::Tls(Box::new(stream)))
            }
            NetworkStream::Tls(_) => Err(error::client("connection is already encrypted")),
        }
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(self, NetworkStream::Tls(_))
    }

    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            NetworkStream::Plain(tcp) => tcp.peer_addr(),
            NetworkStream::Tls(tls) => tls.get_ref().0.peer_addr(),
        }
    }
}

impl Debug for NetworkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStream::Plain(_) => f.write_str("NetworkStream::Plain"),
            NetworkStream::Tls(_) => f.write_str("NetworkStream::Tls"),
        }
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            NetworkStream::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetworkStream::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            NetworkStream::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            NetworkStream::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            NetworkStream::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}
