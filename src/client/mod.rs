//! SMTP client
//!
//! [`SmtpClient`] owns a single connection to an SMTP server and sequences
//! every operation on it. It is cheap to clone and can be shared across
//! tasks: callers queue on an internal lock and run their exchange one at a
//! time, in arrival order.

use std::{
    fmt::{self, Debug},
    sync::{Arc, Mutex},
};

use tokio::io::AsyncRead;

use crate::{
    authentication::{Credentials, Mechanism, DEFAULT_MECHANISMS},
    commands::Command,
    error::{self, Error},
    extension::{ClientId, Extensions},
    lock::Lock,
    response::Response,
    SMTP_PORT,
};

mod connection;
mod net;

use self::connection::SmtpConnection;
pub use self::net::TlsParameters;

/// Encodes message content for the SMTP `DATA` payload
///
/// Performs the transparency transform of [RFC 5321, section
/// 4.5.2](https://tools.ietf.org/html/rfc5321#section-4.5.2): a dot at the
/// start of a line is doubled so it cannot read as the end-of-data mark, and
/// bare LF line endings are normalized to CRLF. [`finish`](Self::finish)
/// closes the payload with the `.` terminator, inserting a line break first
/// when the content does not end with one.
///
/// The codec is incremental: content may be fed in arbitrary chunks and the
/// output is identical to encoding it in one piece.
#[derive(Debug)]
pub(crate) struct DataCodec {
    /// Last input byte seen, `None` before the first byte
    last: Option<u8>,
}

impl DataCodec {
    /// Creates a new codec at start of payload
    pub(crate) fn new() -> DataCodec {
        DataCodec { last: None }
    }

    /// Encodes `chunk`, appending the wire form to `out`
    pub(crate) fn encode(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            match byte {
                // a line starts after an LF or at the start of the payload;
                // a dot anywhere else passes through untouched
                b'.' if matches!(self.last, None | Some(b'\n')) => {
                    out.extend_from_slice(b"..");
                }
                b'\n' if self.last != Some(b'\r') => out.extend_from_slice(b"\r\n"),
                _ => out.push(byte),
            }
            self.last = Some(byte);
        }
    }

    /// Appends the end-of-data terminator to `out`
    pub(crate) fn finish(&mut self, out: &mut Vec<u8>) {
        match self.last {
            Some(b'\n') => out.extend_from_slice(b".\r\n"),
            Some(b'\r') => out.extend_from_slice(b"\n.\r\n"),
            _ => out.extend_from_slice(b"\r\n.\r\n"),
        }
    }
}

pub(crate) fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}

enum Session {
    /// No connection has been established yet
    Idle,
    /// The handshake completed and the connection accepts commands
    Active(SmtpConnection),
    /// The connection was torn down; the client cannot be revived
    Destroyed,
}

#[derive(Debug)]
struct ClientInner {
    host: String,
    port: u16,
    hello_name: ClientId,
    mechanisms: Vec<Mechanism>,
    tls: Option<TlsParameters>,
    sequence: Lock,
    session: Mutex<Session>,
}

/// A sequenced client for a single SMTP server connection
///
/// Created through [`SmtpClientBuilder`]. The client is one-shot: once its
/// connection is destroyed (socket failure, `421` reply, or [`close`]) it
/// stays destroyed, and a fresh client must be built to reconnect.
///
/// [`close`]: SmtpClient::close
#[derive(Clone, Debug)]
pub struct SmtpClient {
    inner: Arc<ClientInner>,
}

impl SmtpClient {
    /// Creates a builder for a client talking to `host`
    pub fn builder<T: Into<String>>(host: T) -> SmtpClientBuilder {
        SmtpClientBuilder {
            host: host.into(),
            port: SMTP_PORT,
            hello_name: ClientId::default(),
            mechanisms: DEFAULT_MECHANISMS.to_vec(),
            tls: None,
        }
    }

    /// Establishes the connection and performs the SMTP handshake
    ///
    /// Calling `connect` while another task is already connecting waits for
    /// that attempt and observes its outcome; the handshake is never run
    /// twice. On an already-connected client this is a no-op. A failed
    /// attempt destroys the client.
    pub async fn connect(&self) -> Result<(), Error> {
        let _guard = self.inner.sequence.enter().await;

        {
            let session = self.session();
            match &*session {
                Session::Active(_) => return Ok(()),
                Session::Destroyed => {
                    return Err(error::connection("connection was destroyed"));
                }
                Session::Idle => {}
            }
        }

        match self.establish().await {
            Ok(conn) => {
                *self.session() = Session::Active(conn);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(error = %err, "connection attempt failed, client destroyed");
                *self.session() = Session::Destroyed;
                Err(err)
            }
        }
    }

    async fn establish(&self) -> Result<SmtpConnection, Error> {
        // port 465 is encrypted from the first byte, with or without
        // explicitly configured TLS parameters
        let tls = match &self.inner.tls {
            Some(tls) => Some(tls.clone()),
            None if self.inner.port == crate::SUBMISSIONS_PORT => {
                Some(TlsParameters::new(self.inner.host.clone())?)
            }
            None => None,
        };

        SmtpConnection::connect(
            &self.inner.host,
            self.inner.port,
            &self.inner.hello_name,
            tls.as_ref(),
        )
        .await
    }

    /// Authenticates using the configured mechanism preference
    ///
    /// The connection must be established first.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), Error> {
        let _guard = self.inner.sequence.enter().await;
        let mut conn = self.take_active()?;
        let result = conn.auth(&self.inner.mechanisms, credentials).await;
        self.settle(conn, result.as_ref().err());
        result.map(|_| ())
    }

    /// Sends a single command and returns the server reply
    ///
    /// A reply outside the command's accepted code set is returned as an
    /// error carrying the reply code.
    pub async fn command<C: Command>(&self, command: &C) -> Result<Response, Error> {
        let _guard = self.inner.sequence.enter().await;
        let mut conn = self.take_active()?;
        let result = conn.command(command).await;
        self.settle(conn, result.as_ref().err());
        result
    }

    /// Runs a `DATA` exchange carrying `message`
    ///
    /// `message` is raw content: dot-stuffing, line-ending normalization and
    /// the terminating dot are applied on the wire.
    pub async fn send_data(&self, message: &[u8]) -> Result<Response, Error> {
        let _guard = self.inner.sequence.enter().await;
        let mut conn = self.take_active()?;
        let result = conn.send_data(message).await;
        self.settle(conn, result.as_ref().err());
        result
    }

    /// Runs a `DATA` exchange reading the message content from `message`
    pub async fn send_data_stream<R>(&self, message: R) -> Result<Response, Error>
    where
        R: AsyncRead + Unpin,
    {
        let _guard = self.inner.sequence.enter().await;
        let mut conn = self.take_active()?;
        let result = conn.send_data_stream(message).await;
        self.settle(conn, result.as_ref().err());
        result
    }

    /// Whether the client currently holds a usable connection
    pub fn is_connected(&self) -> bool {
        matches!(&*self.session(), Session::Active(_))
    }

    /// Whether the connection is TLS-protected
    pub fn is_encrypted(&self) -> bool {
        match &*self.session() {
            Session::Active(conn) => conn.is_encrypted(),
            _ => false,
        }
    }

    /// The capability set the server advertised in its EHLO response
    pub fn extensions(&self) -> Option<Extensions> {
        match &*self.session() {
            Session::Active(conn) => Some(conn.extensions().clone()),
            _ => None,
        }
    }

    /// The AUTH mechanism names the server advertised, in server preference
    /// order
    pub fn supported_auth_methods(&self) -> Vec<String> {
        match &*self.session() {
            Session::Active(conn) => conn.extensions().auth_methods().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Shuts the connection down and destroys the client
    pub async fn close(&self) {
        let _guard = self.inner.sequence.enter().await;
        let taken = std::mem::replace(&mut *self.session(), Session::Destroyed);
        if let Session::Active(mut conn) = taken {
            conn.shutdown().await;
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner.session.lock().expect("session state poisoned")
    }

    /// Takes the connection out for an exchange
    ///
    /// The session is left `Destroyed` while the exchange runs: if the
    /// caller's future is dropped mid-exchange the wire state is unknown and
    /// the connection must not be reused. [`settle`](Self::settle) puts the
    /// connection back on a clean finish.
    fn take_active(&self) -> Result<SmtpConnection, Error> {
        let mut session = self.session();
        match std::mem::replace(&mut *session, Session::Destroyed) {
            Session::Active(conn) => Ok(conn),
            Session::Idle => {
                *session = Session::Idle;
                Err(error::client("connection has not been established"))
            }
            Session::Destroyed => Err(error::connection("connection was destroyed")),
        }
    }

    fn settle(&self, conn: SmtpConnection, err: Option<&Error>) {
        let fatal = err.map_or(false, |err| {
            err.is_network() || err.is_connection() || err.is_tls() || err.is_terminating()
        });
        if !fatal {
            *self.session() = Session::Active(conn);
        } else {
            // the connection stays out and its socket closes on drop
            tracing::debug!("connection lost, client destroyed");
        }
    }
}

/// Builder for [`SmtpClient`]
#[derive(Clone, Debug)]
pub struct SmtpClientBuilder {
    host: String,
    port: u16,
    hello_name: ClientId,
    mechanisms: Vec<Mechanism>,
    tls: Option<TlsParameters>,
}

impl SmtpClientBuilder {
    /// Sets the server port (default 25, see [`SUBMISSION_PORT`] and
    /// [`SUBMISSIONS_PORT`])
    ///
    /// [`SUBMISSION_PORT`]: crate::SUBMISSION_PORT
    /// [`SUBMISSIONS_PORT`]: crate::SUBMISSIONS_PORT
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the name sent in `EHLO`/`HELO` (default: local hostname)
    pub fn hello_name(mut self, name: ClientId) -> Self {
        self.hello_name = name;
        self
    }

    /// Sets the AUTH mechanism preference order used by
    /// [`login`](SmtpClient::login)
    pub fn authentication(mut self, mechanisms: Vec<Mechanism>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Enables TLS
    ///
    /// On port 465 the whole session is encrypted; on any other port the
    /// connection upgrades via `STARTTLS` when the server advertises it.
    pub fn tls(mut self, tls: TlsParameters) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Builds the client; no connection is made until
    /// [`connect`](SmtpClient::connect)
    pub fn build(self) -> SmtpClient {
        SmtpClient {
            inner: Arc::new(ClientInner {
                host: self.host,
                port: self.port,
                hello_name: self.hello_name,
                mechanisms: self.mechanisms,
                tls: self.tls,
                sequence: Lock::new(),
                session: Mutex::new(Session::Idle),
            }),
        }
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Idle => f.write_str("Session::Idle"),
            Session::Active(_) => f.write_str("Session::Active"),
            Session::Destroyed => f.write_str("Session::Destroyed"),
        }
    }
}
