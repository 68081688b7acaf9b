use std::fmt::{self, Debug};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{
    escape_crlf,
    net::{NetworkStream, TlsParameters},
    DataCodec,
};
use crate::{
    authentication::{select_mechanism, Credentials, Mechanism},
    commands::{
        AuthLogin, AuthLoginPassword, AuthLoginUser, AuthPlain, Command, Data, DataEnd, Ehlo,
        Greet, Helo, Starttls,
    },
    error::{self, Error},
    extension::{ClientId, Extensions},
    response::{Response, ResponseBuffer},
    SUBMISSIONS_PORT,
};

/// A connection to an SMTP server that has completed its handshake
///
/// Commands run strictly one at a time: each call writes the command and then
/// reads replies until a terminal reply line arrives. The `pending` slot
/// records the in-flight command so that a second send before the reply (for
/// example after a cancelled call left the wire mid-exchange) is rejected
/// instead of desynchronizing the exchange.
pub(crate) struct SmtpConnection {
    stream: NetworkStream,
    buffer: ResponseBuffer,
    pending: Option<&'static str>,
    extensions: Extensions,
}

impl SmtpConnection {
    /// Connects to `host:port` and performs the SMTP handshake
    ///
    /// Waits for the `220` greeting, sends `EHLO` (falling back to `HELO`
    /// when the server rejects it with a non-terminating reply), and when
    /// `tls` is given upgrades via `STARTTLS` if the server advertises it.
    /// Port 465 uses implicit TLS instead: the socket is encrypted before the
    /// greeting is read.
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        hello_name: &ClientId,
        tls: Option<&TlsParameters>,
    ) -> Result<SmtpConnection, Error> {
        let implicit_tls = if port == SUBMISSIONS_PORT { tls } else { None };
        let stream = NetworkStream::connect(host, port, implicit_tls).await?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!(%peer, "connection established");
        }

        let mut conn = SmtpConnection {
            stream,
            buffer: ResponseBuffer::new(),
            pending: None,
            extensions: Extensions::default(),
        };

        conn.command(&Greet).await?;
        conn.ehlo(hello_name).await?;

        if let Some(tls) = tls {
            if !conn.stream.is_encrypted() && conn.extensions.supports_starttls() {
                conn.command(&Starttls).await?;
                conn = conn.into_tls(tls).await?;
                // the server state was reset, so the capabilities must be
                // fetched again over the encrypted channel
                conn.ehlo(hello_name).await?;
            }
        }

        Ok(conn)
    }

    async fn ehlo(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        match self.command(&Ehlo::new(hello_name.clone())).await {
            Ok(response) => {
                self.extensions = Extensions::from_response(&response);
                Ok(())
            }
            // servers predating ESMTP reject EHLO outright; retry with HELO
            // unless the server is ending the session
            Err(err) if err.status().is_some() && !err.is_terminating() => {
                self.command(&Helo::new(hello_name.clone())).await?;
                self.extensions = Extensions::default();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn into_tls(self, tls: &TlsParameters) -> Result<SmtpConnection, Error> {
        let stream = self.stream.upgrade_tls(tls).await?;
        Ok(SmtpConnection {
            stream,
            // plaintext bytes received after the 220 reply are untrusted and
            // must not leak into the encrypted session
            buffer: ResponseBuffer::new(),
            pending: None,
            extensions: self.extensions,
        })
    }

    /// Sends `command` and reads its reply, checking the reply code against
    /// the command's accepted set
    pub(crate) async fn command<C: Command>(&mut self, command: &C) -> Result<Response, Error> {
        if let Some(in_flight) = self.pending {
            return Err(error::client(format!(
                "cannot send while {in_flight} is awaiting its reply"
            ))
            .with_command(command.tag()));
        }
        self.pending = Some(command.tag());

        if let Some(text) = command.text() {
            let line = format!("{text}\r\n");
            self.write_raw(line.as_bytes(), command.tag()).await?;
            tracing::debug!("Wrote: {}", escape_crlf(&line));
        }

        self.read_response(command.tag(), command.success_codes())
            .await
    }

    /// Authenticates with the first mechanism of `preference` the server
    /// advertises
    pub(crate) async fn auth(
        &mut self,
        preference: &[Mechanism],
        credentials: &Credentials,
    ) -> Result<Response, Error> {
        let mechanism = select_mechanism(preference, self.extensions.auth_methods())
            .ok_or_else(|| error::client("no supported auth methods").with_command("AUTH"))?;

        match mechanism {
            Mechanism::Plain => self.command(&AuthPlain::new(credentials.clone())).await,
            Mechanism::Login => {
                self.command(&AuthLogin).await?;
                self.command(&AuthLoginUser::new(credentials.clone())).await?;
                self.command(&AuthLoginPassword::new(credentials.clone()))
                    .await
            }
        }
    }

    /// Sends `message` as the payload of a `DATA` exchange
    ///
    /// The payload is passed through the dot-stuffing codec, so `message` is
    /// the raw message content, without terminating dot.
    pub(crate) async fn send_data(&mut self, message: &[u8]) -> Result<Response, Error> {
        self.command(&Data).await?;

        let mut codec = DataCodec::new();
        let mut wire = Vec::with_capacity(message.len() + 8);
        codec.encode(message, &mut wire);
        codec.finish(&mut wire);
        self.write_raw(&wire, "DATA").await?;
        tracing::debug!("Wrote {} bytes of message data", wire.len());

        self.command(&DataEnd).await
    }

    /// Like [`send_data`](Self::send_data), reading the message content from
    /// an async source chunk by chunk
    pub(crate) async fn send_data_stream<R>(&mut self, mut message: R) -> Result<Response, Error>
    where
        R: AsyncRead + Unpin,
    {
        self.command(&Data).await?;

        let mut codec = DataCodec::new();
        let mut chunk = [0u8; 8192];
        let mut wire = Vec::new();
        let mut total = 0usize;
        loop {
            let read = message
                .read(&mut chunk)
                .await
                .map_err(|err| error::client(err).with_command("DATA"))?;
            if read == 0 {
                break;
            }
            wire.clear();
            codec.encode(&chunk[..read], &mut wire);
            self.write_raw(&wire, "DATA").await?;
            total += wire.len();
        }
        wire.clear();
        codec.finish(&mut wire);
        self.write_raw(&wire, "DATA").await?;
        tracing::debug!("Wrote {} bytes of message data", total + wire.len());

        self.command(&DataEnd).await
    }

    pub(crate) fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    /// Closes the socket; the connection cannot be used afterwards
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn write_raw(&mut self, buf: &[u8], tag: &'static str) -> Result<(), Error> {
        self.stream
            .write_all(buf)
            .await
            .map_err(|err| error::network(err).with_command(tag))?;
        self.stream
            .flush()
            .await
            .map_err(|err| error::network(err).with_command(tag))
    }

    async fn read_response(
        &mut self,
        tag: &'static str,
        success_codes: &[u16],
    ) -> Result<Response, Error> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(response) = self.buffer.take_response() {
                self.pending = None;
                return if success_codes.contains(&u16::from(response.code())) {
                    Ok(response)
                } else {
                    // keep every line, multi-line rejections carry their
                    // diagnostics across all of them
                    let payload = response.message().collect::<Vec<_>>().join("\n");
                    let payload = (!payload.is_empty()).then_some(payload);
                    Err(error::code(response.code(), tag, payload))
                };
            }

            let read = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|err| error::network(err).with_command(tag))?;
            if read == 0 {
                return Err(
                    error::connection("connection closed by server").with_command(tag)
                );
            }
            tracing::debug!("<< {}", escape_crlf(&String::from_utf8_lossy(&chunk[..read])));
            self.buffer.feed(&chunk[..read]);
        }
    }
}

impl Debug for SmtpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("stream", &self.stream)
            .field("pending", &self.pending)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}
