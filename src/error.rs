//! Error type for the SMTP client engine

use std::{error::Error as StdError, fmt};

use crate::{response::Code, BoxError};

// Inspired by https://github.com/seanmonstar/reqwest/blob/a8566383168c0ef06c21f38cbc9213af6ff6db31/src/error.rs

/// The Errors that may occur when talking to an SMTP relay
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    command: Option<&'static str>,
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                command: None,
                source: source.map(Into::into),
            }),
        }
    }

    pub(crate) fn with_command(mut self, command: &'static str) -> Error {
        self.inner.command = Some(command);
        self
    }

    /// Returns true if the error is a caller contract violation
    pub fn is_client(&self) -> bool {
        matches!(self.inner.kind, Kind::Client)
    }

    /// Returns true if the error is a transient SMTP error (4yz reply)
    pub fn is_transient(&self) -> bool {
        matches!(self.inner.kind, Kind::Transient(_))
    }

    /// Returns true if the error is a permanent SMTP error (5yz reply)
    pub fn is_permanent(&self) -> bool {
        matches!(self.inner.kind, Kind::Permanent(_))
    }

    /// Returns true if the connection to the server was lost or torn down
    pub fn is_connection(&self) -> bool {
        matches!(self.inner.kind, Kind::Connection)
    }

    /// Returns true if the error comes from the network transport
    pub fn is_network(&self) -> bool {
        matches!(self.inner.kind, Kind::Network)
    }

    /// Returns true if the error comes from TLS setup
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// Returns true if the server is unilaterally ending the session
    ///
    /// A terminating reply (421 service not available) must propagate to the
    /// caller instead of triggering local recovery such as the HELO fallback.
    pub fn is_terminating(&self) -> bool {
        self.status().map_or(false, |code| u16::from(code) == 421)
    }

    /// Returns the status code, if the error was generated from a reply
    pub fn status(&self) -> Option<Code> {
        match self.inner.kind {
            Kind::Transient(code) | Kind::Permanent(code) => Some(code),
            _ => None,
        }
    }

    /// Returns the command the failing reply was answering, when known
    pub fn command(&self) -> Option<&'static str> {
        self.inner.command
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Transient SMTP error, 4yz reply code
    ///
    /// [RFC 5321, section 4.2.1](https://tools.ietf.org/html/rfc5321#section-4.2.1)
    Transient(Code),
    /// Permanent SMTP error, 5yz reply code
    ///
    /// [RFC 5321, section 4.2.1](https://tools.ietf.org/html/rfc5321#section-4.2.1)
    Permanent(Code),
    /// Contract violation by the caller
    Client,
    /// Connection closed or destroyed
    Connection,
    /// Underlying network i/o error
    Network,
    /// TLS error
    Tls,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("mailpost::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(command) = self.inner.command {
            builder.field("command", &command);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(command) = self.inner.command {
            write!(f, "{command} failed: ")?;
        }

        match self.inner.kind {
            Kind::Client => f.write_str("internal client error")?,
            Kind::Network => f.write_str("network error")?,
            Kind::Connection => f.write_str("connection error")?,
            Kind::Tls => f.write_str("tls error")?,
            Kind::Transient(code) => {
                write!(f, "transient error ({code})")?;
            }
            Kind::Permanent(code) => {
                write!(f, "permanent error ({code})")?;
            }
        };

        if let Some(ref e) = self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| {
            let r: &(dyn std::error::Error + 'static) = &**e;
            r
        })
    }
}

pub(crate) fn code(c: Code, command: &'static str, payload: Option<String>) -> Error {
    let kind = if c.is_transient() {
        Kind::Transient(c)
    } else {
        // Reply codes outside a command's accepted set are protocol errors
        // even when positive (e.g. 250 where 354 was expected).
        Kind::Permanent(c)
    };
    Error::new(kind, payload).with_command(command)
}

pub(crate) fn client<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Client, Some(e))
}

pub(crate) fn network<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Network, Some(e))
}

pub(crate) fn connection<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Connection, Some(e))
}

pub(crate) fn tls<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Tls, Some(e))
}
