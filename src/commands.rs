//! SMTP commands
//!
//! Each command is a stateless descriptor: the line to put on the wire (if
//! any), the reply codes that count as success, and a tag used in error
//! messages. Building one has no side effect; the connection engine drives
//! the exchange.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::{authentication::Credentials, extension::ClientId};

/// A protocol command descriptor
pub trait Command {
    /// Tag identifying the command in error messages
    fn tag(&self) -> &'static str;

    /// The line to transmit, without CRLF
    ///
    /// `None` means nothing is sent and only a reply is awaited (the server
    /// greeting, and the acknowledgement after a DATA body).
    fn text(&self) -> Option<String>;

    /// Reply codes accepted as success
    fn success_codes(&self) -> &'static [u16];
}

/// Waits for the `220` server greeting; sends nothing
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Greet;

impl Command for Greet {
    fn tag(&self) -> &'static str {
        "GREET"
    }

    fn text(&self) -> Option<String> {
        None
    }

    fn success_codes(&self) -> &'static [u16] {
        &[220]
    }
}

/// EHLO command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Ehlo {
    client_id: ClientId,
}

impl Ehlo {
    /// Creates an EHLO command
    pub fn new(client_id: ClientId) -> Ehlo {
        Ehlo { client_id }
    }
}

impl Command for Ehlo {
    fn tag(&self) -> &'static str {
        "EHLO"
    }

    fn text(&self) -> Option<String> {
        Some(format!("EHLO {}", self.client_id))
    }

    fn success_codes(&self) -> &'static [u16] {
        &[250]
    }
}

/// HELO command, the fallback for servers rejecting EHLO
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Helo {
    client_id: ClientId,
}

impl Helo {
    /// Creates a HELO command
    pub fn new(client_id: ClientId) -> Helo {
        Helo { client_id }
    }
}

impl Command for Helo {
    fn tag(&self) -> &'static str {
        "HELO"
    }

    fn text(&self) -> Option<String> {
        Some(format!("HELO {}", self.client_id))
    }

    fn success_codes(&self) -> &'static [u16] {
        &[250]
    }
}

/// STARTTLS command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Starttls;

impl Command for Starttls {
    fn tag(&self) -> &'static str {
        "STARTTLS"
    }

    fn text(&self) -> Option<String> {
        Some("STARTTLS".to_owned())
    }

    fn success_codes(&self) -> &'static [u16] {
        &[220]
    }
}

/// DATA command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Data;

impl Command for Data {
    fn tag(&self) -> &'static str {
        "DATA"
    }

    fn text(&self) -> Option<String> {
        Some("DATA".to_owned())
    }

    fn success_codes(&self) -> &'static [u16] {
        &[354]
    }
}

/// Waits for the `250` acknowledgement after the message body and its
/// terminator have been streamed; sends nothing itself
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct DataEnd;

impl Command for DataEnd {
    fn tag(&self) -> &'static str {
        "DATA"
    }

    fn text(&self) -> Option<String> {
        None
    }

    fn success_codes(&self) -> &'static [u16] {
        &[250]
    }
}

/// AUTH PLAIN command, a single round trip with inline credentials
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthPlain {
    credentials: Credentials,
}

impl AuthPlain {
    /// Creates an AUTH PLAIN command
    pub fn new(credentials: Credentials) -> AuthPlain {
        AuthPlain { credentials }
    }
}

impl Command for AuthPlain {
    fn tag(&self) -> &'static str {
        "AUTH"
    }

    fn text(&self) -> Option<String> {
        // RFC 4616: authzid NUL authcid NUL passwd
        let identity = format!(
            "\u{0}{}\u{0}{}",
            self.credentials.username(),
            self.credentials.password()
        );
        Some(format!("AUTH PLAIN {}", BASE64.encode(identity)))
    }

    fn success_codes(&self) -> &'static [u16] {
        &[235]
    }
}

/// AUTH LOGIN command, the first of three round trips
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct AuthLogin;

impl Command for AuthLogin {
    fn tag(&self) -> &'static str {
        "AUTH"
    }

    fn text(&self) -> Option<String> {
        Some("AUTH LOGIN".to_owned())
    }

    fn success_codes(&self) -> &'static [u16] {
        &[334]
    }
}

/// Username step of the LOGIN exchange
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthLoginUser {
    credentials: Credentials,
}

impl AuthLoginUser {
    /// Creates the username step
    pub fn new(credentials: Credentials) -> AuthLoginUser {
        AuthLoginUser { credentials }
    }
}

impl Command for AuthLoginUser {
    fn tag(&self) -> &'static str {
        "AUTH"
    }

    fn text(&self) -> Option<String> {
        Some(BASE64.encode(self.credentials.username()))
    }

    fn success_codes(&self) -> &'static [u16] {
        &[334]
    }
}

/// Password step of the LOGIN exchange
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthLoginPassword {
    credentials: Credentials,
}

impl AuthLoginPassword {
    /// Creates the password step
    pub fn new(credentials: Credentials) -> AuthLoginPassword {
        AuthLoginPassword { credentials }
    }
}

impl Command for AuthLoginPassword {
    fn tag(&self) -> &'static str {
        "AUTH"
    }

    fn text(&self) -> Option<String> {
        Some(BASE64.encode(self.credentials.password()))
    }

    fn success_codes(&self) -> &'static [u16] {
        &[235]
    }
}
