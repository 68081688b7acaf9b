//! The mailpost library is an async SMTP client connection engine.
//!
//! It handles the connection-level part of speaking to an SMTP server:
//!
//! * connecting, and the `EHLO` handshake (with `HELO` fallback for servers
//!   predating ESMTP)
//! * TLS, both implicit (SMTPS, port 465) and via `STARTTLS`
//! * authentication with the `PLAIN` and `LOGIN` mechanisms
//! * the `DATA` exchange, including dot-stuffing and line-ending
//!   normalization of the message payload
//! * parsing of multi-line server replies, with transient/permanent error
//!   classification and detection of the server-terminating `421` reply
//!
//! An [`SmtpClient`] is cheap to clone and can be shared across tasks; it
//! queues concurrent callers and runs their exchanges strictly one at a
//! time, in arrival order. A client drives a single connection for its whole
//! life: when the connection is lost it is not re-established, a new client
//! must be built.
//!
//! What it deliberately does not do: build or encode messages, pick
//! mail exchangers from DNS, or manage pools of connections. Callers bring
//! their own message bytes.
//!
//! # Example
//!
//! ```rust,no_run
//! use mailpost::{Credentials, SmtpClient, TlsParameters, SUBMISSION_PORT};
//!
//! # async fn run() -> Result<(), mailpost::Error> {
//! let client = SmtpClient::builder("mail.example.com")
//!     .port(SUBMISSION_PORT)
//!     .tls(TlsParameters::new("mail.example.com".to_owned())?)
//!     .build();
//!
//! client.connect().await?;
//! client
//!     .login(&Credentials::new("user".to_owned(), "password".to_owned()))
//!     .await?;
//!
//! let reply = client
//!     .send_data(b"From: a@example.com\r\nTo: b@example.com\r\n\r\nHello!")
//!     .await?;
//! println!("accepted: {}", reply.code());
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(
    missing_debug_implementations,
    unreachable_pub,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links
)]

pub mod authentication;
mod client;
pub mod commands;
mod error;
pub mod extension;
pub mod lock;
pub mod response;

// exposed because `TlsParameters::new_with_root_certificates` takes a
// `rustls::RootCertStore`
pub use rustls;

pub use crate::{
    authentication::{Credentials, Mechanism},
    client::{SmtpClient, SmtpClientBuilder, TlsParameters},
    error::Error,
    extension::{ClientId, Extensions},
    response::Response,
};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
///
/// Uses implicit TLS: the session is encrypted from the first byte.
pub const SUBMISSIONS_PORT: u16 = 465;
