//! Provides limited SASL authentication mechanisms

use std::fmt::{self, Debug, Display, Formatter};

/// Accepted authentication mechanisms
///
/// Trying LOGIN last as it is deprecated.
pub const DEFAULT_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// Contains user credentials
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Credentials {
    authentication_identity: String,
    secret: String,
}

impl Credentials {
    /// Create a `Credentials` struct from username and password
    pub fn new(username: String, password: String) -> Credentials {
        Credentials {
            authentication_identity: username,
            secret: password,
        }
    }

    pub(crate) fn username(&self) -> &str {
        &self.authentication_identity
    }

    pub(crate) fn password(&self) -> &str {
        &self.secret
    }
}

impl<S, T> From<(S, T)> for Credentials
where
    S: Into<String>,
    T: Into<String>,
{
    fn from((username, password): (S, T)) -> Self {
        Credentials::new(username.into(), password.into())
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish()
    }
}

/// Represents authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub enum Mechanism {
    /// PLAIN authentication mechanism, defined in
    /// [RFC 4616](https://tools.ietf.org/html/rfc4616)
    ///
    /// A single round trip carrying the base64 encoded NUL separated
    /// username/password pair.
    Plain,
    /// LOGIN authentication mechanism
    /// Obsolete but needed for some providers (like office365)
    ///
    /// Three round trips: the bare `AUTH LOGIN`, the base64 username, the
    /// base64 password.
    Login,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
        })
    }
}

/// Picks the mechanism to use against a server
///
/// Returns the first mechanism of `preference` present in the uppercased
/// `advertised` method names, or `None` when the server supports none of the
/// configured mechanisms.
pub fn select_mechanism(preference: &[Mechanism], advertised: &[String]) -> Option<Mechanism> {
    let advertised: Vec<String> = advertised
        .iter()
        .map(|method| method.to_ascii_uppercase())
        .collect();
    preference
        .iter()
        .copied()
        .find(|mechanism| advertised.iter().any(|method| method == &mechanism.to_string()))
}
