//! ESMTP extension handling: the EHLO parameter and the capability set the
//! server advertises back

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::response::Response;

/// Client identifier, the parameter to `EHLO`
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum ClientId {
    /// A fully-qualified domain name
    Domain(String),
    /// An IPv4 address
    Ipv4(Ipv4Addr),
    /// An IPv6 address
    Ipv6(Ipv6Addr),
}

const LOCALHOST_CLIENT: ClientId = ClientId::Ipv4(Ipv4Addr::new(127, 0, 0, 1));

impl Default for ClientId {
    fn default() -> Self {
        // https://tools.ietf.org/html/rfc5321#section-4.1.4
        //
        // The SMTP client MUST, if possible, ensure that the domain parameter
        // to the EHLO command is a primary host name as specified for this
        // command in Section 2.3.5.  If this is not possible (e.g., when the
        // client's address is dynamically assigned and the client does not have
        // an obvious name), an address literal SHOULD be substituted for the
        // domain name.
        match hostname::get().ok().and_then(|s| s.into_string().ok()) {
            // a name without a dot is not an FQDN, use the address literal
            Some(name) if name.contains('.') => match name.parse::<Ipv4Addr>() {
                Ok(ip) => Self::Ipv4(ip),
                Err(_) => Self::Domain(name),
            },
            _ => LOCALHOST_CLIENT,
        }
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(value) => f.write_str(value),
            Self::Ipv4(value) => write!(f, "[{value}]"),
            Self::Ipv6(value) => write!(f, "[IPv6:{value}]"),
        }
    }
}

/// Capability set advertised by the server in response to `EHLO`
///
/// `SIZE` is kept as an integer limit, `AUTH` as the ordered list of
/// mechanism names (wire order encodes server preference), every other line
/// as a boolean flag keyed by its exact text.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Extensions {
    size: Option<u64>,
    auth: Vec<String>,
    flags: HashSet<String>,
}

impl Extensions {
    /// Parses an EHLO response into an `Extensions` set
    ///
    /// The first line of the response is the server greeting and carries no
    /// extension.
    pub fn from_response(response: &Response) -> Extensions {
        Self::from_lines(response.message().skip(1))
    }

    /// Parses extension lines (greeting already removed)
    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Extensions {
        let mut extensions = Extensions::default();

        for line in lines {
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("SIZE") {
                extensions.size = value
                    .split_whitespace()
                    .next()
                    .and_then(|limit| limit.parse().ok());
            } else if let Some(methods) = line.strip_prefix("AUTH") {
                extensions.auth = methods.split_whitespace().map(str::to_owned).collect();
            } else {
                extensions.flags.insert(line.to_owned());
            }
        }

        extensions
    }

    /// Maximum message size advertised through `SIZE`, if any
    pub fn size_limit(&self) -> Option<u64> {
        self.size
    }

    /// Advertised AUTH mechanism names, in server preference order
    pub fn auth_methods(&self) -> &[String] {
        &self.auth
    }

    /// Checks if the server advertised `STARTTLS`
    pub fn supports_starttls(&self) -> bool {
        self.supports("STARTTLS")
    }

    /// Checks for a boolean-present extension by its exact line text
    pub fn supports(&self, extension: &str) -> bool {
        self.flags.contains(extension)
    }
}

impl Display for Extensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.size.is_none() && self.auth.is_empty() && self.flags.is_empty() {
            return f.write_str("no extensions");
        }
        if let Some(size) = self.size {
            write!(f, "SIZE {size} ")?;
        }
        if !self.auth.is_empty() {
            write!(f, "AUTH {} ", self.auth.join(" "))?;
        }
        write!(f, "{:?}", self.flags)
    }
}
