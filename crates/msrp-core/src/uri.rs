//! MSRP URIs (RFC 4975 §6).
//!
//! ```text
//! msrp-uri = ("msrp" / "msrps") "://" [userinfo "@"] host [":" port]
//!            ["/" session-id] ";" transport *( ";" param )
//! ```
//!
//! Two URIs name the same endpoint when scheme, host, port (2855 when
//! absent), session id and transport match. Host and transport compare
//! case-insensitively; the session id is case-sensitive; userinfo and extra
//! parameters are ignored.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Port assumed when a URI does not carry one
pub const DEFAULT_PORT: u16 = 2855;

/// A parsed MSRP or MSRPS URI
#[derive(Debug, Clone)]
pub struct MsrpUri {
    /// `msrps` scheme
    pub secure: bool,
    /// Optional userinfo
    pub user: Option<String>,
    /// Host name or literal address (IPv6 keeps its brackets)
    pub host: String,
    /// Explicit port
    pub port: Option<u16>,
    /// Session identifier path component
    pub session_id: Option<String>,
    /// Transport parameter (`tcp`, `ws`, `wss`, ...)
    pub transport: String,
    /// Remaining `;name[=value]` parameters
    pub params: Vec<(String, Option<String>)>,
}

impl MsrpUri {
    /// Build a session URI
    pub fn new(
        secure: bool,
        host: impl Into<String>,
        port: Option<u16>,
        session_id: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            secure,
            user: None,
            host: host.into(),
            port,
            session_id: Some(session_id.into()),
            transport: transport.into(),
            params: Vec::new(),
        }
    }

    /// Parse a URI.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Uri`] for an unknown scheme, a missing host or
    /// transport, or a non-numeric port.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let bad = |why: &str| ParseError::Uri(format!("{input}: {why}"));
        let input_trimmed = input.trim();

        let (scheme, rest) = input_trimmed
            .split_once("://")
            .ok_or_else(|| bad("missing scheme"))?;
        let secure = if scheme.eq_ignore_ascii_case("msrps") {
            true
        } else if scheme.eq_ignore_ascii_case("msrp") {
            false
        } else {
            return Err(bad("scheme must be msrp or msrps"));
        };

        let (hier, param_str) = rest
            .split_once(';')
            .ok_or_else(|| bad("missing transport"))?;
        let (authority, session_id) = match hier.split_once('/') {
            Some((authority, path)) if !path.is_empty() => (authority, Some(path.to_string())),
            Some((authority, _)) => (authority, None),
            None => (hier, None),
        };

        let (user, host_port) = match authority.rsplit_once('@') {
            Some((user, host_port)) => (Some(user.to_string()), host_port),
            None => (None, authority),
        };

        let (host, port_str) = if host_port.starts_with('[') {
            let close = host_port
                .find(']')
                .ok_or_else(|| bad("unterminated IPv6 literal"))?;
            let after = &host_port[close + 1..];
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(bad("garbage after IPv6 literal")),
            };
            (&host_port[..=close], port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };
        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = port_str
            .map(|p| p.parse::<u16>().map_err(|_| bad("invalid port")))
            .transpose()?;

        let mut parts = param_str.split(';');
        let transport = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| bad("missing transport"))?
            .to_string();
        let params = parts
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        Ok(Self {
            secure,
            user,
            host: host.to_string(),
            port,
            session_id,
            transport,
            params,
        })
    }

    /// Port used for comparison
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Scheme name
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure { "msrps" } else { "msrp" }
    }
}

impl PartialEq for MsrpUri {
    fn eq(&self, other: &Self) -> bool {
        self.secure == other.secure
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.effective_port() == other.effective_port()
            && self.session_id == other.session_id
            && self.transport.eq_ignore_ascii_case(&other.transport)
    }
}

impl Eq for MsrpUri {}

impl FromStr for MsrpUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MsrpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme())?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(session_id) = &self.session_id {
            write!(f, "/{session_id}")?;
        }
        write!(f, ";{}", self.transport)?;
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{name}={value}")?,
                None => write!(f, ";{name}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_uri() {
        let uri = MsrpUri::parse("msrps://bob@relay.example.com:12763/kjhd37s2s20w2a;tcp;foo=bar").unwrap();
        assert!(uri.secure);
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host, "relay.example.com");
        assert_eq!(uri.port, Some(12763));
        assert_eq!(uri.session_id.as_deref(), Some("kjhd37s2s20w2a"));
        assert_eq!(uri.transport, "tcp");
        assert_eq!(uri.params, vec![("foo".to_string(), Some("bar".to_string()))]);
    }

    #[test]
    fn test_parse_relay_without_session() {
        let uri = MsrpUri::parse("msrp://relay.example.com;tcp").unwrap();
        assert!(!uri.secure);
        assert!(uri.session_id.is_none());
        assert_eq!(uri.effective_port(), DEFAULT_PORT);
        assert_eq!(uri.to_string(), "msrp://relay.example.com;tcp");
    }

    #[test]
    fn test_parse_ipv6() {
        let uri = MsrpUri::parse("msrp://[2001:db8::1]:7000/abc;tcp").unwrap();
        assert_eq!(uri.host, "[2001:db8::1]");
        assert_eq!(uri.port, Some(7000));
        assert_eq!(uri.to_string(), "msrp://[2001:db8::1]:7000/abc;tcp");
    }

    #[test]
    fn test_display_roundtrip() {
        let text = "msrps://alice.invalid:2855/s3ss10n;wss";
        assert_eq!(MsrpUri::parse(text).unwrap().to_string(), text);
    }

    #[test]
    fn test_equality_rules() {
        let a = MsrpUri::parse("msrp://Host.Example:2855/abc;TCP").unwrap();
        let b = MsrpUri::parse("MSRP://host.example/abc;tcp").unwrap();
        assert_eq!(a, b);

        let other_session = MsrpUri::parse("msrp://host.example/ABC;tcp").unwrap();
        assert_ne!(a, other_session);

        let other_port = MsrpUri::parse("msrp://host.example:9999/abc;tcp").unwrap();
        assert_ne!(a, other_port);

        let other_transport = MsrpUri::parse("msrp://host.example/abc;ws").unwrap();
        assert_ne!(a, other_transport);

        let secure = MsrpUri::parse("msrps://host.example/abc;tcp").unwrap();
        assert_ne!(a, secure);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "http://host/abc;tcp",
            "msrp://host/abc",
            "msrp:///abc;tcp",
            "msrp://host:port/abc;tcp",
            "msrp://host/abc;",
            "msrp://[::1/abc;tcp",
        ] {
            assert!(MsrpUri::parse(bad).is_err(), "{bad} should not parse");
        }
    }
}
