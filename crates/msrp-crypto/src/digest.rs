//! HTTP digest authentication for the relay `AUTH` handshake.
//!
//! A relay answers an unauthenticated `AUTH` with `401` and a
//! `WWW-Authenticate: Digest ...` challenge (RFC 4976 §5). The client repeats
//! the request with an `Authorization` header computed as in RFC 2617:
//!
//! ```text
//! HA1      = MD5(username ":" realm ":" password)
//! HA1-sess = MD5(HA1 ":" nonce ":" cnonce)            (algorithm=MD5-sess)
//! HA2      = MD5(method ":" digest-uri)
//! response = MD5(HA1 ":" nonce ":" nc ":" cnonce ":" qop ":" HA2)   (qop=auth)
//! response = MD5(HA1 ":" nonce ":" HA2)                             (no qop)
//! ```
//!
//! # Security Note
//!
//! MD5 is mandated by the digest scheme used by MSRP relays. It is used here
//! only for protocol compliance.

use std::fmt::{self, Write as _};

use md5::{Digest, Md5};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Digest hash algorithm named by a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Plain MD5 (the default when the challenge omits `algorithm`)
    #[default]
    Md5,
    /// MD5 with session key (`MD5-sess`)
    Md5Sess,
}

impl Algorithm {
    fn parse(value: &str) -> Result<Self, CryptoError> {
        if value.eq_ignore_ascii_case("MD5") {
            Ok(Self::Md5)
        } else if value.eq_ignore_ascii_case("MD5-sess") {
            Ok(Self::Md5Sess)
        } else {
            Err(CryptoError::UnsupportedAlgorithm(value.to_string()))
        }
    }

    /// Wire name of the algorithm
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
        }
    }
}

/// Parsed `WWW-Authenticate: Digest` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection realm
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Opaque value echoed back verbatim
    pub opaque: Option<String>,
    /// Hash algorithm
    pub algorithm: Algorithm,
    /// Offered quality-of-protection values
    pub qop: Vec<String>,
    /// Previous credentials were valid but the nonce expired
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is not `Digest`, a parameter cannot be
    /// tokenized, the algorithm is unsupported, or `realm`/`nonce` is missing.
    pub fn parse(value: &str) -> Result<Self, CryptoError> {
        let value = value.trim();
        let (scheme, rest) = match value.find(char::is_whitespace) {
            Some(idx) => (&value[..idx], &value[idx..]),
            None => (value, ""),
        };
        if !scheme.eq_ignore_ascii_case("Digest") {
            return Err(CryptoError::UnsupportedScheme(scheme.to_string()));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = Algorithm::Md5;
        let mut qop = Vec::new();
        let mut stale = false;

        for (name, val) in parse_params(rest)? {
            match name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "opaque" => opaque = Some(val),
                "algorithm" => algorithm = Algorithm::parse(&val)?,
                "qop" => {
                    qop = val
                        .split(',')
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect();
                }
                "stale" => stale = val.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or(CryptoError::MissingParameter("realm"))?,
            nonce: nonce.ok_or(CryptoError::MissingParameter("nonce"))?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    /// Pick the qop to answer with, if the challenge asked for one.
    fn select_qop(&self) -> Result<Option<&'static str>, CryptoError> {
        if self.qop.is_empty() {
            return Ok(None);
        }
        if self.qop.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
            Ok(Some("auth"))
        } else {
            Err(CryptoError::UnsupportedQop(self.qop.join(",")))
        }
    }
}

impl fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm={}, nonce={}", Quoted(&self.realm), Quoted(&self.nonce))?;
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque={}", Quoted(opaque))?;
        }
        if self.algorithm != Algorithm::Md5 {
            write!(f, ", algorithm={}", self.algorithm.as_str())?;
        }
        if !self.qop.is_empty() {
            write!(f, ", qop=\"{}\"", self.qop.join(","))?;
        }
        if self.stale {
            write!(f, ", stale=true")?;
        }
        Ok(())
    }
}

/// Quoted-string rendering with `"` and `\` escaped
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for c in self.0.chars() {
            if matches!(c, '"' | '\\') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        f.write_char('"')
    }
}

/// Split `k=v, k="quoted, value"` into pairs.
fn parse_params(input: &str) -> Result<Vec<(String, String)>, CryptoError> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            name.push(c);
            chars.next();
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(CryptoError::MalformedChallenge(format!(
                "expected '=' after {name}"
            )));
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(CryptoError::MalformedChallenge(format!(
                    "unterminated quoted value for {name}"
                )));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim_end().to_string();
        }

        params.push((name, value));
    }

    Ok(params)
}

/// Username and password presented to the relay
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Username
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A computed digest answer, renderable as an `Authorization` header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    /// Username
    pub username: String,
    /// Realm copied from the challenge
    pub realm: String,
    /// Nonce copied from the challenge
    pub nonce: String,
    /// Digest URI (the relay URI for MSRP)
    pub uri: String,
    /// Hex request digest
    pub response: String,
    /// Algorithm copied from the challenge
    pub algorithm: Algorithm,
    /// Client nonce, present when qop was used
    pub cnonce: Option<String>,
    /// Opaque copied from the challenge
    pub opaque: Option<String>,
    /// Selected qop
    pub qop: Option<&'static str>,
    /// Nonce count, present when qop was used
    pub nonce_count: Option<u32>,
}

impl DigestResponse {
    /// Compute the digest answer for `challenge`.
    ///
    /// `nonce_count` must increase for each request reusing the same nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedQop`] if the challenge only offers
    /// qop values other than `auth`.
    pub fn compute(
        challenge: &DigestChallenge,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> Result<Self, CryptoError> {
        let qop = challenge.select_qop()?;
        let nc = format!("{nonce_count:08x}");

        let mut ha1 = md5_hex(&[
            credentials.username.as_bytes(),
            challenge.realm.as_bytes(),
            credentials.password.as_bytes(),
        ]);
        if challenge.algorithm == Algorithm::Md5Sess {
            ha1 = md5_hex(&[ha1.as_bytes(), challenge.nonce.as_bytes(), cnonce.as_bytes()]);
        }
        let ha2 = md5_hex(&[method.as_bytes(), uri.as_bytes()]);

        let response = match qop {
            Some(qop) => md5_hex(&[
                ha1.as_bytes(),
                challenge.nonce.as_bytes(),
                nc.as_bytes(),
                cnonce.as_bytes(),
                qop.as_bytes(),
                ha2.as_bytes(),
            ]),
            None => md5_hex(&[ha1.as_bytes(), challenge.nonce.as_bytes(), ha2.as_bytes()]),
        };

        let uses_cnonce = qop.is_some() || challenge.algorithm == Algorithm::Md5Sess;
        tracing::debug!(realm = %challenge.realm, qop = ?qop, nc = %nc, "computed digest response");

        Ok(Self {
            username: credentials.username.clone(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_string(),
            response,
            algorithm: challenge.algorithm,
            cnonce: uses_cnonce.then(|| cnonce.to_string()),
            opaque: challenge.opaque.clone(),
            qop,
            nonce_count: qop.map(|_| nonce_count),
        })
    }
}

impl fmt::Display for DigestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username={}, realm={}, nonce={}, uri={}, response=\"{}\", algorithm={}",
            Quoted(&self.username),
            Quoted(&self.realm),
            Quoted(&self.nonce),
            Quoted(&self.uri),
            self.response,
            self.algorithm.as_str()
        )?;
        if let Some(cnonce) = &self.cnonce {
            write!(f, ", cnonce=\"{cnonce}\"")?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque={}", Quoted(opaque))?;
        }
        if let (Some(qop), Some(nc)) = (self.qop, self.nonce_count) {
            write!(f, ", qop={qop}, nc={nc:08x}")?;
        }
        Ok(())
    }
}

/// MD5 over colon-joined parts, hex encoded.
fn md5_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC2617_CHALLENGE: &str = "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
         nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"";

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(RFC2617_CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(
            challenge.opaque.as_deref(),
            Some("5ccc069c403ebaf9f0171e9517f40e41")
        );
        assert_eq!(challenge.qop, vec!["auth", "auth-int"]);
        assert_eq!(challenge.algorithm, Algorithm::Md5);
        assert!(!challenge.stale);
    }

    #[test]
    fn test_rfc2617_vector() {
        let challenge = DigestChallenge::parse(RFC2617_CHALLENGE).unwrap();
        let credentials = Credentials::new("Mufasa", "Circle Of Life");
        let response = DigestResponse::compute(
            &challenge,
            &credentials,
            "GET",
            "/dir/index.html",
            1,
            "0a4f113b",
        )
        .unwrap();

        assert_eq!(response.response, "6629fae49393a05397450978507c4ef1");
        let header = response.to_string();
        assert!(header.starts_with("Digest username=\"Mufasa\""));
        assert!(header.contains("qop=auth, nc=00000001"));
        assert!(header.contains("cnonce=\"0a4f113b\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_no_qop_omits_cnonce() {
        let challenge = DigestChallenge::parse("Digest realm=\"relay\", nonce=\"abc\"").unwrap();
        let credentials = Credentials::new("alice", "secret");
        let response =
            DigestResponse::compute(&challenge, &credentials, "AUTH", "msrps://relay;tcp", 1, "ff")
                .unwrap();
        assert!(response.cnonce.is_none());
        assert!(response.nonce_count.is_none());
        assert!(!response.to_string().contains("nc="));
    }

    #[test]
    fn test_md5_sess_changes_response() {
        let plain = DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth\"").unwrap();
        let sess =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth\", algorithm=MD5-sess")
                .unwrap();
        let credentials = Credentials::new("u", "p");
        let a = DigestResponse::compute(&plain, &credentials, "AUTH", "msrp://r;tcp", 1, "c").unwrap();
        let b = DigestResponse::compute(&sess, &credentials, "AUTH", "msrp://r;tcp", 1, "c").unwrap();
        assert_ne!(a.response, b.response);
        assert!(b.to_string().contains("algorithm=MD5-sess"));
    }

    #[test]
    fn test_rejects_other_schemes_and_algorithms() {
        assert!(matches!(
            DigestChallenge::parse("Basic realm=\"x\""),
            Err(CryptoError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            DigestChallenge::parse("Digest realm=\"x\", nonce=\"y\", algorithm=SHA-256"),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            DigestChallenge::parse("Digest nonce=\"y\""),
            Err(CryptoError::MissingParameter("realm"))
        ));
        assert!(matches!(
            DigestChallenge::parse("Digest realm=\"unterminated"),
            Err(CryptoError::MalformedChallenge(_))
        ));
    }

    #[test]
    fn test_auth_int_only_is_unsupported() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"").unwrap();
        let credentials = Credentials::new("u", "p");
        assert!(matches!(
            DigestResponse::compute(&challenge, &credentials, "AUTH", "msrp://r;tcp", 1, "c"),
            Err(CryptoError::UnsupportedQop(_))
        ));
    }

    #[test]
    fn test_challenge_display_reparses() {
        let challenge = DigestChallenge::parse(RFC2617_CHALLENGE).unwrap();
        let reparsed = DigestChallenge::parse(&challenge.to_string()).unwrap();
        assert_eq!(challenge, reparsed);
    }

    #[test]
    fn test_challenge_display_escapes_quotes() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="say \"hi\"", nonce="a\\b", opaque="x\"y""#).unwrap();
        assert_eq!(challenge.realm, r#"say "hi""#);
        assert_eq!(challenge.nonce, r"a\b");
        let rendered = challenge.to_string();
        assert!(rendered.contains(r#"realm="say \"hi\"""#));
        assert_eq!(DigestChallenge::parse(&rendered).unwrap(), challenge);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("alice", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_never_panics(value in ".{0,200}") {
            let _ = DigestChallenge::parse(&value);
        }

        #[test]
        fn prop_response_is_hex_md5(
            user in "[a-z]{1,16}",
            password in ".{0,32}",
            nonce in "[0-9a-f]{8,32}",
            nc in 1u32..1000,
        ) {
            let challenge =
                DigestChallenge::parse(&format!("Digest realm=\"relay\", nonce=\"{nonce}\", qop=\"auth\"")).unwrap();
            let response = DigestResponse::compute(
                &challenge,
                &Credentials::new(user, password),
                "AUTH",
                "msrps://relay.example.com;tcp",
                nc,
                "0a4f113b",
            )
            .unwrap();
            proptest::prop_assert_eq!(response.response.len(), 32);
            proptest::prop_assert!(response.response.bytes().all(|b| b.is_ascii_hexdigit()));
            let expected_nc = format!("nc={nc:08x}");
            proptest::prop_assert!(response.to_string().contains(&expected_nc));
        }
    }
}
