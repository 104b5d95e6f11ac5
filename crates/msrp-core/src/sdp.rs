//! Minimal SDP model (RFC 4566) with the MSRP media attributes of RFC 4975
//! §8 and the file transfer attributes of RFC 5547.
//!
//! Only `v=`, `o=`, `s=`, `c=`, `t=`, `m=` and `a=` lines are typed. Every
//! other line is kept verbatim in its section so a parsed document
//! serializes back without losing information.

use std::fmt;

use crate::error::ParseError;

/// Media protocol for plaintext MSRP over TCP
pub const PROTO_TCP: &str = "TCP/MSRP";
/// Media protocol for MSRP over TLS
pub const PROTO_TLS: &str = "TCP/TLS/MSRP";

/// `a=name[:value]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Value after the first colon
    pub value: Option<String>,
}

impl Attribute {
    /// Attribute with a value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Property attribute (`a=sendonly`)
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((name, value)) => Self::new(name, value),
            None => Self::flag(text),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "a={}:{}", self.name, value),
            None => write!(f, "a={}", self.name),
        }
    }
}

/// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Username, `-` when unused
    pub username: String,
    /// Session id
    pub session_id: String,
    /// Session version
    pub session_version: u64,
    /// Network type (`IN`)
    pub net_type: String,
    /// Address type (`IP4`, `IP6`)
    pub addr_type: String,
    /// Unicast address or host name
    pub address: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.username, self.session_id, self.session_version, self.net_type, self.addr_type, self.address
        )
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media type (`message` for MSRP)
    pub media: String,
    /// Port; zero rejects the stream
    pub port: u16,
    /// Transport protocol (`TCP/MSRP`, `TCP/TLS/MSRP`)
    pub proto: String,
    /// Format list (`*` for MSRP)
    pub formats: Vec<String>,
    /// `c=` line value
    pub connection: Option<String>,
    /// Lines other than `c=`/`a=`, verbatim
    pub extra: Vec<String>,
    /// Attributes in order
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    /// An MSRP `m=message` section
    #[must_use]
    pub fn message(port: u16, secure: bool, path: &[String], accept_types: &[String]) -> Self {
        let mut media = Self {
            media: "message".to_string(),
            port,
            proto: (if secure { PROTO_TLS } else { PROTO_TCP }).to_string(),
            formats: vec!["*".to_string()],
            connection: None,
            extra: Vec::new(),
            attributes: Vec::new(),
        };
        media.attributes.push(Attribute::new("accept-types", accept_types.join(" ")));
        media.attributes.push(Attribute::new("path", path.join(" ")));
        media
    }

    /// Whether this section carries MSRP over a known transport
    #[must_use]
    pub fn is_msrp(&self) -> bool {
        self.media == "message" && (self.proto == PROTO_TCP || self.proto == PROTO_TLS)
    }

    /// First value of an attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_deref())
    }

    /// Whether a property attribute is present
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// Replace or append an attribute
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    /// `a=path` split into URIs
    #[must_use]
    pub fn path(&self) -> Vec<String> {
        split_list(self.attribute("path"))
    }

    /// `a=accept-types`
    #[must_use]
    pub fn accept_types(&self) -> Vec<String> {
        split_list(self.attribute("accept-types"))
    }

    /// `a=accept-wrapped-types`
    #[must_use]
    pub fn accept_wrapped_types(&self) -> Vec<String> {
        split_list(self.attribute("accept-wrapped-types"))
    }

    /// RFC 5547 attributes, if this section offers a file
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Sdp`] if `a=file-selector` is present but malformed.
    pub fn file_transfer(&self) -> Result<Option<FileTransfer>, ParseError> {
        let Some(selector) = self.attribute("file-selector") else {
            return Ok(None);
        };
        let selector = FileSelector::parse(selector)?;
        let direction = if self.has_attribute("sendonly") {
            Some(Direction::SendOnly)
        } else if self.has_attribute("recvonly") {
            Some(Direction::RecvOnly)
        } else {
            None
        };
        Ok(Some(FileTransfer {
            selector,
            transfer_id: self.attribute("file-transfer-id").map(String::from),
            disposition: self.attribute("file-disposition").map(String::from),
            icon: self.attribute("file-icon").map(String::from),
            direction,
        }))
    }

    /// Write RFC 5547 attributes
    pub fn set_file_transfer(&mut self, transfer: &FileTransfer) {
        self.set_attribute(Attribute::new("file-selector", transfer.selector.to_string()));
        if let Some(id) = &transfer.transfer_id {
            self.set_attribute(Attribute::new("file-transfer-id", id.clone()));
        }
        if let Some(disposition) = &transfer.disposition {
            self.set_attribute(Attribute::new("file-disposition", disposition.clone()));
        }
        if let Some(icon) = &transfer.icon {
            self.set_attribute(Attribute::new("file-icon", icon.clone()));
        }
        self.attributes
            .retain(|a| a.name != "sendonly" && a.name != "recvonly" && a.name != "sendrecv");
        if let Some(direction) = transfer.direction {
            self.attributes.push(Attribute::flag(direction.as_str()));
        }
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// A complete SDP document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// `v=`
    pub version: u32,
    /// `o=`
    pub origin: Origin,
    /// `s=`
    pub session_name: String,
    /// Session-level lines other than `c=`/`t=`/`a=`, verbatim
    pub extra: Vec<String>,
    /// Session-level `c=`
    pub connection: Option<String>,
    /// `t=` start and stop
    pub timing: (u64, u64),
    /// Session-level attributes
    pub attributes: Vec<Attribute>,
    /// Media sections
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Skeleton document for `address` (`o=` and `c=` lines)
    #[must_use]
    pub fn new(session_id: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            version: 0,
            origin: Origin {
                username: "-".to_string(),
                session_id: session_id.into(),
                session_version: 1,
                net_type: "IN".to_string(),
                addr_type: "IP4".to_string(),
                address: address.clone(),
            },
            session_name: "-".to_string(),
            extra: Vec::new(),
            connection: Some(format!("IN IP4 {address}")),
            timing: (0, 0),
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Parse a document; accepts CRLF or bare LF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Sdp`] naming the first malformed line.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut version = None;
        let mut origin = None;
        let mut session_name = None;
        let mut extra = Vec::new();
        let mut connection = None;
        let mut timing = (0, 0);
        let mut attributes = Vec::new();
        let mut media: Vec<MediaDescription> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let err = |reason: &str| ParseError::Sdp {
                line: line_no,
                reason: reason.to_string(),
            };
            let bytes = line.as_bytes();
            if bytes.len() < 2 || bytes[1] != b'=' || !bytes[0].is_ascii_lowercase() {
                return Err(err("expected <type>=<value>"));
            }
            let kind = bytes[0];
            let value = &line[2..];

            if let Some(current) = media.last_mut() {
                match kind {
                    b'm' => {}
                    b'c' => {
                        current.connection = Some(value.to_string());
                        continue;
                    }
                    b'a' => {
                        current.attributes.push(Attribute::parse(value));
                        continue;
                    }
                    _ => {
                        current.extra.push(line.to_string());
                        continue;
                    }
                }
            }

            match kind {
                b'v' => version = Some(value.parse().map_err(|_| err("bad version"))?),
                b'o' => origin = Some(parse_origin(value).ok_or_else(|| err("bad origin"))?),
                b's' => session_name = Some(value.to_string()),
                b'c' => connection = Some(value.to_string()),
                b't' => {
                    let mut parts = value.split_whitespace().map(str::parse::<u64>);
                    match (parts.next(), parts.next()) {
                        (Some(Ok(start)), Some(Ok(stop))) => timing = (start, stop),
                        _ => return Err(err("bad timing")),
                    }
                }
                b'a' => attributes.push(Attribute::parse(value)),
                b'm' => media.push(parse_media(value).ok_or_else(|| err("bad media line"))?),
                _ => extra.push(line.to_string()),
            }
        }

        let missing = |what: &str| ParseError::Sdp {
            line: 0,
            reason: format!("missing {what}"),
        };
        Ok(Self {
            version: version.ok_or_else(|| missing("v="))?,
            origin: origin.ok_or_else(|| missing("o="))?,
            session_name: session_name.unwrap_or_else(|| "-".to_string()),
            extra,
            connection,
            timing,
            attributes,
            media,
        })
    }
}

fn parse_origin(value: &str) -> Option<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let [username, session_id, version, net_type, addr_type, address] = parts.as_slice() else {
        return None;
    };
    Some(Origin {
        username: (*username).to_string(),
        session_id: (*session_id).to_string(),
        session_version: version.parse().ok()?,
        net_type: (*net_type).to_string(),
        addr_type: (*addr_type).to_string(),
        address: (*address).to_string(),
    })
}

fn parse_media(value: &str) -> Option<MediaDescription> {
    let mut parts = value.split_whitespace();
    let media = parts.next()?.to_string();
    let port = parts.next()?.split('/').next()?.parse().ok()?;
    let proto = parts.next()?.to_string();
    let formats: Vec<String> = parts.map(String::from).collect();
    if formats.is_empty() {
        return None;
    }
    Some(MediaDescription {
        media,
        port,
        proto,
        formats,
        connection: None,
        extra: Vec::new(),
        attributes: Vec::new(),
    })
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.session_name)?;
        for line in &self.extra {
            write!(f, "{line}\r\n")?;
        }
        if let Some(c) = &self.connection {
            write!(f, "c={c}\r\n")?;
        }
        write!(f, "t={} {}\r\n", self.timing.0, self.timing.1)?;
        for attribute in &self.attributes {
            write!(f, "{attribute}\r\n")?;
        }
        for media in &self.media {
            write!(f, "m={} {} {} {}\r\n", media.media, media.port, media.proto, media.formats.join(" "))?;
            for line in &media.extra {
                write!(f, "{line}\r\n")?;
            }
            if let Some(c) = &media.connection {
                write!(f, "c={c}\r\n")?;
            }
            for attribute in &media.attributes {
                write!(f, "{attribute}\r\n")?;
            }
        }
        Ok(())
    }
}

/// Stream direction of a file offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Offerer pushes the file
    SendOnly,
    /// Offerer requests the file
    RecvOnly,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
        }
    }

    /// Direction seen from the other side
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::SendOnly => Self::RecvOnly,
            Self::RecvOnly => Self::SendOnly,
        }
    }
}

/// `a=file-selector` (RFC 5547 §6)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSelector {
    /// `name:"..."`
    pub name: Option<String>,
    /// `size:N`
    pub size: Option<u64>,
    /// `type:media/subtype[;params]`
    pub mime_type: Option<String>,
    /// `hash:<algorithm>:<hex pairs>`
    pub hash: Option<(String, String)>,
}

impl FileSelector {
    /// Parse the attribute value.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Sdp`] for an unterminated quoted name or a
    /// non-numeric size.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let err = |reason: &str| ParseError::Sdp {
            line: 0,
            reason: format!("file-selector: {reason}"),
        };
        let mut selector = Self::default();
        let mut rest = value.trim_start();
        while !rest.is_empty() {
            let (key, after) = rest.split_once(':').ok_or_else(|| err("selector without value"))?;
            let (item, remaining) = if let Some(quoted) = after.strip_prefix('"') {
                let close = quoted.find('"').ok_or_else(|| err("unterminated name"))?;
                (&quoted[..close], &quoted[close + 1..])
            } else {
                match after.find(' ') {
                    Some(space) => (&after[..space], &after[space..]),
                    None => (after, ""),
                }
            };
            match key {
                "name" => selector.name = Some(item.to_string()),
                "size" => selector.size = Some(item.parse().map_err(|_| err("bad size"))?),
                "type" => selector.mime_type = Some(item.to_string()),
                "hash" => {
                    let (alg, digest) = item.split_once(':').ok_or_else(|| err("bad hash"))?;
                    selector.hash = Some((alg.to_string(), digest.to_string()));
                }
                other => tracing::debug!(selector = other, "ignoring unknown file-selector item"),
            }
            rest = remaining.trim_start();
        }
        Ok(selector)
    }
}

impl fmt::Display for FileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut items = Vec::new();
        if let Some(name) = &self.name {
            items.push(format!("name:\"{name}\""));
        }
        if let Some(mime_type) = &self.mime_type {
            items.push(format!("type:{mime_type}"));
        }
        if let Some(size) = self.size {
            items.push(format!("size:{size}"));
        }
        if let Some((alg, digest)) = &self.hash {
            items.push(format!("hash:{alg}:{digest}"));
        }
        f.write_str(&items.join(" "))
    }
}

/// File transfer parameters of a media section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    /// `a=file-selector`
    pub selector: FileSelector,
    /// `a=file-transfer-id`
    pub transfer_id: Option<String>,
    /// `a=file-disposition` (`attachment`, `render`)
    pub disposition: Option<String>,
    /// `a=file-icon` (usually a `cid:` URL)
    pub icon: Option<String>,
    /// `sendonly`/`recvonly`
    pub direction: Option<Direction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=alice 2890844526 2890844527 IN IP4 host.example.com\r\n\
s=-\r\n\
c=IN IP4 host.example.com\r\n\
t=0 0\r\n\
m=message 7654 TCP/MSRP *\r\n\
i=This is my latest picture\r\n\
a=sendonly\r\n\
a=accept-types:message/cpim\r\n\
a=accept-wrapped-types:*\r\n\
a=path:msrp://host.example.com:7654/jshA7we;tcp\r\n\
a=file-selector:name:\"My cool picture.jpg\" type:image/jpeg size:32349 hash:sha-1:72:24:5F:E8:65:3D:DA:F3:71:36:2F:86:D4:71:91:3E:E4:A2:CE:2E\r\n\
a=file-transfer-id:vBnG916bdberum2fFEABR1FR3ExZMUrd\r\n\
a=file-disposition:attachment\r\n\
a=file-icon:cid:id2@alicepc.example.com\r\n\
m=audio 49170 RTP/AVP 0\r\n";

    #[test]
    fn test_parse_file_offer() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        assert_eq!(sdp.origin.username, "alice");
        assert_eq!(sdp.origin.session_version, 2_890_844_527);
        assert_eq!(sdp.media.len(), 2);

        let media = &sdp.media[0];
        assert!(media.is_msrp());
        assert_eq!(media.port, 7654);
        assert_eq!(media.path(), vec!["msrp://host.example.com:7654/jshA7we;tcp"]);
        assert_eq!(media.accept_types(), vec!["message/cpim"]);
        assert_eq!(media.accept_wrapped_types(), vec!["*"]);
        assert_eq!(media.extra, vec!["i=This is my latest picture"]);

        let transfer = media.file_transfer().unwrap().unwrap();
        assert_eq!(transfer.selector.name.as_deref(), Some("My cool picture.jpg"));
        assert_eq!(transfer.selector.size, Some(32349));
        assert_eq!(transfer.selector.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(transfer.selector.hash.as_ref().map(|(alg, _)| alg.as_str()), Some("sha-1"));
        assert_eq!(transfer.transfer_id.as_deref(), Some("vBnG916bdberum2fFEABR1FR3ExZMUrd"));
        assert_eq!(transfer.disposition.as_deref(), Some("attachment"));
        assert_eq!(transfer.icon.as_deref(), Some("cid:id2@alicepc.example.com"));
        assert_eq!(transfer.direction, Some(Direction::SendOnly));

        assert!(!sdp.media[1].is_msrp());
    }

    #[test]
    fn test_serialize_preserves_document() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        assert_eq!(sdp.to_string(), OFFER);
        assert_eq!(SessionDescription::parse(&sdp.to_string()).unwrap(), sdp);
    }

    #[test]
    fn test_build_message_media() {
        let mut sdp = SessionDescription::new("42", "alice.invalid");
        let path = vec!["msrps://relay.example;tcp".to_string(), "msrps://alice.invalid:2855/a;tcp".to_string()];
        let mut media = MediaDescription::message(2855, true, &path, &["text/plain".into(), "*".into()]);
        media.set_file_transfer(&FileTransfer {
            selector: FileSelector {
                name: Some("report.pdf".into()),
                size: Some(1024),
                mime_type: Some("application/pdf".into()),
                hash: None,
            },
            transfer_id: Some("t1".into()),
            disposition: Some("attachment".into()),
            icon: None,
            direction: Some(Direction::SendOnly),
        });
        sdp.media.push(media);

        let text = sdp.to_string();
        assert!(text.contains("m=message 2855 TCP/TLS/MSRP *\r\n"));
        assert!(text.contains("a=path:msrps://relay.example;tcp msrps://alice.invalid:2855/a;tcp\r\n"));
        assert!(text.contains("a=file-selector:name:\"report.pdf\" type:application/pdf size:1024\r\n"));
        assert!(text.contains("a=sendonly\r\n"));

        let parsed = SessionDescription::parse(&text).unwrap();
        assert_eq!(parsed.media[0].path(), path);
        assert_eq!(parsed.media[0].file_transfer().unwrap().unwrap().selector.size, Some(1024));
    }

    #[test]
    fn test_parse_accepts_bare_newlines() {
        let sdp = SessionDescription::parse("v=0\no=- 1 1 IN IP4 a\ns=-\nt=0 0\nm=message 9 TCP/MSRP *\n").unwrap();
        assert_eq!(sdp.media[0].port, 9);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SessionDescription::parse("v=0\r\nnot a line\r\n"),
            Err(ParseError::Sdp { line: 2, .. })
        ));
        assert!(matches!(
            SessionDescription::parse("v=0\r\no=too short\r\n"),
            Err(ParseError::Sdp { line: 2, .. })
        ));
        assert!(matches!(
            SessionDescription::parse("v=0\r\no=- 1 1 IN IP4 a\r\nm=message x TCP/MSRP *\r\n"),
            Err(ParseError::Sdp { line: 3, .. })
        ));
        assert!(matches!(SessionDescription::parse("s=-\r\n"), Err(ParseError::Sdp { line: 0, .. })));
        assert!(FileSelector::parse("name:\"unterminated").is_err());
        assert!(FileSelector::parse("size:big").is_err());
    }
}
