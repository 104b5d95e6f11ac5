//! MSRP message model.
//!
//! A frame is either a [`Request`] (SEND, REPORT, AUTH or an unknown method)
//! or a [`Response`]. Path headers, `Byte-Range` and `Content-Type` are kept
//! as structured fields; every other header lives in an ordered [`Headers`]
//! list so that re-encoding preserves insertion order.

use std::fmt;

use msrp_crypto::DigestChallenge;

use crate::error::ParseError;

/// Status codes used by MSRP and the relay extensions
pub mod status {
    /// Success
    pub const OK: u16 = 200;
    /// Malformed or misrouted request
    pub const BAD_REQUEST: u16 = 400;
    /// Relay demands authentication
    pub const UNAUTHORIZED: u16 = 401;
    /// Request refused
    pub const FORBIDDEN: u16 = 403;
    /// Transaction timed out (synthesized locally)
    pub const REQUEST_TIMEOUT: u16 = 408;
    /// Receiver asks the sender to stop sending this message
    pub const STOP_SENDING: u16 = 413;
    /// Content type not accepted
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    /// Requested expiry outside the relay's bounds
    pub const INTERVAL_OUT_OF_BOUNDS: u16 = 423;
    /// To-Path does not name a local session
    pub const SESSION_DOES_NOT_EXIST: u16 = 481;
    /// Receiver failed to handle the message
    pub const INTERNAL_ERROR: u16 = 500;
    /// Method not understood
    pub const NOT_IMPLEMENTED: u16 = 501;
    /// Session already bound to another connection
    pub const SESSION_ALREADY_BOUND: u16 = 506;

    /// Canonical comment for a status code
    #[must_use]
    pub fn reason(code: u16) -> &'static str {
        match code {
            OK => "OK",
            BAD_REQUEST => "Bad Request",
            UNAUTHORIZED => "Unauthorized",
            FORBIDDEN => "Forbidden",
            REQUEST_TIMEOUT => "Request Timeout",
            STOP_SENDING => "Stop Sending This Message",
            UNSUPPORTED_MEDIA_TYPE => "Unsupported Media Type",
            INTERVAL_OUT_OF_BOUNDS => "Interval Out Of Bounds",
            SESSION_DOES_NOT_EXIST => "Session Does Not Exist",
            INTERNAL_ERROR => "Internal Server Error",
            NOT_IMPLEMENTED => "Not Implemented",
            SESSION_ALREADY_BOUND => "Session Already Bound",
            _ => "Unknown",
        }
    }

    /// Whether `code` is a 2xx success
    #[must_use]
    pub fn is_success(code: u16) -> bool {
        (200..300).contains(&code)
    }
}

/// Request method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Message chunk
    Send,
    /// Delivery report
    Report,
    /// Relay authentication (RFC 4976)
    Auth,
    /// Any other method, answered with 501
    Other(String),
}

impl Method {
    /// Method token as it appears on the wire
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Send => "SEND",
            Self::Report => "REPORT",
            Self::Auth => "AUTH",
            Self::Other(name) => name,
        }
    }

    pub(crate) fn from_token(token: &str) -> Self {
        match token {
            "SEND" => Self::Send,
            "REPORT" => Self::Report,
            "AUTH" => Self::Auth,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-line continuation flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flag {
    /// `+`: more chunks follow
    Continued,
    /// `$`: this chunk completes the message
    #[default]
    End,
    /// `#`: the sender abandoned the message
    Abort,
}

impl Flag {
    /// Flag character
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Continued => b'+',
            Self::End => b'$',
            Self::Abort => b'#',
        }
    }
}

impl TryFrom<u8> for Flag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'+' => Ok(Self::Continued),
            b'$' => Ok(Self::End),
            b'#' => Ok(Self::Abort),
            other => Err(other),
        }
    }
}

/// `Byte-Range: start-end/total`, 1-based and inclusive.
///
/// `end` and `total` are `None` when transmitted as `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte (1-based)
    pub start: u64,
    /// Last byte, inclusive
    pub end: Option<u64>,
    /// Message size
    pub total: Option<u64>,
}

impl ByteRange {
    /// Range with every bound known
    #[must_use]
    pub fn new(start: u64, end: u64, total: u64) -> Self {
        Self {
            start,
            end: Some(end),
            total: Some(total),
        }
    }

    /// Parse a header value.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::ByteRange`] if the value is not `start-end/total`
    /// with numeric or `*` bounds, or if `start` is zero.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let bad = || ParseError::ByteRange(value.to_string());
        let (range, total) = value.trim().split_once('/').ok_or_else(bad)?;
        let (start, end) = range.split_once('-').ok_or_else(bad)?;
        let start: u64 = start.parse().map_err(|_| bad())?;
        if start == 0 {
            return Err(bad());
        }
        let optional = |s: &str| -> Result<Option<u64>, ParseError> {
            if s == "*" {
                Ok(None)
            } else {
                s.parse().map(Some).map_err(|_| bad())
            }
        };
        Ok(Self {
            start,
            end: optional(end)?,
            total: optional(total)?,
        })
    }

    /// Last byte covered by a `len`-byte body starting at `start`.
    ///
    /// `None` when the offset overflows or the body runs past a declared total.
    #[must_use]
    pub fn last_byte(&self, len: u64) -> Option<u64> {
        let last = self.start.checked_add(len)?.checked_sub(1)?;
        match self.total {
            Some(total) if last > total => None,
            _ => Some(last),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.start)?;
        match self.end {
            Some(end) => write!(f, "{end}")?,
            None => f.write_str("*")?,
        }
        f.write_str("/")?;
        match self.total {
            Some(total) => write!(f, "{total}"),
            None => f.write_str("*"),
        }
    }
}

/// `Failure-Report` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureReport {
    /// Respond to every chunk
    #[default]
    Yes,
    /// Never respond
    No,
    /// Respond only with failures
    Partial,
}

impl FailureReport {
    /// Whether a 200 response is expected
    #[must_use]
    pub fn respond_on_success(self) -> bool {
        matches!(self, Self::Yes)
    }

    /// Whether an error response is expected
    #[must_use]
    pub fn respond_on_failure(self) -> bool {
        !matches!(self, Self::No)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Partial => "partial",
        }
    }
}

/// `Status` header carried by REPORT requests: `000 200 OK`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// Namespace, always 000 for MSRP status codes
    pub namespace: u16,
    /// Status code
    pub code: u16,
    /// Optional comment
    pub comment: Option<String>,
}

impl ReportStatus {
    /// Status in the MSRP namespace with its canonical comment
    #[must_use]
    pub fn new(code: u16) -> Self {
        Self {
            namespace: 0,
            code,
            comment: Some(status::reason(code).to_string()),
        }
    }

    /// Whether the status reports success
    #[must_use]
    pub fn is_success(&self) -> bool {
        status::is_success(self.code)
    }

    fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().splitn(3, ' ');
        let namespace = parse_three_digits(parts.next()?)?;
        let code = parse_three_digits(parts.next()?)?;
        let comment = parts.next().map(str::trim).filter(|c| !c.is_empty()).map(String::from);
        Some(Self {
            namespace,
            code,
            comment,
        })
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {:03}", self.namespace, self.code)?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}

pub(crate) fn parse_three_digits(token: &str) -> Option<u16> {
    if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

/// Canonical spelling of a header name.
///
/// The first letter and every letter after `-` are upper-cased, the rest
/// lower-cased; `WWW-Authenticate` and `Message-ID` are fixed exceptions.
#[must_use]
pub fn canonical_header_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "www-authenticate" => return "WWW-Authenticate".to_string(),
        "message-id" => return "Message-ID".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(lower.len());
    let mut upper_next = true;
    for c in lower.chars() {
        if upper_next {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper_next = c == '-';
    }
    out
}

/// A header other than the structural path/range/content-type fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// `Message-ID`
    MessageId(String),
    /// `Success-Report: yes|no`
    SuccessReport(bool),
    /// `Failure-Report: yes|no|partial`
    FailureReport(FailureReport),
    /// `Status` (REPORT only)
    Status(ReportStatus),
    /// `Content-Disposition`
    ContentDisposition(String),
    /// `WWW-Authenticate` digest challenge
    WwwAuthenticate(DigestChallenge),
    /// `Authorization` credentials, kept verbatim
    Authorization(String),
    /// `Use-Path`
    UsePath(Vec<String>),
    /// `Expires` (seconds)
    Expires(u32),
    /// `Min-Expires` (seconds)
    MinExpires(u32),
    /// `Max-Expires` (seconds)
    MaxExpires(u32),
    /// Anything else, name canonicalized
    Other {
        /// Canonical name
        name: String,
        /// Raw value
        value: String,
    },
}

impl Header {
    /// Build a header from a received name/value pair.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Header`] if a known header's value does not parse.
    pub fn parse(name: &str, value: &str) -> Result<Self, ParseError> {
        let name = canonical_header_name(name);
        let value = value.trim();
        let bad = || ParseError::Header {
            name: name.clone(),
            value: value.to_string(),
        };
        let header = match name.as_str() {
            "Message-ID" => {
                if value.is_empty() {
                    return Err(bad());
                }
                Self::MessageId(value.to_string())
            }
            "Success-Report" => match value {
                "yes" => Self::SuccessReport(true),
                "no" => Self::SuccessReport(false),
                _ => return Err(bad()),
            },
            "Failure-Report" => Self::FailureReport(match value {
                "yes" => FailureReport::Yes,
                "no" => FailureReport::No,
                "partial" => FailureReport::Partial,
                _ => return Err(bad()),
            }),
            "Status" => Self::Status(ReportStatus::parse(value).ok_or_else(bad)?),
            "Content-Disposition" => Self::ContentDisposition(value.to_string()),
            "WWW-Authenticate" => {
                Self::WwwAuthenticate(DigestChallenge::parse(value).map_err(|_| bad())?)
            }
            "Authorization" => Self::Authorization(value.to_string()),
            "Use-Path" => {
                let path: Vec<String> = value.split_whitespace().map(String::from).collect();
                if path.is_empty() {
                    return Err(bad());
                }
                Self::UsePath(path)
            }
            "Expires" => Self::Expires(value.parse().map_err(|_| bad())?),
            "Min-Expires" => Self::MinExpires(value.parse().map_err(|_| bad())?),
            "Max-Expires" => Self::MaxExpires(value.parse().map_err(|_| bad())?),
            _ => Self::Other {
                name,
                value: value.to_string(),
            },
        };
        Ok(header)
    }

    /// Canonical header name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::MessageId(_) => "Message-ID",
            Self::SuccessReport(_) => "Success-Report",
            Self::FailureReport(_) => "Failure-Report",
            Self::Status(_) => "Status",
            Self::ContentDisposition(_) => "Content-Disposition",
            Self::WwwAuthenticate(_) => "WWW-Authenticate",
            Self::Authorization(_) => "Authorization",
            Self::UsePath(_) => "Use-Path",
            Self::Expires(_) => "Expires",
            Self::MinExpires(_) => "Min-Expires",
            Self::MaxExpires(_) => "Max-Expires",
            Self::Other { name, .. } => name,
        }
    }

    /// Header value as it is written on the wire
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::MessageId(v) | Self::ContentDisposition(v) | Self::Authorization(v) => v.clone(),
            Self::SuccessReport(yes) => (if *yes { "yes" } else { "no" }).to_string(),
            Self::FailureReport(policy) => policy.as_str().to_string(),
            Self::Status(status) => status.to_string(),
            Self::WwwAuthenticate(challenge) => challenge.to_string(),
            Self::UsePath(path) => path.join(" "),
            Self::Expires(s) | Self::MinExpires(s) | Self::MaxExpires(s) => s.to_string(),
            Self::Other { value, .. } => value.clone(),
        }
    }
}

/// Ordered, repeatable header list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers(Vec<Header>);

macro_rules! header_getter {
    ($(#[$doc:meta])* $fn:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $fn(&self) -> Option<$ty> {
            self.0.iter().find_map(|h| match h {
                Header::$variant(v) => Some(v.clone()),
                _ => None,
            })
        }
    };
}

impl Headers {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Replace every header with the same name, appending if absent
    pub fn set(&mut self, header: Header) {
        match self.0.iter().position(|h| h.name() == header.name()) {
            Some(index) => {
                let name = header.name().to_string();
                self.0[index] = header;
                let mut seen = false;
                self.0.retain(|h| {
                    if h.name() != name {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.0.push(header),
        }
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Message-ID` value
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.0.iter().find_map(|h| match h {
            Header::MessageId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    header_getter!(
        /// `Success-Report` (absent means `no`)
        success_report, SuccessReport, bool
    );
    header_getter!(
        /// `Status` of a REPORT
        status, Status, ReportStatus
    );
    header_getter!(
        /// `Content-Disposition`
        content_disposition, ContentDisposition, String
    );
    header_getter!(
        /// First `WWW-Authenticate` challenge
        www_authenticate, WwwAuthenticate, DigestChallenge
    );
    header_getter!(
        /// `Authorization`
        authorization, Authorization, String
    );
    header_getter!(
        /// `Use-Path`
        use_path, UsePath, Vec<String>
    );
    header_getter!(
        /// `Expires`
        expires, Expires, u32
    );
    header_getter!(
        /// `Min-Expires`
        min_expires, MinExpires, u32
    );
    header_getter!(
        /// `Max-Expires`
        max_expires, MaxExpires, u32
    );

    /// `Failure-Report` (absent means `yes`)
    #[must_use]
    pub fn failure_report(&self) -> FailureReport {
        self.0
            .iter()
            .find_map(|h| match h {
                Header::FailureReport(policy) => Some(*policy),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Every value of an unrecognized header, by canonical name
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = canonical_header_name(name);
        self.0.iter().filter_map(move |h| match h {
            Header::Other { name: n, value } if *n == name => Some(value.as_str()),
            _ => None,
        })
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An MSRP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Transaction id
    pub tid: String,
    /// Method
    pub method: Method,
    /// `To-Path`, next hop first
    pub to_path: Vec<String>,
    /// `From-Path`, nearest hop first
    pub from_path: Vec<String>,
    /// `Byte-Range` of the carried chunk
    pub byte_range: Option<ByteRange>,
    /// Remaining headers in order
    pub headers: Headers,
    /// `Content-Type` of the body
    pub content_type: Option<String>,
    /// Body, if the frame had one
    pub body: Option<Vec<u8>>,
    /// Continuation flag
    pub flag: Flag,
}

impl Request {
    /// Request with a fresh transaction id and no body
    #[must_use]
    pub fn new(method: Method, to_path: Vec<String>, from_path: Vec<String>) -> Self {
        Self {
            tid: msrp_crypto::random::transaction_id(),
            method,
            to_path,
            from_path,
            byte_range: None,
            headers: Headers::new(),
            content_type: None,
            body: None,
            flag: Flag::End,
        }
    }

    /// `Message-ID` header value
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.message_id()
    }

    /// Body length, zero when absent
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    /// Build the response to this request.
    ///
    /// `To-Path` is the previous hop (first `From-Path` entry); `From-Path`
    /// is the URI this request was addressed to.
    #[must_use]
    pub fn response(&self, status: u16) -> Response {
        Response {
            tid: self.tid.clone(),
            status,
            comment: Some(status::reason(status).to_string()),
            to_path: self.from_path.first().cloned().into_iter().collect(),
            from_path: self.to_path.last().cloned().into_iter().collect(),
            headers: Headers::new(),
        }
    }
}

/// An MSRP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Transaction id of the request
    pub tid: String,
    /// Status code
    pub status: u16,
    /// Comment following the status code
    pub comment: Option<String>,
    /// `To-Path`
    pub to_path: Vec<String>,
    /// `From-Path`
    pub from_path: Vec<String>,
    /// Remaining headers in order
    pub headers: Headers,
}

impl Response {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        status::is_success(self.status)
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request frame
    Request(Request),
    /// Response frame
    Response(Response),
}

impl Message {
    /// Transaction id
    #[must_use]
    pub fn tid(&self) -> &str {
        match self {
            Self::Request(r) => &r.tid,
            Self::Response(r) => &r.tid,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("to-path"), "To-Path");
        assert_eq!(canonical_header_name("BYTE-RANGE"), "Byte-Range");
        assert_eq!(canonical_header_name("x-custom-thing"), "X-Custom-Thing");
        assert_eq!(canonical_header_name("www-authenticate"), "WWW-Authenticate");
        assert_eq!(canonical_header_name("message-id"), "Message-ID");
        assert_eq!(canonical_header_name("MESSAGE-ID"), "Message-ID");
    }

    #[test]
    fn test_byte_range_last_byte() {
        assert_eq!(ByteRange::new(1, 10, 26).last_byte(10), Some(10));
        assert_eq!(ByteRange::new(20, 26, 26).last_byte(7), Some(26));
        assert_eq!(ByteRange::new(20, 26, 26).last_byte(8), None);
        assert_eq!(ByteRange::parse("18446744073709551615-*/*").unwrap().last_byte(5), None);
        assert_eq!(ByteRange::parse("18446744073709551615-*/*").unwrap().last_byte(1), Some(u64::MAX));
    }

    #[test]
    fn test_byte_range_parse() {
        assert_eq!(ByteRange::parse("1-10/26").unwrap(), ByteRange::new(1, 10, 26));
        let open = ByteRange::parse("11-*/*").unwrap();
        assert_eq!(open.start, 11);
        assert_eq!(open.end, None);
        assert_eq!(open.total, None);
        assert_eq!(open.to_string(), "11-*/*");
        assert_eq!(ByteRange::parse("1-0/0").unwrap(), ByteRange::new(1, 0, 0));

        assert!(ByteRange::parse("0-10/26").is_err());
        assert!(ByteRange::parse("1-10").is_err());
        assert!(ByteRange::parse("a-10/26").is_err());
    }

    #[test]
    fn test_failure_report_policy() {
        assert!(FailureReport::Yes.respond_on_success());
        assert!(FailureReport::Yes.respond_on_failure());
        assert!(!FailureReport::No.respond_on_success());
        assert!(!FailureReport::No.respond_on_failure());
        assert!(!FailureReport::Partial.respond_on_success());
        assert!(FailureReport::Partial.respond_on_failure());
    }

    #[test]
    fn test_known_header_parsing() {
        assert_eq!(
            Header::parse("message-id", " 87652491 ").unwrap(),
            Header::MessageId("87652491".into())
        );
        assert_eq!(
            Header::parse("Failure-Report", "partial").unwrap(),
            Header::FailureReport(FailureReport::Partial)
        );
        assert_eq!(
            Header::parse("Status", "000 200 OK").unwrap(),
            Header::Status(ReportStatus::new(200))
        );
        assert_eq!(Header::parse("Expires", "900").unwrap(), Header::Expires(900));
        assert_eq!(
            Header::parse("use-path", "msrps://a.example;tcp msrps://b.example;tcp").unwrap(),
            Header::UsePath(vec!["msrps://a.example;tcp".into(), "msrps://b.example;tcp".into()])
        );
        assert!(matches!(
            Header::parse("WWW-Authenticate", r#"Digest realm="r", nonce="n""#).unwrap(),
            Header::WwwAuthenticate(_)
        ));

        assert!(Header::parse("Failure-Report", "maybe").is_err());
        assert!(Header::parse("Expires", "soon").is_err());
        assert!(Header::parse("Status", "200 OK").is_err());
    }

    #[test]
    fn test_unknown_headers_are_ordered_and_repeatable() {
        let headers: Headers = [
            Header::parse("x-foo", "1").unwrap(),
            Header::parse("X-FOO", "2").unwrap(),
            Header::parse("x-bar", "3").unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(headers.get_all("x-foo").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(headers.iter().map(Header::name).collect::<Vec<_>>(), vec!["X-Foo", "X-Foo", "X-Bar"]);
    }

    #[test]
    fn test_headers_set_replaces() {
        let mut headers = Headers::new();
        headers.push(Header::Expires(10));
        headers.push(Header::MessageId("m".into()));
        headers.push(Header::Expires(20));
        headers.set(Header::Expires(30));
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.expires(), Some(30));
        assert_eq!(headers.iter().next(), Some(&Header::Expires(30)));
    }

    #[test]
    fn test_default_report_policies() {
        let headers = Headers::new();
        assert_eq!(headers.failure_report(), FailureReport::Yes);
        assert_eq!(headers.success_report(), None);
    }

    #[test]
    fn test_response_paths() {
        let request = Request::new(
            Method::Send,
            vec!["msrp://relay;tcp".into(), "msrp://bob.invalid/b;tcp".into()],
            vec!["msrp://alice.invalid/a;tcp".into()],
        );
        let response = request.response(status::OK);
        assert_eq!(response.tid, request.tid);
        assert_eq!(response.to_path, vec!["msrp://alice.invalid/a;tcp"]);
        assert_eq!(response.from_path, vec!["msrp://bob.invalid/b;tcp"]);
        assert_eq!(response.comment.as_deref(), Some("OK"));
    }

    #[test]
    fn test_flag_bytes() {
        for flag in [Flag::Continued, Flag::End, Flag::Abort] {
            assert_eq!(Flag::try_from(flag.as_byte()), Ok(flag));
        }
        assert_eq!(Flag::try_from(b'x'), Err(b'x'));
    }
}
