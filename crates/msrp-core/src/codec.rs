//! Wire encoding and decoding of MSRP frames (RFC 4975 §7).
//!
//! ```text
//! MSRP a786hjs2 SEND\r\n
//! To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp\r\n
//! From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp\r\n
//! Message-ID: 87652491\r\n
//! Byte-Range: 1-25/25\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! Hey Bob, are you there?\r\n
//! -------a786hjs2$\r\n
//! ```
//!
//! [`StreamFramer`] cuts a TCP byte stream into such frames before
//! [`decode`] is applied.

use crate::error::ParseError;
use crate::message::{
    ByteRange, Flag, Header, Headers, Message, Method, Request, Response, canonical_header_name,
    parse_three_digits,
};

/// End-line dashes preceding the transaction id
pub const END_LINE_DASHES: &[u8] = b"-------";

/// Default bound on a single buffered frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const CRLF: &[u8] = b"\r\n";

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn end_marker(tid: &str) -> Vec<u8> {
    let mut marker = Vec::with_capacity(END_LINE_DASHES.len() + tid.len());
    marker.extend_from_slice(END_LINE_DASHES);
    marker.extend_from_slice(tid.as_bytes());
    marker
}

fn is_tid(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b".-+%=".contains(&b))
}

enum FirstLine {
    Request { tid: String, method: Method },
    Response { tid: String, status: u16, comment: Option<String> },
}

fn parse_first_line(line: &str) -> Result<FirstLine, ParseError> {
    let bad = || ParseError::FirstLine(line.to_string());
    let mut parts = line.splitn(3, ' ');
    if parts.next() != Some("MSRP") {
        return Err(bad());
    }
    let tid = parts.next().filter(|t| is_tid(t)).ok_or_else(bad)?.to_string();
    let rest = parts.next().ok_or_else(bad)?;

    let (code, comment) = match rest.split_once(' ') {
        Some((code, comment)) => (code, Some(comment)),
        None => (rest, None),
    };
    if let Some(status) = parse_three_digits(code) {
        let comment = comment.map(str::trim).filter(|c| !c.is_empty()).map(String::from);
        return Ok(FirstLine::Response { tid, status, comment });
    }
    if comment.is_some() || rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(bad());
    }
    Ok(FirstLine::Request {
        tid,
        method: Method::from_token(rest),
    })
}

#[derive(Default)]
struct Head {
    to_path: Option<Vec<String>>,
    from_path: Option<Vec<String>>,
    byte_range: Option<ByteRange>,
    content_type: Option<String>,
    headers: Headers,
}

impl Head {
    fn apply(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let text = std::str::from_utf8(line).map_err(|_| ParseError::Header {
            name: String::from_utf8_lossy(line).into_owned(),
            value: String::new(),
        })?;
        let (name, value) = text.split_once(':').ok_or_else(|| ParseError::Header {
            name: text.to_string(),
            value: String::new(),
        })?;
        let canonical = canonical_header_name(name);
        let value = value.trim();
        match canonical.as_str() {
            "To-Path" | "From-Path" => {
                let path: Vec<String> = value.split_whitespace().map(String::from).collect();
                if path.is_empty() {
                    return Err(ParseError::Header {
                        name: canonical,
                        value: value.to_string(),
                    });
                }
                if canonical == "To-Path" {
                    self.to_path = Some(path);
                } else {
                    self.from_path = Some(path);
                }
            }
            "Byte-Range" => self.byte_range = Some(ByteRange::parse(value)?),
            "Content-Type" => self.content_type = Some(value.to_string()),
            _ => self.headers.push(Header::parse(&canonical, value)?),
        }
        Ok(())
    }

    fn paths(&mut self) -> Result<(Vec<String>, Vec<String>), ParseError> {
        let missing = |name: &str| ParseError::Header {
            name: name.to_string(),
            value: String::new(),
        };
        let to_path = self.to_path.take().ok_or_else(|| missing("To-Path"))?;
        let from_path = self.from_path.take().ok_or_else(|| missing("From-Path"))?;
        Ok((to_path, from_path))
    }
}

/// Locate the end-line following a body that starts at `body_start`.
///
/// Returns the body end offset and the continuation flag.
fn find_body_end(data: &[u8], body_start: usize, marker: &[u8], tid: &str) -> Result<(usize, Flag), ParseError> {
    if data.get(body_start..).is_some_and(|rest| rest.starts_with(marker)) {
        let flag_at = body_start + marker.len();
        let flag = *data.get(flag_at).ok_or(ParseError::Incomplete)?;
        return Flag::try_from(flag)
            .map(|f| (body_start, f))
            .map_err(|_| ParseError::EndLine(tid.to_string()));
    }

    let mut search = body_start;
    loop {
        let at = find(data, CRLF, search).ok_or(ParseError::Incomplete)?;
        if data[at + CRLF.len()..].starts_with(marker) {
            let flag_at = at + CRLF.len() + marker.len();
            let flag = *data.get(flag_at).ok_or(ParseError::Incomplete)?;
            if let Ok(flag) = Flag::try_from(flag) {
                return Ok((at, flag));
            }
        }
        search = at + 1;
    }
}

/// Decode one complete frame.
///
/// # Errors
///
/// Returns [`ParseError`] if the first line, a header or the end-line is
/// malformed, or [`ParseError::Incomplete`] if the frame is truncated.
pub fn decode(data: &[u8]) -> Result<Message, ParseError> {
    let first_end = find(data, CRLF, 0).ok_or(ParseError::Incomplete)?;
    let first = std::str::from_utf8(&data[..first_end])
        .map_err(|_| ParseError::FirstLine(String::from_utf8_lossy(&data[..first_end]).into_owned()))?;
    let first_line = parse_first_line(first)?;
    let tid = match &first_line {
        FirstLine::Request { tid, .. } | FirstLine::Response { tid, .. } => tid.clone(),
    };
    let marker = end_marker(&tid);

    let mut head = Head::default();
    let mut body = None;
    let mut pos = first_end + CRLF.len();
    let flag = loop {
        let line_end = find(data, CRLF, pos).unwrap_or(data.len());
        let line = &data[pos..line_end];

        if line.is_empty() {
            if line_end >= data.len() {
                return Err(ParseError::Incomplete);
            }
            let body_start = line_end + CRLF.len();
            let (body_end, flag) = find_body_end(data, body_start, &marker, &tid)?;
            body = Some(data[body_start..body_end].to_vec());
            break flag;
        }

        if line.starts_with(END_LINE_DASHES) {
            if line.len() != marker.len() + 1 || !line.starts_with(&marker) {
                return Err(ParseError::EndLine(tid));
            }
            break Flag::try_from(line[marker.len()]).map_err(|_| ParseError::EndLine(tid.clone()))?;
        }

        if line_end >= data.len() {
            return Err(ParseError::Incomplete);
        }
        head.apply(line)?;
        pos = line_end + CRLF.len();
    };

    let (to_path, from_path) = head.paths()?;
    let message = match first_line {
        FirstLine::Request { tid, method } => Message::Request(Request {
            tid,
            method,
            to_path,
            from_path,
            byte_range: head.byte_range,
            headers: head.headers,
            content_type: head.content_type,
            body,
            flag,
        }),
        FirstLine::Response { tid, status, comment } => Message::Response(Response {
            tid,
            status,
            comment,
            to_path,
            from_path,
            headers: head.headers,
        }),
    };
    Ok(message)
}

fn write_line(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(CRLF);
}

fn write_common(out: &mut Vec<u8>, to_path: &[String], from_path: &[String]) {
    write_line(out, "To-Path", &to_path.join(" "));
    write_line(out, "From-Path", &from_path.join(" "));
}

fn write_headers(out: &mut Vec<u8>, headers: &Headers) {
    for header in headers.iter() {
        write_line(out, header.name(), &header.value());
    }
}

fn write_end_line(out: &mut Vec<u8>, tid: &str, flag: Flag) {
    out.extend_from_slice(END_LINE_DASHES);
    out.extend_from_slice(tid.as_bytes());
    out.push(flag.as_byte());
    out.extend_from_slice(CRLF);
}

/// Encode a request.
///
/// If the body contains `-------<tid>`, a fresh transaction id is drawn
/// and written back into `request.tid` before encoding.
#[must_use]
pub fn encode_request(request: &mut Request) -> Vec<u8> {
    if let Some(body) = &request.body {
        while find(body, &end_marker(&request.tid), 0).is_some() {
            let fresh = msrp_crypto::random::transaction_id();
            tracing::debug!(old = %request.tid, new = %fresh, "body collides with end-line, regenerating tid");
            request.tid = fresh;
        }
    }

    let mut out = Vec::with_capacity(256 + request.body_len());
    out.extend_from_slice(format!("MSRP {} {}\r\n", request.tid, request.method).as_bytes());
    write_common(&mut out, &request.to_path, &request.from_path);
    if let Some(range) = &request.byte_range {
        write_line(&mut out, "Byte-Range", &range.to_string());
    }
    write_headers(&mut out, &request.headers);
    if let Some(body) = &request.body {
        if let Some(content_type) = &request.content_type {
            write_line(&mut out, "Content-Type", content_type);
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(body);
        out.extend_from_slice(CRLF);
    }
    write_end_line(&mut out, &request.tid, request.flag);
    out
}

/// Encode a response
#[must_use]
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("MSRP {} {:03}", response.tid, response.status).as_bytes());
    if let Some(comment) = &response.comment {
        out.push(b' ');
        out.extend_from_slice(comment.as_bytes());
    }
    out.extend_from_slice(CRLF);
    write_common(&mut out, &response.to_path, &response.from_path);
    write_headers(&mut out, &response.headers);
    write_end_line(&mut out, &response.tid, Flag::End);
    out
}

/// Encode any frame; see [`encode_request`] for transaction id rewriting.
#[must_use]
pub fn encode(message: &mut Message) -> Vec<u8> {
    match message {
        Message::Request(request) => encode_request(request),
        Message::Response(response) => encode_response(response),
    }
}

/// Splits a byte stream into complete MSRP frames.
///
/// The first line names the transaction id; the frame ends with
/// `CRLF -------<tid><flag> CRLF`.
#[derive(Debug)]
pub struct StreamFramer {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl StreamFramer {
    /// Framer bounded by `max_frame` bytes per frame
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered and not yet returned as a frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::FirstLine`] for a malformed first line and
    /// [`ParseError::FrameTooLarge`] once a frame outgrows the bound. The
    /// stream cannot be resynchronized after either.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ParseError> {
        let skip = self.buf.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        if skip > 0 {
            self.buf.drain(..skip);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some(first_end) = find(&self.buf, CRLF, 0) else {
            return self.check_size();
        };
        let first = String::from_utf8_lossy(&self.buf[..first_end]).into_owned();
        let mut tokens = first.split(' ');
        if tokens.next() != Some("MSRP") {
            return Err(ParseError::FirstLine(first));
        }
        let tid = match tokens.next() {
            Some(tid) if is_tid(tid) => tid.to_string(),
            _ => return Err(ParseError::FirstLine(first)),
        };

        let mut pattern = CRLF.to_vec();
        pattern.extend_from_slice(&end_marker(&tid));
        let mut search = first_end;
        while let Some(at) = find(&self.buf, &pattern, search) {
            let flag_at = at + pattern.len();
            let Some(&flag) = self.buf.get(flag_at) else {
                break;
            };
            if Flag::try_from(flag).is_ok() {
                let frame_end = flag_at + 1 + CRLF.len();
                if self.buf.len() < frame_end {
                    break;
                }
                if &self.buf[flag_at + 1..frame_end] == CRLF {
                    if frame_end > self.max_frame {
                        return Err(ParseError::FrameTooLarge {
                            size: frame_end,
                            max: self.max_frame,
                        });
                    }
                    let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
                    return Ok(Some(frame));
                }
            }
            search = at + 1;
        }
        self.check_size()
    }

    fn check_size(&self) -> Result<Option<Vec<u8>>, ParseError> {
        if self.buf.len() > self.max_frame {
            return Err(ParseError::FrameTooLarge {
                size: self.buf.len(),
                max: self.max_frame,
            });
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FailureReport, ReportStatus};

    const RFC_SEND: &[u8] = b"MSRP a786hjs2 SEND\r\n\
To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp\r\n\
From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp\r\n\
Message-ID: 87652491\r\n\
Byte-Range: 1-25/25\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hey Bob, are you there?\r\n\
-------a786hjs2$\r\n";

    fn sample_request() -> Request {
        let mut request = Request::new(
            Method::Send,
            vec!["msrp://bob.invalid:2855/b0b;tcp".into()],
            vec!["msrp://alice.invalid:2855/a11ce;tcp".into()],
        );
        request.headers.push(Header::MessageId("m1".into()));
        request.headers.push(Header::SuccessReport(true));
        request.headers.push(Header::FailureReport(FailureReport::Yes));
        request.byte_range = Some(ByteRange::new(1, 5, 5));
        request.content_type = Some("text/plain".into());
        request.body = Some(b"hello".to_vec());
        request
    }

    #[test]
    fn test_decode_rfc_example() {
        let Message::Request(request) = decode(RFC_SEND).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.tid, "a786hjs2");
        assert_eq!(request.method, Method::Send);
        assert_eq!(request.to_path, vec!["msrp://bob.example.com:8888/9di4eae923wzd;tcp"]);
        assert_eq!(request.message_id(), Some("87652491"));
        assert_eq!(request.byte_range, Some(ByteRange::new(1, 25, 25)));
        assert_eq!(request.content_type.as_deref(), Some("text/plain"));
        assert_eq!(request.body.as_deref(), Some(&b"Hey Bob, are you there?"[..]));
        assert_eq!(request.flag, Flag::End);
    }

    #[test]
    fn test_decode_bodyless_request_and_abort_flag() {
        let data = b"MSRP dkei38sd SEND\r\n\
To-Path: msrp://a.example/s;tcp\r\n\
From-Path: msrp://b.example/t;tcp\r\n\
Message-ID: 4564dpWd\r\n\
Byte-Range: 1-*/8\r\n\
-------dkei38sd#\r\n";
        let Message::Request(request) = decode(data).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.body, None);
        assert_eq!(request.flag, Flag::Abort);
        assert_eq!(request.byte_range.unwrap().end, None);
    }

    #[test]
    fn test_decode_response() {
        let data = b"MSRP d93kswow 200 OK\r\n\
To-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp\r\n\
From-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp\r\n\
-------d93kswow$\r\n";
        let Message::Response(response) = decode(data).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.comment.as_deref(), Some("OK"));
        assert!(response.is_success());
    }

    #[test]
    fn test_decode_report_status() {
        let data = b"MSRP dkei38sd REPORT\r\n\
To-Path: msrp://alice.example.com:7777/iau39soe2843z;tcp\r\n\
From-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp\r\n\
Message-ID: 12339sdqwer\r\n\
Byte-Range: 1-106/106\r\n\
Status: 000 200 OK\r\n\
-------dkei38sd$\r\n";
        let Message::Request(report) = decode(data).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(report.method, Method::Report);
        assert_eq!(report.headers.status(), Some(ReportStatus::new(200)));
    }

    #[test]
    fn test_decode_unknown_method_and_header() {
        let data = b"MSRP x1 NICKNAME\r\n\
to-path: msrp://a.example/s;tcp\r\n\
from-path: msrp://b.example/t;tcp\r\n\
use-nickname: \"Bob\"\r\n\
-------x1$\r\n";
        let Message::Request(request) = decode(data).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, Method::Other("NICKNAME".into()));
        assert_eq!(request.headers.get_all("Use-Nickname").collect::<Vec<_>>(), vec!["\"Bob\""]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(b"MSRP abc"), Err(ParseError::Incomplete));
        assert!(matches!(decode(b"HTTP/1.1 200 OK\r\n"), Err(ParseError::FirstLine(_))));
        assert!(matches!(decode(b"MSRP abc send\r\n"), Err(ParseError::FirstLine(_))));

        let wrong_tid = b"MSRP abc SEND\r\nTo-Path: msrp://a/s;tcp\r\nFrom-Path: msrp://b/t;tcp\r\n-------xyz$\r\n";
        assert_eq!(decode(wrong_tid), Err(ParseError::EndLine("abc".into())));

        let bad_flag = b"MSRP abc SEND\r\nTo-Path: msrp://a/s;tcp\r\nFrom-Path: msrp://b/t;tcp\r\n-------abc!\r\n";
        assert_eq!(decode(bad_flag), Err(ParseError::EndLine("abc".into())));

        let no_colon = b"MSRP abc SEND\r\nTo-Path msrp://a/s;tcp\r\n-------abc$\r\n";
        assert!(matches!(decode(no_colon), Err(ParseError::Header { .. })));

        let no_paths = b"MSRP abc SEND\r\n-------abc$\r\n";
        assert!(matches!(decode(no_paths), Err(ParseError::Header { .. })));

        let truncated_body = b"MSRP abc SEND\r\nTo-Path: msrp://a/s;tcp\r\nFrom-Path: msrp://b/t;tcp\r\nContent-Type: text/plain\r\n\r\nhalf a bo";
        assert_eq!(decode(truncated_body), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_encode_layout() {
        let mut request = sample_request();
        request.tid = "tid123".into();
        let bytes = encode_request(&mut request);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "MSRP tid123 SEND\r\n\
To-Path: msrp://bob.invalid:2855/b0b;tcp\r\n\
From-Path: msrp://alice.invalid:2855/a11ce;tcp\r\n\
Byte-Range: 1-5/5\r\n\
Message-ID: m1\r\n\
Success-Report: yes\r\n\
Failure-Report: yes\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n\
-------tid123$\r\n"
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut message = Message::Request(sample_request());
        let bytes = encode(&mut message);
        assert_eq!(decode(&bytes).unwrap(), message);

        let mut empty_body = sample_request();
        empty_body.body = Some(Vec::new());
        let mut message = Message::Request(empty_body);
        let bytes = encode(&mut message);
        assert_eq!(decode(&bytes).unwrap(), message);

        let Message::Request(request) = &message else { unreachable!() };
        let mut response = Message::Response(request.response(415));
        let bytes = encode(&mut response);
        assert_eq!(decode(&bytes).unwrap(), response);
    }

    #[test]
    fn test_encode_regenerates_colliding_tid() {
        let mut request = sample_request();
        request.tid = "collide1".into();
        request.body = Some(b"before\r\n-------collide1$\r\nafter".to_vec());
        let bytes = encode_request(&mut request);
        assert_ne!(request.tid, "collide1");

        let Message::Request(decoded) = decode(&bytes).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(decoded.tid, request.tid);
        assert_eq!(decoded.body, request.body);
    }

    #[test]
    fn test_framer_split_across_pushes() {
        let mut framer = StreamFramer::default();
        let (a, b) = RFC_SEND.split_at(40);
        framer.push(a);
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.push(b);
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(RFC_SEND));
        assert_eq!(framer.next_frame().unwrap(), None);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_multiple_frames_and_byte_feed() {
        let mut first = sample_request();
        let mut second = sample_request();
        let mut stream = encode_request(&mut first);
        stream.extend_from_slice(&encode_request(&mut second));

        let mut framer = StreamFramer::default();
        let mut frames = Vec::new();
        for byte in &stream {
            framer.push(std::slice::from_ref(byte));
            while let Some(frame) = framer.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(decode(&frames[0]).unwrap(), Message::Request(first));
        assert_eq!(decode(&frames[1]).unwrap(), Message::Request(second));
    }

    #[test]
    fn test_framer_errors() {
        let mut framer = StreamFramer::default();
        framer.push(b"GET / HTTP/1.1\r\n");
        assert!(matches!(framer.next_frame(), Err(ParseError::FirstLine(_))));

        let mut framer = StreamFramer::new(64);
        framer.push(&[b'x'; 65]);
        assert!(matches!(framer.next_frame(), Err(ParseError::FrameTooLarge { size: 65, max: 64 })));

        let mut framer = StreamFramer::new(32);
        framer.push(RFC_SEND);
        assert!(matches!(framer.next_frame(), Err(ParseError::FrameTooLarge { .. })));
    }
}
