//! SMTP reply parsing: single lines, logical responses, and the byte-level
//! accumulation the connection feeds socket chunks into

use std::fmt::{Display, Formatter, Result as FmtResult};

use nom::{
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::char,
    combinator::{map, map_res, rest},
    sequence::tuple,
    IResult,
};

/// Represents a 3 digit SMTP reply code
///
/// Any three ASCII digits are accepted; the code is not validated against the
/// RFC 5321 grammar beyond that.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Code(u16);

impl Code {
    /// Creates a new `Code`
    pub fn new(code: u16) -> Code {
        debug_assert!(code < 1000, "SMTP reply codes have three digits");
        Code(code)
    }

    /// Tells if the code is positive (2yz or 3yz)
    pub fn is_positive(self) -> bool {
        (200..400).contains(&self.0)
    }

    /// Tells if the code is a transient negative completion (4yz)
    pub fn is_transient(self) -> bool {
        (400..500).contains(&self.0)
    }

    /// Tells if the code is a permanent negative completion (5yz)
    pub fn is_permanent(self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:03}", self.0)
    }
}

impl From<Code> for u16 {
    fn from(code: Code) -> Self {
        code.0
    }
}

/// One line of server output
///
/// A valid reply line is three ASCII digits, a one character separator (`' '`
/// for the terminal line, `'-'` for a continuation), then free text.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ReplyLine {
    /// Reply code of this line
    pub code: Code,
    /// True when this is the terminal line of the logical response
    pub last: bool,
    /// Free-text payload after the separator
    pub text: String,
}

impl Display for ReplyLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let separator = if self.last { ' ' } else { '-' };
        write!(f, "{}{}{}", self.code, separator, self.text)
    }
}

/// Contains an SMTP reply, with separated code and message
///
/// Aggregates every line of a multi-line reply, in wire order.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    code: Code,
    message: Vec<String>,
}

impl Response {
    /// Creates a new `Response`
    pub fn new(code: Code, message: Vec<String>) -> Response {
        Response { code, message }
    }

    /// Tells if the response is positive
    pub fn is_positive(&self) -> bool {
        self.code.is_positive()
    }

    /// Tests code equality
    pub fn has_code(&self, code: u16) -> bool {
        u16::from(self.code) == code
    }

    /// Reply code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns only the first word of the message if possible
    pub fn first_word(&self) -> Option<&str> {
        self.message
            .first()
            .and_then(|line| line.split_whitespace().next())
    }

    /// Returns only the first line of the message if possible
    pub fn first_line(&self) -> Option<&str> {
        self.message.first().map(String::as_str)
    }

    /// Server response text (one entry per line, wire order)
    pub fn message(&self) -> impl Iterator<Item = &str> {
        self.message.iter().map(String::as_str)
    }
}

fn parse_code(i: &str) -> IResult<&str, Code> {
    map_res(
        take_while_m_n(3, 3, |c: char| c.is_ascii_digit()),
        |digits: &str| digits.parse::<u16>().map(Code::new),
    )(i)
}

fn parse_separator(i: &str) -> IResult<&str, bool> {
    alt((map(char(' '), |_| true), map(char('-'), |_| false)))(i)
}

/// Parses one reply line, without its CRLF terminator
///
/// Lines that do not match the `^\d{3}[ -].*$` shape yield `None` and are
/// meant to be discarded by the caller.
pub fn parse_reply_line(line: &str) -> Option<ReplyLine> {
    let (_, (code, last, text)) = tuple((parse_code, parse_separator, rest))(line).ok()?;
    Some(ReplyLine {
        code,
        last,
        text: text.to_owned(),
    })
}

/// Accumulates raw socket bytes into logical responses
///
/// Chunks are split on CRLF boundaries; a partial line at the end of a chunk
/// is kept and prefixed onto the next chunk. Fragments that do not parse as
/// reply lines are logged and dropped.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
    lines: Vec<ReplyLine>,
}

impl ResponseBuffer {
    /// Creates an empty buffer
    pub fn new() -> ResponseBuffer {
        ResponseBuffer::default()
    }

    /// Feeds one chunk of socket bytes into the buffer
    pub fn feed(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);

        while let Some(pos) = find_crlf(&self.bytes) {
            let raw: Vec<u8> = self.bytes.drain(..pos + 2).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            match parse_reply_line(&line) {
                Some(reply) => self.lines.push(reply),
                None => tracing::debug!("dropping unparseable line: {line:?}"),
            }
        }
    }

    /// Takes the oldest complete logical response, if one has accumulated
    ///
    /// A response is complete once a line with a `' '` separator has been
    /// buffered; its code is the terminal line's code.
    pub fn take_response(&mut self) -> Option<Response> {
        let end = self.lines.iter().position(|line| line.last)?;
        let lines: Vec<ReplyLine> = self.lines.drain(..=end).collect();
        let code = lines.last().map(|line| line.code)?;
        Some(Response::new(
            code,
            lines.into_iter().map(|line| line.text).collect(),
        ))
    }

    /// Tells if no bytes or reply lines are pending
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.lines.is_empty()
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|window| window == b"\r\n")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_code_display() {
        assert_eq!(Code::new(421).to_string(), "421");
        assert_eq!(Code::new(42).to_string(), "042");
    }

    #[test]
    fn test_code_classes() {
        assert!(Code::new(250).is_positive());
        assert!(Code::new(354).is_positive());
        assert!(Code::new(421).is_transient());
        assert!(Code::new(550).is_permanent());
        assert!(!Code::new(550).is_positive());
    }

    #[test]
    fn test_parse_reply_line() {
        let line = parse_reply_line("250 OK").unwrap();
        assert_eq!(line.code, Code::new(250));
        assert!(line.last);
        assert_eq!(line.text, "OK");

        let line = parse_reply_line("250-SIZE 35882577").unwrap();
        assert!(!line.last);
        assert_eq!(line.text, "SIZE 35882577");

        // digits are not checked beyond being digits
        let line = parse_reply_line("999 anything").unwrap();
        assert_eq!(u16::from(line.code), 999);

        // empty payload is fine
        let line = parse_reply_line("220 ").unwrap();
        assert_eq!(line.text, "");
    }

    #[test]
    fn test_parse_reply_line_malformed() {
        assert_eq!(parse_reply_line(""), None);
        assert_eq!(parse_reply_line("OK"), None);
        assert_eq!(parse_reply_line("25 OK"), None);
        assert_eq!(parse_reply_line("2506-me"), None);
        assert_eq!(parse_reply_line("250"), None);
        assert_eq!(parse_reply_line("abc def"), None);
    }

    #[test]
    fn test_reply_line_roundtrip() {
        for raw in ["250 OK", "250-SIZE 35882577", "421 go away", "334 "] {
            assert_eq!(parse_reply_line(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_single_line_response() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"220 smtp.example.org ESMTP ready\r\n");
        let response = buffer.take_response().unwrap();
        assert_eq!(response.code(), Code::new(220));
        assert_eq!(response.first_word(), Some("smtp.example.org"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiline_response() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"250-me\r\n250-SIZE 42\r\n");
        assert_eq!(buffer.take_response(), None);
        buffer.feed(b"250 AUTH PLAIN LOGIN\r\n");
        let response = buffer.take_response().unwrap();
        assert_eq!(response.code(), Code::new(250));
        assert_eq!(
            response.message().collect::<Vec<_>>(),
            ["me", "SIZE 42", "AUTH PLAIN LOGIN"]
        );
    }

    #[test]
    fn test_chunk_split_mid_line() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"25");
        assert_eq!(buffer.take_response(), None);
        buffer.feed(b"0 O");
        assert_eq!(buffer.take_response(), None);
        buffer.feed(b"K\r");
        assert_eq!(buffer.take_response(), None);
        buffer.feed(b"\n");
        let response = buffer.take_response().unwrap();
        assert_eq!(response.first_line(), Some("OK"));
    }

    #[test]
    fn test_stray_bytes_are_dropped() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"garbage\r\n250-hello\r\nmore garbage\r\n250 done\r\n");
        let response = buffer.take_response().unwrap();
        assert_eq!(response.message().collect::<Vec<_>>(), ["hello", "done"]);
    }

    #[test]
    fn test_back_to_back_responses() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"250 first\r\n354 second\r\n");
        assert_eq!(buffer.take_response().unwrap().code(), Code::new(250));
        assert_eq!(buffer.take_response().unwrap().code(), Code::new(354));
        assert_eq!(buffer.take_response(), None);
    }

    #[test]
    fn test_partial_tail_is_retained() {
        let mut buffer = ResponseBuffer::new();
        buffer.feed(b"250 ok\r\n220 partial");
        assert!(buffer.take_response().is_some());
        assert!(!buffer.is_empty());
    }
}
