//! Multipart stream framing
//!
//! A small RFC 2046 style codec: each part is `--boundary CRLF`, header lines,
//! a blank line and the body; parts are separated by `CRLF--boundary CRLF`
//! and the stream ends with `CRLF--boundary--`. Bodies are opaque bytes.

use crate::error::{Error, Result};
use std::io::{self, BufRead, BufReader, Read, Write};

/// Largest body a single part may carry
pub const MAX_PART_SIZE: usize = 256 * 1024 * 1024;

/// Longest preamble or header line
pub const MAX_LINE: usize = 8 * 1024;

/// Most header lines a single part may carry
pub const MAX_HEADERS: usize = 64;

/// Media type of a whole transfer
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// Extract the boundary from a `multipart/*` content type
pub fn parse_boundary(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    if !media_type.starts_with("multipart/") {
        return Err(Error::transfer(format!(
            "expected a multipart content type, got {:?}",
            content_type
        )));
    }
    let boundary = params
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty() && b.len() <= 70)
        .ok_or_else(|| Error::transfer("content type carries no boundary"))?;
    Ok(boundary)
}

/// Media type without parameters, lowercased
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

// ==================== Writer ====================

/// Streams parts to an underlying writer
pub struct MultipartWriter<W: Write> {
    out: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> MultipartWriter<W> {
    /// Start a stream with a random boundary
    pub fn new(out: W) -> Self {
        Self::with_boundary(out, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_boundary(out: W, boundary: impl Into<String>) -> Self {
        Self {
            out,
            boundary: boundary.into(),
            parts: 0,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `multipart/mixed` content type announcing this stream's boundary
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", MULTIPART_MIXED, self.boundary)
    }

    /// Write one part
    pub fn write_part(&mut self, headers: &[(&str, &str)], body: &[u8]) -> io::Result<()> {
        if self.parts > 0 {
            self.out.write_all(b"\r\n")?;
        }
        write!(self.out, "--{}\r\n", self.boundary)?;
        for (name, value) in headers {
            write!(self.out, "{}: {}\r\n", name, value)?;
        }
        self.out.write_all(b"\r\n")?;
        self.out.write_all(body)?;
        self.parts += 1;
        Ok(())
    }

    /// Write the closing delimiter and hand back the writer
    pub fn finish(mut self) -> io::Result<W> {
        if self.parts > 0 {
            self.out.write_all(b"\r\n")?;
        }
        write!(self.out, "--{}--\r\n", self.boundary)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

// ==================== Reader ====================

/// One decoded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Part {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// `filename` parameter of the Content-Disposition header
    pub fn filename(&self) -> Option<&str> {
        self.header("Content-Disposition")?
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("filename"))
            .map(|(_, value)| value.trim().trim_matches('"'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Preamble,
    Parts,
    Done,
}

/// Reads parts one at a time from a multipart stream
pub struct MultipartReader<R: Read> {
    input: BufReader<R>,
    delimiter: Vec<u8>,
    state: ReadState,
    max_part_size: usize,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(input: R, boundary: &str) -> Self {
        Self {
            input: BufReader::new(input),
            delimiter: format!("--{}", boundary).into_bytes(),
            state: ReadState::Preamble,
            max_part_size: MAX_PART_SIZE,
        }
    }

    /// Lower the largest accepted body, [`MAX_PART_SIZE`] by default
    pub fn with_max_part_size(mut self, limit: usize) -> Self {
        self.max_part_size = limit.min(MAX_PART_SIZE);
        self
    }

    /// Build a reader from a `multipart/*; boundary=...` content type
    pub fn from_content_type(input: R, content_type: &str) -> Result<Self> {
        Ok(Self::new(input, &parse_boundary(content_type)?))
    }

    /// Read up to and including the next `\n`, but never more than `limit` bytes
    fn read_line(&mut self, line: &mut Vec<u8>, limit: usize) -> Result<()> {
        line.clear();
        let read = (&mut self.input)
            .take(limit as u64)
            .read_until(b'\n', line)?;
        if read == 0 {
            return Err(Error::transfer("truncated multipart stream"));
        }
        Ok(())
    }

    /// A preamble or header line, which must end within [`MAX_LINE`] bytes
    fn read_short_line(&mut self, line: &mut Vec<u8>) -> Result<()> {
        self.read_line(line, MAX_LINE)?;
        if line.len() >= MAX_LINE && !line.ends_with(b"\n") {
            return Err(Error::transfer(format!(
                "multipart line longer than {} bytes",
                MAX_LINE
            )));
        }
        Ok(())
    }

    /// Classify a line as a delimiter: `Some(true)` for the closing one
    fn delimiter_kind(&self, line: &[u8]) -> Option<bool> {
        let rest = line.strip_prefix(self.delimiter.as_slice())?;
        let (closing, rest) = match rest.strip_prefix(b"--") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        rest.iter()
            .all(|b| b.is_ascii_whitespace())
            .then_some(closing)
    }

    /// Next part, or `None` once the closing delimiter has been read
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        let mut line = Vec::new();
        match self.state {
            ReadState::Done => return Ok(None),
            ReadState::Preamble => loop {
                self.read_short_line(&mut line)?;
                match self.delimiter_kind(&line) {
                    Some(true) => {
                        self.state = ReadState::Done;
                        return Ok(None);
                    }
                    Some(false) => break,
                    None => continue,
                }
            },
            ReadState::Parts => {}
        }
        self.state = ReadState::Parts;

        let headers = self.read_headers(&mut line)?;
        let mut body = Vec::new();
        loop {
            // room for the rest of the body plus a closing delimiter line
            let limit = self.max_part_size + 2 - body.len() + self.delimiter.len() + 4;
            self.read_line(&mut line, limit)?;
            if body.ends_with(b"\r\n") {
                if let Some(closing) = self.delimiter_kind(&line) {
                    body.truncate(body.len() - 2);
                    if closing {
                        self.state = ReadState::Done;
                    }
                    return Ok(Some(Part { headers, body }));
                }
            }
            if body.len() + line.len() > self.max_part_size + 2 {
                return Err(Error::transfer(format!(
                    "part larger than {} bytes",
                    self.max_part_size
                )));
            }
            body.extend_from_slice(&line);
        }
    }

    fn read_headers(&mut self, line: &mut Vec<u8>) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        loop {
            self.read_short_line(line)?;
            let text = std::str::from_utf8(line)
                .map_err(|_| Error::transfer("part header is not valid UTF-8"))?
                .trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                return Ok(headers);
            }
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| Error::transfer(format!("malformed part header {:?}", text)))?;
            if headers.len() == MAX_HEADERS {
                return Err(Error::transfer(format!(
                    "part has more than {} headers",
                    MAX_HEADERS
                )));
            }
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (String, Vec<u8>) {
        let mut writer = MultipartWriter::with_boundary(Vec::new(), "XyZ");
        writer
            .write_part(
                &[
                    ("Content-Disposition", "attachment; filename=\"one\""),
                    ("Content-Type", "text/plain"),
                ],
                b"first body\r\nwith a CRLF line",
            )
            .unwrap();
        writer
            .write_part(&[("Content-Type", "application/octet-stream")], b"")
            .unwrap();
        writer
            .write_part(&[("Content-Type", "application/octet-stream")], b"\r\n--XyZ-not-a-delimiter\r\n")
            .unwrap();
        let content_type = writer.content_type();
        (content_type, writer.finish().unwrap())
    }

    #[test]
    fn test_wire_layout() {
        let mut writer = MultipartWriter::with_boundary(Vec::new(), "b");
        writer.write_part(&[("Content-Type", "x/y")], b"body").unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, b"--b\r\nContent-Type: x/y\r\n\r\nbody\r\n--b--\r\n");
    }

    #[test]
    fn test_read_parts() {
        let (content_type, bytes) = sample();
        let mut reader = MultipartReader::from_content_type(bytes.as_slice(), &content_type).unwrap();

        let first = reader.next_part().unwrap().unwrap();
        assert_eq!(first.filename(), Some("one"));
        assert_eq!(first.content_type(), Some("text/plain"));
        assert_eq!(first.body, b"first body\r\nwith a CRLF line");

        let second = reader.next_part().unwrap().unwrap();
        assert!(second.body.is_empty());
        assert_eq!(second.filename(), None);

        let third = reader.next_part().unwrap().unwrap();
        assert_eq!(third.body, b"\r\n--XyZ-not-a-delimiter\r\n");

        assert!(reader.next_part().unwrap().is_none());
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_empty_stream() {
        let writer = MultipartWriter::with_boundary(Vec::new(), "empty");
        let bytes = writer.finish().unwrap();
        let mut reader = MultipartReader::new(bytes.as_slice(), "empty");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_truncated_stream() {
        let (content_type, bytes) = sample();
        let cut = &bytes[..bytes.len() - 12];
        let mut reader = MultipartReader::from_content_type(cut, &content_type).unwrap();
        let err = loop {
            match reader.next_part() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("truncated stream read to completion"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::InvalidTransfer(_)));
    }

    #[test]
    fn test_endless_body_is_cut_off() {
        let input = io::Cursor::new(b"--b\r\nContent-Type: x\r\n\r\n".to_vec()).chain(io::repeat(b'a'));
        let mut reader = MultipartReader::new(input, "b").with_max_part_size(1024);
        let err = reader.next_part().unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
    }

    #[test]
    fn test_body_at_size_limit() {
        let mut writer = MultipartWriter::with_boundary(Vec::new(), "b");
        writer.write_part(&[], &[b'a'; 1024]).unwrap();
        writer.write_part(&[], &[b'a'; 1025]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = MultipartReader::new(bytes.as_slice(), "b").with_max_part_size(1024);
        assert_eq!(reader.next_part().unwrap().unwrap().body.len(), 1024);
        assert!(matches!(reader.next_part(), Err(Error::InvalidTransfer(_))));
    }

    #[test]
    fn test_endless_header_is_cut_off() {
        let input = io::Cursor::new(b"--b\r\nContent-Type: ".to_vec()).chain(io::repeat(b'x'));
        let mut reader = MultipartReader::new(input, "b");
        assert!(matches!(reader.next_part(), Err(Error::InvalidTransfer(_))));

        let preamble = io::repeat(b'-');
        let mut reader = MultipartReader::new(preamble, "b");
        assert!(matches!(reader.next_part(), Err(Error::InvalidTransfer(_))));

        let mut headers = b"--b\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            headers.extend_from_slice(format!("X-Header-{}: {}\r\n", i, i).as_bytes());
        }
        let mut reader = MultipartReader::new(headers.as_slice(), "b");
        assert!(matches!(reader.next_part(), Err(Error::InvalidTransfer(_))));
    }

    #[test]
    fn test_parse_boundary() {
        assert_eq!(parse_boundary("multipart/mixed; boundary=abc").unwrap(), "abc");
        assert_eq!(
            parse_boundary("Multipart/Form-Data; charset=utf-8; Boundary=\"q q\"").unwrap(),
            "q q"
        );
        assert!(parse_boundary("application/json; boundary=abc").is_err());
        assert!(parse_boundary("multipart/mixed").is_err());
        assert_eq!(media_type(" Application/X-Gud-Blob ; x=1"), "application/x-gud-blob");
    }
}
