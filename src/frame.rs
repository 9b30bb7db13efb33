//! Frame codec: serializes a complete HTTP request or response to/from a
//! single binary websocket frame in HTTP/1.1 wire format.
//!
//! Headers are kept as an ordered list of `(name, value)` pairs rather than
//! a `HeaderMap` so that repeated header names survive byte-exact and in
//! their original order — a `HeaderMap` does not promise cross-name
//! iteration order, which the tunnel's header-preservation guarantee needs.

use crate::error::TunnelError;
use bytes::{Bytes, BytesMut};
use std::fmt;

const MAX_HEADERS: usize = 128;

#[derive(Debug)]
pub enum CodecError {
    MalformedStartLine(String),
    MalformedHeader(String),
    ShortBody,
    InvalidMethod(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedStartLine(s) => write!(f, "malformed start line: {s}"),
            CodecError::MalformedHeader(s) => write!(f, "malformed header: {s}"),
            CodecError::ShortBody => write!(f, "body shorter than content-length"),
            CodecError::InvalidMethod(s) => write!(f, "invalid method: {s}"),
        }
    }
}

impl From<CodecError> for TunnelError {
    fn from(e: CodecError) -> Self {
        TunnelError::FrameDecode(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FramedRequest {
    pub method: String,
    /// Request target as it appeared on the start line: `path[?query]`.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct FramedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub trait Framed {
    fn headers(&self) -> &[(String, String)];
    fn headers_mut(&mut self) -> &mut Vec<(String, String)>;

    fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let headers = self.headers_mut();
        if let Some(existing) = headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            existing.1 = value.into();
        } else {
            headers.push((name.to_string(), value.into()));
        }
    }
}

impl Framed for FramedRequest {
    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.headers
    }
}

impl Framed for FramedResponse {
    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.headers
    }
}

fn content_length(headers: &[(String, String)]) -> Result<Option<usize>, CodecError> {
    match headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
    {
        Some((_, v)) => v
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| CodecError::MalformedHeader(format!("bad content-length: {v}"))),
        None => Ok(None),
    }
}

pub fn encode_request(req: &FramedRequest) -> Bytes {
    let mut out = BytesMut::with_capacity(256 + req.body.len());
    out.extend_from_slice(req.method.as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(req.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in &req.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out.freeze()
}

pub fn encode_response(res: &FramedResponse) -> Bytes {
    let mut out = BytesMut::with_capacity(256 + res.body.len());
    out.extend_from_slice(b"HTTP/1.1 ");
    let mut code_buf = itoa::Buffer::new();
    out.extend_from_slice(code_buf.format(res.status).as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(res.reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in &res.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&res.body);
    out.freeze()
}

pub fn decode_request(bytes: &[u8]) -> Result<FramedRequest, CodecError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut raw_headers);
    let head_len = match parsed
        .parse(bytes)
        .map_err(|e| CodecError::MalformedStartLine(e.to_string()))?
    {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            return Err(CodecError::MalformedStartLine(
                "incomplete header block".into(),
            ))
        }
    };

    let method = parsed
        .method
        .ok_or_else(|| CodecError::InvalidMethod("missing method".into()))?
        .to_string();
    let target = parsed
        .path
        .ok_or_else(|| CodecError::MalformedStartLine("missing request target".into()))?
        .to_string();
    let headers = collect_headers(parsed.headers)?;
    let body = extract_body(bytes, head_len, &headers)?;

    Ok(FramedRequest {
        method,
        target,
        headers,
        body,
    })
}

pub fn decode_response(bytes: &[u8]) -> Result<FramedResponse, CodecError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut raw_headers);
    let head_len = match parsed
        .parse(bytes)
        .map_err(|e| CodecError::MalformedStartLine(e.to_string()))?
    {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            return Err(CodecError::MalformedStartLine(
                "incomplete header block".into(),
            ))
        }
    };

    let status = parsed
        .code
        .ok_or_else(|| CodecError::MalformedStartLine("missing status code".into()))?;
    let reason = parsed.reason.unwrap_or("").to_string();
    let headers = collect_headers(parsed.headers)?;
    let body = extract_body(bytes, head_len, &headers)?;

    Ok(FramedResponse {
        status,
        reason,
        headers,
        body,
    })
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<Vec<(String, String)>, CodecError> {
    raw.iter()
        .map(|h| {
            let value = std::str::from_utf8(h.value)
                .map_err(|_| CodecError::MalformedHeader(h.name.to_string()))?
                .to_string();
            Ok((h.name.to_string(), value))
        })
        .collect()
}

fn extract_body(
    bytes: &[u8],
    head_len: usize,
    headers: &[(String, String)],
) -> Result<Bytes, CodecError> {
    let available = bytes.len().saturating_sub(head_len);
    let declared = match content_length(headers)? {
        Some(declared) => {
            if available < declared {
                return Err(CodecError::ShortBody);
            }
            declared
        }
        // No Content-Length: the body is whatever remains in the frame, per
        // §4.1's "bounded by Content-Length or EOF of the frame".
        None => available,
    };
    Ok(Bytes::copy_from_slice(
        &bytes[head_len..head_len + declared],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> FramedRequest {
        FramedRequest {
            method: "POST".into(),
            target: "/a/b?x=1&y=2".into(),
            headers: vec![
                ("Host".into(), "example.com".into()),
                ("Content-Length".into(), "5".into()),
                ("X-Multi".into(), "one".into()),
                ("X-Multi".into(), "two".into()),
            ],
            body: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn request_round_trips() {
        let req = sample_request();
        let encoded = encode_request(&req);
        let decoded = decode_request(&encoded).expect("decode");
        assert_eq!(decoded.method, "POST");
        assert_eq!(decoded.target, "/a/b?x=1&y=2");
        assert_eq!(decoded.body, Bytes::from_static(b"hello"));
        assert_eq!(decoded.headers, req.headers);
    }

    #[test]
    fn response_round_trips() {
        let res = FramedResponse {
            status: 200,
            reason: "OK".into(),
            headers: vec![("Content-Length".into(), "2".into())],
            body: Bytes::from_static(b"hi"),
        };
        let encoded = encode_response(&res);
        let decoded = decode_response(&encoded).expect("decode");
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.reason, "OK");
        assert_eq!(decoded.body, Bytes::from_static(b"hi"));
    }

    #[test]
    fn short_body_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\ncontent-length: 10\r\n\r\nabc";
        match decode_request(raw) {
            Err(CodecError::ShortBody) => {}
            other => panic!("expected ShortBody, got {other:?}"),
        }
    }

    #[test]
    fn missing_content_length_reads_body_to_frame_eof() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nhi";
        let decoded = decode_response(raw).expect("decode");
        assert_eq!(decoded.body, Bytes::from_static(b"hi"));
    }

    #[test]
    fn header_lookup_is_case_insensitive_but_values_are_exact() {
        let req = sample_request();
        assert_eq!(req.header("HOST"), Some("example.com"));
        assert_eq!(req.header("host"), Some("example.com"));
    }

    #[test]
    fn no_body_means_zero_length() {
        let raw = b"GET / HTTP/1.1\r\nhost: a\r\n\r\n";
        let decoded = decode_request(raw).expect("decode");
        assert!(decoded.body.is_empty());
    }
}
