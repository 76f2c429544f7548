//! HTTP/1.x wire handling
//!
//! Just enough of the protocol to route and relay requests: message heads are
//! parsed with `httparse`, bodies are streamed through without buffering
//! whole payloads.

use crate::error::ProxyError;
use anyhow::anyhow;
use http::Method;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_HEADER_BYTES: usize = 64 * 1024;
pub const MAX_HEADER_COUNT: usize = 128;
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024; // 32MB hard cap on inbound bodies

pub type HeaderList = Vec<(String, String)>;

/// Request read from a client connection.
#[derive(Debug)]
pub struct ParsedRequest {
    pub method: Method,
    /// Origin-form request target (path and query)
    pub target: String,
    pub version: String,
    pub headers: HeaderList,
    pub body_kind: RequestBodyKind,
    /// Bytes read past the head; body prefix first, then anything pipelined
    pub buffered: Vec<u8>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Path component of the target, query stripped.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self
                .header("upgrade")
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false)
            && self
                .header("connection")
                .map(|v| has_token(v, "upgrade"))
                .unwrap_or(false)
    }

    pub fn keep_alive(&self) -> bool {
        should_keep_alive(&self.version, &self.headers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBodyKind {
    None,
    ContentLength(usize),
    Chunked,
}

/// Status line and headers of an upstream response.
#[derive(Debug)]
pub struct ResponseHead {
    pub status_code: u16,
    pub reason: String,
    pub version: String,
    pub headers: HeaderList,
    pub raw_head: Vec<u8>,
    pub body_prefix: Vec<u8>,
}

/// How the length of a response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBodyKind {
    None,
    ContentLength(u64),
    Chunked,
    UntilClose,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Informational head (`100 Continue`, `103 Early Hints`) that precedes
    /// the real response. `101` ends the HTTP exchange and is not interim.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status_code) && self.status_code != 101
    }

    pub fn body_kind(&self, request_method: &Method) -> ResponseBodyKind {
        if *request_method == Method::HEAD
            || (100..200).contains(&self.status_code)
            || self.status_code == 204
            || self.status_code == 304
        {
            return ResponseBodyKind::None;
        }
        if self
            .header("transfer-encoding")
            .map(|v| has_token(v, "chunked"))
            .unwrap_or(false)
        {
            return ResponseBodyKind::Chunked;
        }
        match self
            .header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(len) => ResponseBodyKind::ContentLength(len),
            None => ResponseBodyKind::UntilClose,
        }
    }

    /// Whether the client connection can carry another request after this
    /// response has been relayed.
    pub fn allows_reuse(&self, request_method: &Method) -> bool {
        if self.body_kind(request_method) == ResponseBodyKind::UntilClose {
            return false;
        }
        should_keep_alive(&self.version, &self.headers)
    }
}

/// Determine if connection should be kept alive based on HTTP version and headers
pub fn should_keep_alive(version: &str, headers: &[(String, String)]) -> bool {
    match header_value(headers, "connection") {
        Some(v) if has_token(v, "close") => false,
        Some(v) if has_token(v, "keep-alive") => true,
        _ => version.ends_with("1.1"), // HTTP/1.1 defaults to keep-alive
    }
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Case-insensitive membership test for comma-separated header values.
pub fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

pub async fn read_http_request<S>(stream: &mut S, carry: Vec<u8>) -> anyhow::Result<ParsedRequest>
where
    S: AsyncRead + Unpin,
{
    let (raw_head, buffered) = read_message_head(stream, carry).await?;

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
    let mut req = httparse::Request::new(&mut header_storage);
    let status = req.parse(&raw_head)?;
    if status.is_partial() {
        return Err(anyhow!("partial HTTP request"));
    }

    let method = Method::from_bytes(req.method.unwrap_or("GET").as_bytes())?;
    let target = origin_form(req.path.unwrap_or("/"));
    let version = format!("HTTP/1.{}", req.version.unwrap_or(1));
    let headers = collect_headers(req.headers);

    let is_chunked = header_value(&headers, "transfer-encoding")
        .map(|v| has_token(v, "chunked"))
        .unwrap_or(false);
    let content_length = header_value(&headers, "content-length")
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid content-length: {v}"))
        })
        .transpose()?;

    let body_kind = if is_chunked {
        RequestBodyKind::Chunked
    } else if let Some(len) = content_length {
        if len > MAX_REQUEST_BODY_BYTES {
            return Err(ProxyError::RequestBodyTooLarge {
                limit: MAX_REQUEST_BODY_BYTES,
            }
            .into());
        }
        RequestBodyKind::ContentLength(len)
    } else {
        RequestBodyKind::None
    };

    Ok(ParsedRequest {
        method,
        target,
        version,
        headers,
        body_kind,
        buffered,
    })
}

/// Reduce an absolute-form target (`http://host/path`) to its path.
fn origin_form(raw: &str) -> String {
    let Some((_, rest)) = raw.split_once("://") else {
        return raw.to_string();
    };
    match rest.find(['/', '?']) {
        Some(idx) if rest[idx..].starts_with('?') => format!("/{}", &rest[idx..]),
        Some(idx) => rest[idx..].to_string(),
        None => "/".to_string(),
    }
}

/// Read a response head. `carry` holds bytes already received after the
/// previous head on the same connection (an interim `1xx` response).
pub async fn read_response_head<S>(stream: &mut S, carry: Vec<u8>) -> anyhow::Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    let (raw_head, body_prefix) = read_message_head(stream, carry).await?;

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
    let mut res = httparse::Response::new(&mut header_storage);
    let status = res.parse(&raw_head)?;
    if status.is_partial() {
        return Err(anyhow!("partial HTTP response"));
    }

    Ok(ResponseHead {
        status_code: res.code.unwrap_or(500),
        reason: res.reason.unwrap_or("").to_string(),
        version: format!("HTTP/1.{}", res.version.unwrap_or(1)),
        headers: collect_headers(res.headers),
        raw_head,
        body_prefix,
    })
}

/// Read until the blank line ending a message head. Returns the head and any
/// bytes read past it.
async fn read_message_head<S>(stream: &mut S, carry: Vec<u8>) -> anyhow::Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = carry;
    let mut temp = [0u8; 4096];

    loop {
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buffer.split_off(end + 4);
            return Ok((buffer, rest));
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("HTTP headers exceed allowed size"));
        }

        let bytes_read = stream.read(&mut temp).await?;
        if bytes_read == 0 {
            break;
        }
        buffer.extend_from_slice(&temp[..bytes_read]);
    }

    Err(anyhow!("connection closed before headers completed"))
}

/// Stream the request body from the client to the upstream. Anything read
/// past the end of the body stays in `request.buffered`.
pub async fn forward_request_body<C, U>(
    client: &mut C,
    upstream: &mut U,
    request: &mut ParsedRequest,
) -> anyhow::Result<u64>
where
    C: AsyncRead + Unpin,
    U: AsyncWrite + Unpin,
{
    match request.body_kind {
        RequestBodyKind::None => Ok(0),
        RequestBodyKind::ContentLength(length) => {
            let buffered = std::mem::take(&mut request.buffered);
            let leftover = copy_exact(client, upstream, buffered, length as u64).await?;
            request.buffered = leftover;
            Ok(length as u64)
        }
        RequestBodyKind::Chunked => {
            let buffered = std::mem::take(&mut request.buffered);
            let (total, leftover) =
                forward_chunked(buffered, client, upstream, Some(MAX_REQUEST_BODY_BYTES)).await?;
            request.buffered = leftover;
            Ok(total)
        }
    }
}

/// Relay an upstream response body to the client.
pub async fn relay_response_body<U, C>(
    upstream: &mut U,
    client: &mut C,
    head: &mut ResponseHead,
    kind: ResponseBodyKind,
) -> anyhow::Result<u64>
where
    U: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let prefix = std::mem::take(&mut head.body_prefix);
    match kind {
        ResponseBodyKind::None => Ok(0),
        ResponseBodyKind::ContentLength(len) => {
            copy_exact(upstream, client, prefix, len).await?;
            Ok(len)
        }
        ResponseBodyKind::Chunked => {
            let (total, _) = forward_chunked(prefix, upstream, client, None).await?;
            Ok(total)
        }
        ResponseBodyKind::UntilClose => {
            client.write_all(&prefix).await?;
            let copied = tokio::io::copy(upstream, client).await?;
            Ok(prefix.len() as u64 + copied)
        }
    }
}

/// Copy exactly `len` bytes, consuming `prefix` first. Returns the unused
/// part of `prefix`.
async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut prefix: Vec<u8>,
    len: u64,
) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let from_prefix = (prefix.len() as u64).min(len) as usize;
    writer.write_all(&prefix[..from_prefix]).await?;
    prefix.drain(..from_prefix);

    let mut remaining = len - from_prefix as u64;
    let mut buf = vec![0u8; 8192];
    while remaining > 0 {
        let read_len = (buf.len() as u64).min(remaining) as usize;
        let n = reader.read(&mut buf[..read_len]).await?;
        if n == 0 {
            return Err(anyhow!("connection closed while reading message body"));
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(prefix)
}

/// Forward a chunked body verbatim (chunk framing and trailers included).
/// Returns the payload size and any bytes read past the terminating chunk.
async fn forward_chunked<R, W>(
    initial: Vec<u8>,
    reader: &mut R,
    writer: &mut W,
    limit: Option<usize>,
) -> anyhow::Result<(u64, Vec<u8>)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer: VecDeque<u8> = initial.into();
    let mut total: usize = 0;

    loop {
        let line = read_crlf_line(&mut buffer, reader).await?;
        writer.write_all(&line).await?;

        let header_bytes = &line[..line.len() - 2];
        let size_token = std::str::from_utf8(header_bytes)
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim();
        let chunk_size = usize::from_str_radix(size_token, 16)
            .map_err(|_| anyhow!("invalid chunk size: {size_token}"))?;

        if chunk_size == 0 {
            // Trailers end with blank line
            loop {
                let trailer_line = read_crlf_line(&mut buffer, reader).await?;
                writer.write_all(&trailer_line).await?;
                if trailer_line == b"\r\n" {
                    break;
                }
            }
            break;
        }

        total = total
            .checked_add(chunk_size)
            .ok_or_else(|| anyhow!("chunked body length overflow"))?;
        if let Some(limit) = limit {
            if total > limit {
                return Err(ProxyError::RequestBodyTooLarge { limit }.into());
            }
        }

        let chunk_data = read_exact_from_buffer(&mut buffer, reader, chunk_size).await?;
        writer.write_all(&chunk_data).await?;

        let crlf = read_exact_from_buffer(&mut buffer, reader, 2).await?;
        if crlf != b"\r\n" {
            return Err(anyhow!("invalid chunk terminator"));
        }
        writer.write_all(&crlf).await?;
    }

    Ok((total as u64, buffer.into()))
}

async fn read_crlf_line<R>(buffer: &mut VecDeque<u8>, stream: &mut R) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut scanned = 0;
    loop {
        let line_end = buffer
            .iter()
            .skip(scanned)
            .zip(buffer.iter().skip(scanned + 1))
            .position(|(&cr, &lf)| cr == b'\r' && lf == b'\n')
            .map(|offset| scanned + offset + 2);
        if let Some(end) = line_end {
            return Ok(buffer.drain(..end).collect());
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("chunk header line too long"));
        }
        // A CR at the very end may still pair with the next byte
        scanned = buffer.len().saturating_sub(1);
        read_more(buffer, stream).await?;
    }
}

async fn read_exact_from_buffer<R>(
    buffer: &mut VecDeque<u8>,
    stream: &mut R,
    len: usize,
) -> anyhow::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    while buffer.len() < len {
        read_more(buffer, stream).await?;
    }
    Ok(buffer.drain(..len).collect())
}

/// Append the next read from `stream`; EOF mid-body is an error.
async fn read_more<R>(buffer: &mut VecDeque<u8>, stream: &mut R) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    match stream.read(&mut chunk).await? {
        0 => Err(anyhow!("connection closed inside chunked body")),
        n => {
            buffer.extend(&chunk[..n]);
            Ok(())
        }
    }
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> HeaderList {
    parsed
        .iter()
        .map(|h| (h.name.to_owned(), String::from_utf8_lossy(h.value).into_owned()))
        .collect()
}

pub async fn write_request_head<W>(
    writer: &mut W,
    method: &Method,
    target: &str,
    version: &str,
    headers: &[(String, String)],
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("{method} {target} {version}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    writer.write_all(head.as_bytes()).await?;
    Ok(())
}

/// Write a complete response with a fixed-length body.
pub async fn write_response<W>(
    writer: &mut W,
    code: u16,
    reason: &str,
    headers: &[(&str, String)],
    body: &[u8],
    include_body: bool,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {code} {reason}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut out = head.into_bytes();
    if include_body {
        out.extend_from_slice(body);
    }
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Plain-text error response that closes the connection.
pub async fn respond_with_status<W>(
    stream: &mut W,
    code: u16,
    message: &str,
    body: &str,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_response(
        stream,
        code,
        message,
        &[
            ("Connection", "close".to_string()),
            ("Content-Type", "text/plain; charset=utf-8".to_string()),
        ],
        body.as_bytes(),
        true,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn parses_origin_form_request_with_leftover_bytes() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"POST /api/sentiment HTTP/1.1\r\nHost: localhost:3000\r\n")
            .read(b"Content-Length: 4\r\n\r\nabcdGET /next")
            .build();

        let req = read_http_request(&mut stream, Vec::new()).await.unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.target, "/api/sentiment");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.header("host"), Some("localhost:3000"));
        assert_eq!(req.body_kind, RequestBodyKind::ContentLength(4));
        assert_eq!(req.buffered, b"abcdGET /next");
        assert!(req.keep_alive());
    }

    #[tokio::test]
    async fn carried_bytes_start_the_next_request() {
        let mut stream = tokio_test::io::Builder::new().read(b"\r\n\r\n").build();
        let carry = b"GET /health HTTP/1.0\r\nConnection: close".to_vec();
        let req = read_http_request(&mut stream, carry).await.unwrap();
        assert_eq!(req.target, "/health");
        assert!(!req.keep_alive());
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let head = format!(
            "POST /api HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_BODY_BYTES + 1
        );
        let mut stream = tokio_test::io::Builder::new().read(head.as_bytes()).build();
        let err = read_http_request(&mut stream, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProxyError>(),
            Some(ProxyError::RequestBodyTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_head_is_an_error() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"GET / HTTP/1.1\r\nHost")
            .build();
        assert!(read_http_request(&mut stream, Vec::new()).await.is_err());
    }

    #[test]
    fn absolute_form_targets_reduce_to_path() {
        assert_eq!(origin_form("http://localhost:3000/api/x?y=1"), "/api/x?y=1");
        assert_eq!(origin_form("http://localhost:3000"), "/");
        assert_eq!(origin_form("http://localhost:3000?q"), "/?q");
        assert_eq!(origin_form("/plain"), "/plain");
    }

    #[test]
    fn websocket_upgrade_detection() {
        let req = ParsedRequest {
            method: Method::GET,
            target: "/api/ws".into(),
            version: "HTTP/1.1".into(),
            headers: vec![
                ("Upgrade".into(), "websocket".into()),
                ("Connection".into(), "keep-alive, Upgrade".into()),
            ],
            body_kind: RequestBodyKind::None,
            buffered: Vec::new(),
        };
        assert!(req.is_websocket_upgrade());
        assert_eq!(req.path(), "/api/ws");
    }

    #[test]
    fn response_body_kind_rules() {
        let head = |code: u16, headers: HeaderList| ResponseHead {
            status_code: code,
            reason: String::new(),
            version: "HTTP/1.1".into(),
            headers,
            raw_head: Vec::new(),
            body_prefix: Vec::new(),
        };

        let fixed = head(200, vec![("Content-Length".into(), "5".into())]);
        assert_eq!(fixed.body_kind(&Method::GET), ResponseBodyKind::ContentLength(5));
        assert_eq!(fixed.body_kind(&Method::HEAD), ResponseBodyKind::None);
        assert!(fixed.allows_reuse(&Method::GET));

        let chunked = head(200, vec![("Transfer-Encoding".into(), "chunked".into())]);
        assert_eq!(chunked.body_kind(&Method::GET), ResponseBodyKind::Chunked);

        let open = head(200, vec![]);
        assert_eq!(open.body_kind(&Method::GET), ResponseBodyKind::UntilClose);
        assert!(!open.allows_reuse(&Method::GET));

        let closing = head(
            200,
            vec![
                ("Content-Length".into(), "0".into()),
                ("Connection".into(), "close".into()),
            ],
        );
        assert!(!closing.allows_reuse(&Method::GET));

        assert_eq!(head(304, vec![]).body_kind(&Method::GET), ResponseBodyKind::None);
        assert_eq!(head(204, vec![]).body_kind(&Method::GET), ResponseBodyKind::None);
    }

    #[tokio::test]
    async fn chunked_body_is_forwarded_verbatim() {
        let (mut reader, mut writer) = duplex(256);
        tokio::spawn(async move {
            writer
                .write_all(b"4\r\nRust\r\n6\r\nProxy!\r\n0\r\n\r\nextra")
                .await
                .unwrap();
        });

        let mut out = Vec::new();
        let (total, leftover) = forward_chunked(Vec::new(), &mut reader, &mut out, None)
            .await
            .expect("chunked body should forward");

        assert_eq!(total, 10);
        assert_eq!(out, b"4\r\nRust\r\n6\r\nProxy!\r\n0\r\n\r\n");
        assert_eq!(leftover, b"extra");
    }

    #[tokio::test]
    async fn chunked_body_respects_limit() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"a\r\n0123456789\r\n0\r\n\r\n")
            .build();
        let mut out = Vec::new();
        let err = forward_chunked(Vec::new(), &mut reader, &mut out, Some(4))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ProxyError>().is_some());
    }

    #[tokio::test]
    async fn fixed_body_uses_prefix_then_stream() {
        let mut reader = tokio_test::io::Builder::new().read(b"llo").build();
        let mut out = Vec::new();
        let leftover = copy_exact(&mut reader, &mut out, b"he".to_vec(), 5)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        assert!(leftover.is_empty());

        let mut idle = tokio_test::io::Builder::new().build();
        let mut out = Vec::new();
        let leftover = copy_exact(&mut idle, &mut out, b"hello world".to_vec(), 5)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(leftover, b" world");
    }

    #[tokio::test]
    async fn status_response_closes_connection() {
        let mut out = Vec::new();
        respond_with_status(&mut out, 502, "Bad Gateway", "Unable to reach upstream server")
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Content-Length: 31\r\n"));
        assert!(text.ends_with("\r\n\r\nUnable to reach upstream server"));
    }

    #[tokio::test]
    async fn final_head_follows_interim_head_from_carry() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-")
            .read(b"Length: 2\r\n\r\nOK")
            .build();

        let interim = read_response_head(&mut stream, Vec::new()).await.unwrap();
        assert_eq!(interim.status_code, 100);
        assert!(interim.is_interim());
        assert_eq!(interim.raw_head, b"HTTP/1.1 100 Continue\r\n\r\n");

        let last = read_response_head(&mut stream, interim.body_prefix).await.unwrap();
        assert_eq!(last.status_code, 200);
        assert!(!last.is_interim());
        assert_eq!(last.body_kind(&Method::POST), ResponseBodyKind::ContentLength(2));
        assert_eq!(last.body_prefix, b"OK");
    }

    #[test]
    fn switching_protocols_is_not_interim() {
        let head = |status_code| ResponseHead {
            status_code,
            reason: String::new(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            raw_head: Vec::new(),
            body_prefix: Vec::new(),
        };
        assert!(head(103).is_interim());
        assert!(!head(101).is_interim());
        assert!(!head(204).is_interim());
    }

    #[tokio::test]
    async fn chunk_size_line_split_between_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"5\r")
            .read(b"\nhello\r\n0\r")
            .read(b"\n\r\nGET /next")
            .build();
        let mut out = Vec::new();
        let (total, leftover) = forward_chunked(Vec::new(), &mut reader, &mut out, None)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
        assert_eq!(leftover, b"GET /next");
    }
}
