//! Blocking single-shot HTTP/1.1 GET used for embed documents and manifests.

use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;

use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use tracing::debug;
use vt_core::ShellError;
use vt_core::ShellResult;

use crate::tls::BoxedIoStream;
use crate::tls::TrustStoreMode;
use crate::tls::connect_tls;
use crate::url::ShellUrl;

const USER_AGENT: &str = "vitrine-shell/0.1";
const ACCEPT: &str = "application/manifest+json,application/json;q=0.9,*/*;q=0.8";
const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;

pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(20);

/// One response header with its wire casing preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Response to a shell fetch with the body already content-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// HTTP/1.1 GET client. Connections are never reused and redirects are
/// reported as errors instead of followed.
pub struct HttpFetcher {
    trust_store: TrustStoreMode,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_body_bytes: usize,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            trust_store: TrustStoreMode::WebPkiOnly,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_trust_store(mode: TrustStoreMode) -> Self {
        Self {
            trust_store: mode,
            ..Self::new()
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    pub fn set_max_body_bytes(&mut self, limit: usize) {
        self.max_body_bytes = limit;
    }

    pub fn get(&self, url: &ShellUrl) -> ShellResult<FetchedDocument> {
        let mut stream = self.open_stream(url)?;
        write_request(&mut *stream, url)?;
        let document = read_response(&mut *stream, self.max_body_bytes)?;
        debug!(
            url = %url,
            status = document.status,
            bytes = document.body.len(),
            "fetched document"
        );
        Ok(document)
    }

    fn open_stream(&self, url: &ShellUrl) -> ShellResult<BoxedIoStream> {
        let addresses = (url.host(), url.port())
            .to_socket_addrs()
            .map_err(|error| {
                ShellError::new(
                    "net.dns.resolve_failed",
                    format!("failed to resolve `{}`: {error}", url.host()),
                )
            })?
            .collect::<Vec<_>>();

        let mut last_error: Option<ShellError> = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => return self.configure_stream(stream, url),
                Err(error) => {
                    last_error = Some(ShellError::new(
                        "net.tcp.connect_failed",
                        format!("failed to connect to `{address}`: {error}"),
                    ));
                }
            }
        }

        match last_error {
            Some(error) => Err(error),
            None => Err(ShellError::new(
                "net.dns.no_addresses",
                format!("no addresses resolved for `{}`", url.host()),
            )),
        }
    }

    fn configure_stream(&self, stream: TcpStream, url: &ShellUrl) -> ShellResult<BoxedIoStream> {
        stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.io_timeout)))
            .map_err(|error| {
                ShellError::new(
                    "net.tcp.configure_failed",
                    format!("failed to configure socket timeouts: {error}"),
                )
            })?;

        if url.is_secure() {
            connect_tls(stream, url.host(), self.trust_store)
        } else {
            Ok(Box::new(stream))
        }
    }
}

fn write_request(stream: &mut dyn Write, url: &ShellUrl) -> ShellResult<()> {
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Accept: {ACCEPT}\r\n\
         Accept-Encoding: gzip, deflate, br\r\n\
         Connection: close\r\n\r\n",
        url.path_and_query(),
        url.authority(),
    );

    stream.write_all(request.as_bytes()).map_err(|error| {
        ShellError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        ShellError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })?;

    Ok(())
}

struct ResponseHead {
    status: u16,
    headers: Vec<Header>,
}

fn read_response(stream: &mut dyn Read, max_body_bytes: usize) -> ShellResult<FetchedDocument> {
    let (head_bytes, prefetched) = read_response_head(stream)?;
    let head = parse_head(&head_bytes)?;

    if (300..400).contains(&head.status) {
        let location = header_value(&head.headers, "location").unwrap_or("<missing>");
        return Err(ShellError::new(
            "net.fetch.redirect_blocked",
            format!(
                "refusing to follow {} redirect to `{location}`",
                head.status
            ),
        ));
    }

    let has_transfer_encoding = head
        .headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let has_chunked_transfer = header_contains(&head.headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(ShellError::new(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is supported",
        ));
    }

    let content_length = if has_chunked_transfer {
        None
    } else {
        parse_content_length(&head.headers)?
    };

    let has_no_body = status_disallows_body(head.status);
    let mut body = if has_no_body {
        Vec::new()
    } else if has_chunked_transfer {
        read_chunked_body(stream, prefetched, max_body_bytes)?
    } else if let Some(len) = content_length {
        read_sized_body(stream, prefetched, len, max_body_bytes)?
    } else {
        read_close_delimited_body(stream, prefetched, max_body_bytes)?
    };

    if !has_no_body {
        body = decode_content_encoding(&head.headers, &body)?;
    }

    let content_type = header_value(&head.headers, "content-type")
        .unwrap_or_default()
        .to_owned();

    Ok(FetchedDocument {
        status: head.status,
        content_type,
        body,
    })
}

fn read_response_head(stream: &mut dyn Read) -> ShellResult<(Vec<u8>, Vec<u8>)> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];

    loop {
        let read = stream.read(&mut chunk).map_err(|error| {
            ShellError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(ShellError::new(
                "net.http.connection_closed",
                "connection closed before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(ShellError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }

        if let Some(end) = find_header_end(&buffer) {
            let body = buffer[end..].to_vec();
            buffer.truncate(end);
            return Ok((buffer, body));
        }
    }
}

fn parse_head(head_bytes: &[u8]) -> ShellResult<ResponseHead> {
    let head_text = std::str::from_utf8(head_bytes).map_err(|error| {
        ShellError::new(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        ShellError::new("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            ShellError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim()));
    }

    Ok(ResponseHead { status, headers })
}

fn parse_status_line(line: &str) -> ShellResult<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(|| {
        ShellError::new(
            "net.http.status_line_invalid",
            format!("missing HTTP version in status line `{line}`"),
        )
    })?;

    if version != "HTTP/1.0" && version != "HTTP/1.1" {
        return Err(ShellError::new(
            "net.http.version_unsupported",
            format!("unsupported response version `{version}`"),
        ));
    }

    let code_text = parts.next().ok_or_else(|| {
        ShellError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;

    let status = code_text.parse::<u16>().map_err(|error| {
        ShellError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    if !(100..=599).contains(&status) {
        return Err(ShellError::new(
            "net.http.status_code_invalid",
            format!("status code `{status}` is out of range"),
        ));
    }

    Ok(status)
}

fn read_chunked_body(
    stream: &mut dyn Read,
    prefetched: Vec<u8>,
    max_body_bytes: usize,
) -> ShellResult<Vec<u8>> {
    let mut reader = Cursor::new(prefetched).chain(stream);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            ShellError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            drain_chunk_trailers(&mut reader)?;
            break;
        }

        if decoded.len() + chunk_size > max_body_bytes {
            return Err(body_too_large(max_body_bytes));
        }

        let start = decoded.len();
        decoded.resize(start + chunk_size, 0);
        read_exact_or(
            &mut reader,
            &mut decoded[start..],
            "failed while reading chunked body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        read_exact_or(
            &mut reader,
            &mut terminator,
            "failed while reading chunk terminator",
        )?;
        if terminator != *b"\r\n" {
            return Err(ShellError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn drain_chunk_trailers<R: Read>(reader: &mut R) -> ShellResult<()> {
    loop {
        let line = read_crlf_line(reader)?;
        if line.is_empty() {
            break;
        }

        if line.split_once(':').is_none() {
            return Err(ShellError::new(
                "net.http.chunk_trailer_invalid",
                format!("invalid chunk trailer line `{line}`"),
            ));
        }
    }

    Ok(())
}

fn read_crlf_line<R: Read>(reader: &mut R) -> ShellResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        read_exact_or(reader, &mut byte, "failed while reading chunk metadata line")?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(ShellError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.len() >= 2 && line[line.len() - 2..] == *b"\r\n" {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                ShellError::new(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn read_exact_or<R: Read>(reader: &mut R, out: &mut [u8], detail: &str) -> ShellResult<()> {
    reader.read_exact(out).map_err(|error| {
        ShellError::new("net.http.read_body_failed", format!("{detail}: {error}"))
    })
}

fn read_sized_body(
    stream: &mut dyn Read,
    mut body: Vec<u8>,
    len: usize,
    max_body_bytes: usize,
) -> ShellResult<Vec<u8>> {
    if len > max_body_bytes {
        return Err(body_too_large(max_body_bytes));
    }

    if body.len() < len {
        let remaining = len - body.len();
        let mut rest = vec![0_u8; remaining];
        stream.read_exact(&mut rest).map_err(|error| {
            ShellError::new(
                "net.http.read_body_failed",
                format!("failed to read HTTP body bytes: {error}"),
            )
        })?;
        body.extend_from_slice(&rest);
    } else if body.len() > len {
        body.truncate(len);
    }

    Ok(body)
}

fn read_close_delimited_body(
    stream: &mut dyn Read,
    mut body: Vec<u8>,
    max_body_bytes: usize,
) -> ShellResult<Vec<u8>> {
    let mut chunk = [0_u8; 4096];

    loop {
        let read = stream.read(&mut chunk).map_err(|error| {
            ShellError::new(
                "net.http.read_body_failed",
                format!("failed while draining response body: {error}"),
            )
        })?;

        if read == 0 {
            break;
        }

        body.extend_from_slice(&chunk[..read]);
        if body.len() > max_body_bytes {
            return Err(body_too_large(max_body_bytes));
        }
    }

    Ok(body)
}

fn body_too_large(limit: usize) -> ShellError {
    ShellError::new(
        "net.fetch.body_too_large",
        format!("response body exceeds {limit} bytes"),
    )
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn parse_content_length(headers: &[Header]) -> ShellResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = header.value.trim().parse::<usize>().map_err(|error| {
                ShellError::new(
                    "net.http.content_length_invalid",
                    format!("invalid Content-Length `{}`: {error}", header.value),
                )
            })?;

            if let Some(existing) = value {
                if existing != parsed {
                    return Err(ShellError::new(
                        "net.http.content_length_conflict",
                        "conflicting Content-Length headers in response",
                    ));
                }
            } else {
                value = Some(parsed);
            }
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> ShellResult<Vec<u8>> {
    let encodings = content_encodings(headers);
    if encodings.is_empty() {
        return Ok(body.to_vec());
    }

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => decode_gzip(&decoded)?,
            "deflate" => decode_deflate(&decoded)?,
            "br" => decode_brotli(&decoded)?,
            _ => {
                return Err(ShellError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn content_encodings(headers: &[Header]) -> Vec<String> {
    let mut encodings = Vec::new();
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-encoding") {
            continue;
        }

        for token in header.value.split(',') {
            let value = token.trim().to_ascii_lowercase();
            if !value.is_empty() {
                encodings.push(value);
            }
        }
    }

    encodings
}

fn decode_gzip(body: &[u8]) -> ShellResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(Cursor::new(body));
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        ShellError::new(
            "net.http.decode_failed",
            format!("gzip decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

fn decode_deflate(body: &[u8]) -> ShellResult<Vec<u8>> {
    let mut zlib_decoder = ZlibDecoder::new(Cursor::new(body));
    let mut zlib_decoded = Vec::new();
    if zlib_decoder.read_to_end(&mut zlib_decoded).is_ok() {
        return Ok(zlib_decoded);
    }

    let mut raw_decoder = DeflateDecoder::new(Cursor::new(body));
    let mut raw_decoded = Vec::new();
    raw_decoder.read_to_end(&mut raw_decoded).map_err(|error| {
        ShellError::new(
            "net.http.decode_failed",
            format!("deflate decode failed: {error}"),
        )
    })?;
    Ok(raw_decoded)
}

fn decode_brotli(body: &[u8]) -> ShellResult<Vec<u8>> {
    let mut decoder = Decompressor::new(Cursor::new(body), 4096);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        ShellError::new(
            "net.http.decode_failed",
            format!("brotli decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::DEFAULT_MAX_BODY_BYTES;
    use super::Header;
    use super::decode_content_encoding;
    use super::find_header_end;
    use super::parse_content_length;
    use super::parse_status_line;
    use super::read_chunked_body;
    use super::read_response;
    use super::status_disallows_body;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn header_terminator_is_detected() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let end = find_header_end(data);
        assert_eq!(end, Some(data.len()));
    }

    #[test]
    fn status_line_parser_handles_http_10_and_11() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Ok(200));
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found"), Ok(404));
    }

    #[test]
    fn status_line_parser_rejects_other_versions() {
        let parsed = parse_status_line("HTTP/2 200 OK");
        assert!(parsed.is_err());
        if let Err(error) = parsed {
            assert_eq!(error.code, "net.http.version_unsupported");
        }
    }

    #[test]
    fn detects_bodyless_status_codes() {
        assert!(status_disallows_body(101));
        assert!(status_disallows_body(204));
        assert!(status_disallows_body(304));
        assert!(!status_disallows_body(200));
    }

    #[test]
    fn decodes_chunked_body() {
        let prefetched = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let prefetched = b"Z\r\nx\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, DEFAULT_MAX_BODY_BYTES);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "net.http.chunk_size_invalid");
        }
    }

    #[test]
    fn chunked_decode_enforces_body_cap() {
        let prefetched = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, 6);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "net.fetch.body_too_large");
        }
    }

    #[test]
    fn read_response_handles_chunked_transfer_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\
                    Content-Type: text/html\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let document = read_response(&mut stream, DEFAULT_MAX_BODY_BYTES);
        assert!(document.is_ok());
        let document = match document {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(document.status, 200);
        assert_eq!(document.content_type, "text/html");
        assert_eq!(document.body, b"Wikipedia");
    }

    #[test]
    fn read_response_drains_close_delimited_body() {
        let raw = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nplain body";
        let mut stream = Cursor::new(raw.to_vec());
        let document = read_response(&mut stream, DEFAULT_MAX_BODY_BYTES);
        assert!(document.is_ok());
        if let Ok(document) = document {
            assert_eq!(document.body, b"plain body");
        }
    }

    #[test]
    fn read_response_truncates_sized_body_to_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokextra";
        let mut stream = Cursor::new(raw.to_vec());
        let document = read_response(&mut stream, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(
            document.map(|value| value.body),
            Ok(b"ok".to_vec())
        );
    }

    #[test]
    fn read_response_blocks_redirects() {
        let raw = b"HTTP/1.1 302 Found\r\nLocation: https://elsewhere.example/\r\n\
                    Content-Length: 0\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let document = read_response(&mut stream, DEFAULT_MAX_BODY_BYTES);
        assert!(document.is_err());
        if let Err(error) = document {
            assert_eq!(error.code, "net.fetch.redirect_blocked");
            assert!(error.message.contains("https://elsewhere.example/"));
        }
    }

    #[test]
    fn read_response_rejects_unsupported_transfer_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\nConnection: close\r\n\r\nbody";
        let mut stream = Cursor::new(raw.to_vec());
        let document = read_response(&mut stream, DEFAULT_MAX_BODY_BYTES);
        assert!(document.is_err());
        if let Err(error) = document {
            assert_eq!(error.code, "net.http.transfer_encoding_unsupported");
        }
    }

    #[test]
    fn content_length_conflict_is_rejected() {
        let headers = vec![
            Header::new("Content-Length", "4"),
            Header::new("Content-Length", "9"),
        ];
        let parsed = parse_content_length(&headers);
        assert!(parsed.is_err());
        if let Err(error) = parsed {
            assert_eq!(error.code, "net.http.content_length_conflict");
        }
    }

    #[test]
    fn decodes_gzip_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut encoded, Compression::default());
            let wrote = encoder.write_all(b"hello gzip");
            assert!(wrote.is_ok());
            let finish = encoder.finish();
            assert!(finish.is_ok());
        }

        let header = Header::new("Content-Encoding", "gzip");
        let decoded = decode_content_encoding(&[header], &encoded);
        assert_eq!(decoded, Ok(b"hello gzip".to_vec()));
    }

    #[test]
    fn decodes_deflate_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut encoded, Compression::default());
            let wrote = encoder.write_all(b"hello deflate");
            assert!(wrote.is_ok());
            let finish = encoder.finish();
            assert!(finish.is_ok());
        }

        let header = Header::new("Content-Encoding", "deflate");
        let decoded = decode_content_encoding(&[header], &encoded);
        assert_eq!(decoded, Ok(b"hello deflate".to_vec()));
    }

    #[test]
    fn decodes_brotli_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut encoded, 4096, 5, 22);
            let wrote = writer.write_all(b"hello br");
            assert!(wrote.is_ok());
            let flushed = writer.flush();
            assert!(flushed.is_ok());
        }

        let header = Header::new("Content-Encoding", "br");
        let decoded = decode_content_encoding(&[header], &encoded);
        assert_eq!(decoded, Ok(b"hello br".to_vec()));
    }

    #[test]
    fn decodes_stacked_content_encodings_in_reverse_order() {
        let mut gzipped = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut gzipped, Compression::default());
            let wrote = encoder.write_all(b"layered");
            assert!(wrote.is_ok());
            let finish = encoder.finish();
            assert!(finish.is_ok());
        }

        let mut brotlied = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut brotlied, 4096, 5, 22);
            let wrote = writer.write_all(&gzipped);
            assert!(wrote.is_ok());
            let flushed = writer.flush();
            assert!(flushed.is_ok());
        }

        let header = Header::new("Content-Encoding", "gzip, br");
        let decoded = decode_content_encoding(&[header], &brotlied);
        assert_eq!(decoded, Ok(b"layered".to_vec()));
    }

    #[test]
    fn rejects_unknown_content_encoding() {
        let header = Header::new("Content-Encoding", "zstd");
        let decoded = decode_content_encoding(&[header], b"payload");
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "net.http.content_encoding_unsupported");
        }
    }
}
