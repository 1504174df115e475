//! HTTP client transport: each flushed message is one `POST`, and the response
//! body becomes the read buffer for the reply.
//!
//! Only plain `http://` with a `Content-Length` (or connection-close) response
//! is supported; that is what the runtime's `/rpc` endpoint produces.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

use super::socket::DEFAULT_SOCKET_TIMEOUT;
use super::{MemoryInput, Transport};

pub const CONTENT_TYPE: &str = "application/x-thrift";

const MAX_HEADER_BYTES: usize = 16 * 1024;

pub struct HttpClientTransport {
    host: String,
    authority: String,
    path: String,
    timeout: Duration,
    config: Configuration,
    write_buf: BytesMut,
    response: Option<MemoryInput>,
}

impl HttpClientTransport {
    /// `url` must look like `http://host:port/path`.
    pub fn new(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("http://").ok_or_else(|| {
            WireError::transport(TransportErrorKind::NotOpen, "only http:// urls are supported")
        })?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(WireError::transport(TransportErrorKind::NotOpen, "missing host"));
        }
        let host = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Ok(Self {
            host,
            authority: authority.to_string(),
            path: path.to_string(),
            timeout: DEFAULT_SOCKET_TIMEOUT,
            config: Configuration::default(),
            write_buf: BytesMut::with_capacity(1024),
            response: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    fn connect(&self) -> Result<TcpStream> {
        let mut last_err = None;
        let addrs = self.host.to_socket_addrs().map_err(|e| {
            WireError::transport(TransportErrorKind::NotOpen, format!("bad host {}: {e}", self.host))
        })?;
        for sa in addrs {
            match TcpStream::connect_timeout(&sa, self.timeout) {
                Ok(s) => {
                    s.set_read_timeout(Some(self.timeout))?;
                    s.set_write_timeout(Some(self.timeout))?;
                    return Ok(s);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => e.into(),
            None => WireError::transport(TransportErrorKind::NotOpen, "host did not resolve"),
        })
    }

    fn parse_response(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let header_end = find(raw, b"\r\n\r\n").ok_or_else(|| {
            WireError::transport(TransportErrorKind::CorruptedData, "truncated http response")
        })?;
        if header_end > MAX_HEADER_BYTES {
            return Err(WireError::transport(
                TransportErrorKind::CorruptedData,
                "http response headers too large",
            ));
        }
        let head = std::str::from_utf8(&raw[..header_end]).map_err(|_| {
            WireError::transport(TransportErrorKind::CorruptedData, "non-utf8 http headers")
        })?;
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| {
                WireError::transport(TransportErrorKind::CorruptedData, "bad http status line")
            })?;
        if status != 200 {
            return Err(WireError::transport(
                TransportErrorKind::Unknown,
                format!("HTTP response code: {status}"),
            ));
        }

        let mut content_length = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.trim().eq_ignore_ascii_case("chunked")
            {
                return Err(WireError::transport(
                    TransportErrorKind::Unknown,
                    "chunked http responses are not supported",
                ));
            }
        }

        let body = &raw[header_end + 4..];
        match content_length {
            Some(n) if n > body.len() => Err(WireError::transport(
                TransportErrorKind::EndOfFile,
                format!("http body truncated: expected {n} bytes, got {}", body.len()),
            )),
            Some(n) => Ok(body[..n].to_vec()),
            None => Ok(body.to_vec()),
        }
    }
}

impl Transport for HttpClientTransport {
    fn is_open(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.response = None;
        self.write_buf.clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.response.as_mut() {
            Some(r) => r.read(buf),
            None => Err(WireError::transport(
                TransportErrorKind::NotOpen,
                "response buffer is empty, no request",
            )),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_buf.put_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let body = self.write_buf.split();
        let mut stream = self.connect()?;

        let head = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: {CONTENT_TYPE}\r\nAccept: {CONTENT_TYPE}\r\nUser-Agent: wirecall\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.path,
            self.authority,
            body.len()
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(&body)?;
        stream.flush()?;

        let limit = (self.config.max_message_size + MAX_HEADER_BYTES) as u64;
        let mut raw = Vec::new();
        stream.take(limit + 1).read_to_end(&mut raw)?;
        if raw.len() as u64 > limit {
            return Err(WireError::transport(
                TransportErrorKind::CorruptedData,
                "http response exceeds max message size",
            ));
        }

        let payload = self.parse_response(&raw)?;
        self.response = Some(MemoryInput::with_config(self.config, payload));
        Ok(())
    }

    fn buffered(&self) -> Option<&[u8]> {
        self.response.as_ref().and_then(|r| r.buffered())
    }

    fn consume_buffer(&mut self, len: usize) {
        if let Some(r) = self.response.as_mut() {
            r.consume_buffer(len);
        }
    }

    fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn check_read_bytes_available(&self, num_bytes: u64) -> Result<()> {
        match &self.response {
            Some(r) => r.check_read_bytes_available(num_bytes),
            None => Ok(()),
        }
    }

    fn end_message(&mut self) {
        if let Some(r) = self.response.as_mut() {
            r.end_message();
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
