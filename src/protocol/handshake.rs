//! WebSocket upgrade handshake messages (RFC 6455 Section 4.2).
//!
//! Only the server side is modelled: the client's upgrade request is parsed
//! far enough to hand the raw `Sec-WebSocket-Extensions` value to the
//! negotiator, and the `101 Switching Protocols` response carries whatever
//! header value the negotiator assembled.

use crate::config::Limits;
use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header carrying extension offers and the negotiated response.
pub const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";

/// Headers that must appear at most once in an upgrade request.
const SINGLETON_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Check `GET <path> HTTP/1.1` and return the path.
fn parse_request_line(line: &str) -> Result<String> {
    if line.is_empty() {
        return Err(Error::InvalidHandshake("Empty request".into()));
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("GET"), Some(path), Some(version), None) if version.starts_with("HTTP/1.1") => {
            Ok(path.to_string())
        }
        (Some(method), Some(_), Some(_), None) if method != "GET" => Err(
            Error::InvalidHandshake(format!("Expected GET method, got {}", method)),
        ),
        (Some(_), Some(_), Some(version), None) => Err(Error::InvalidHandshake(format!(
            "Expected HTTP/1.1, got {}",
            version
        ))),
        _ => Err(Error::InvalidHandshake("Invalid request line".into())),
    }
}

/// Parse header lines into a map keyed by lowercase name.
///
/// Repeated list-valued headers (such as `Sec-WebSocket-Extensions`) are
/// combined with `", "` as RFC 7230 Section 3.2.2 allows; repeated singleton
/// headers are rejected.
fn parse_headers<'a, I>(lines: I) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name_lower = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match headers.get_mut(&name_lower) {
            Some(_) if SINGLETON_HEADERS.contains(&name_lower.as_str()) => {
                return Err(Error::InvalidHandshake(format!(
                    "Duplicate header: {}",
                    name.trim()
                )));
            }
            Some(existing) => {
                if !value.is_empty() {
                    if !existing.is_empty() {
                        existing.push_str(", ");
                    }
                    existing.push_str(value);
                }
            }
            None => {
                headers.insert(name_lower, value.to_string());
            }
        }
    }

    Ok(headers)
}

fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// ```
/// use wsext::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Parsed WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version (should be 13).
    pub version: u8,
    /// The Sec-WebSocket-Protocol values.
    pub protocols: Vec<String>,
    /// Raw Sec-WebSocket-Extensions value, `None` when the header is absent.
    pub extensions: Option<String>,
}

impl HandshakeRequest {
    /// Parse an upgrade request from raw HTTP data under the default
    /// [`Limits`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the data is not UTF-8, the request
    /// line is not `GET <path> HTTP/1.1`, a required header is missing or
    /// invalid, or a singleton header is repeated, and
    /// [`Error::HandshakeTooLarge`] if the data exceeds the default handshake size.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_limits(data, &Limits::default())
    }

    /// Parse an upgrade request, rejecting data larger than
    /// `limits.max_handshake_size` before looking at it.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds the handshake limit
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limits(data: &[u8], limits: &Limits) -> Result<Self> {
        limits.check_handshake_size(data.len())?;

        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let path = parse_request_line(lines.next().unwrap_or_default())?;
        let headers = parse_headers(lines)?;
        let required = |name: &str| {
            headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str)
                .ok_or_else(|| Error::InvalidHandshake(format!("Missing {} header", name)))
        };

        let upgrade = required("Upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!("Invalid Upgrade header: {}", upgrade)));
        }

        let connection = required("Connection")?;
        let has_upgrade_token = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !has_upgrade_token {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                connection
            )));
        }

        let version = required("Sec-WebSocket-Version")?;
        let version: u8 = version
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {}", version)))?;

        let protocols = headers
            .get("sec-websocket-protocol")
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            path,
            host: required("Host")?.to_string(),
            key: required("Sec-WebSocket-Key")?.to_string(),
            version,
            protocols,
            extensions: headers.get("sec-websocket-extensions").cloned(),
        })
    }

    /// Validate the request according to RFC 6455.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the version is not 13, the key
    /// does not decode to 16 bytes, or the Host header is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }

        let decoded = BASE64.decode(&self.key).map_err(|_| {
            Error::InvalidHandshake("Invalid Sec-WebSocket-Key: not valid Base64".into())
        })?;
        if decoded.len() != 16 {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Key must be 16 bytes, got {}",
                decoded.len()
            )));
        }

        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("Host header cannot be empty".into()));
        }

        Ok(())
    }
}

/// `101 Switching Protocols` response to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol.
    pub protocol: Option<String>,
    /// The negotiated Sec-WebSocket-Extensions value.
    ///
    /// `None` omits the header entirely; it is never written empty.
    pub extensions: Option<String>,
}

impl HandshakeResponse {
    /// Create a response for a validated request, without extensions.
    ///
    /// No subprotocol is selected; set [`protocol`](Self::protocol) to one of
    /// the request's `protocols` to agree to it.
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: None,
            extensions: None,
        }
    }

    /// The Sec-WebSocket-Extensions value that will be written, if any.
    #[must_use]
    pub fn extensions_header(&self) -> Option<&str> {
        self.extensions.as_deref().filter(|v| !v.is_empty())
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if protocol or extensions contain CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());

        if let Some(proto) = &self.protocol {
            validate_header_value("Sec-WebSocket-Protocol", proto)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {}\r\n", proto).as_bytes());
        }

        if let Some(ext) = self.extensions_header() {
            validate_header_value(SEC_WEBSOCKET_EXTENSIONS, ext)?;
            buf.extend_from_slice(format!("{}: {}\r\n", SEC_WEBSOCKET_EXTENSIONS, ext).as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Protocol: chat, superchat\r\n\
        Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n\
        \r\n";

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_valid_request() {
        let req = HandshakeRequest::parse(REQUEST).unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.host, "server.example.com");
        assert_eq!(req.version, 13);
        assert_eq!(req.protocols, vec!["chat", "superchat"]);
        assert_eq!(
            req.extensions.as_deref(),
            Some("permessage-deflate; client_max_window_bits")
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_parse_request_without_extensions() {
        let request = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.extensions, None);
    }

    #[test]
    fn test_repeated_extension_headers_are_combined() {
        let request = b"GET / HTTP/1.1\r\n\
Host: x\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Sec-WebSocket-Extensions: main\r\n\
sec-websocket-extensions: fallback; mode=fast\r\n\r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.extensions.as_deref(), Some("main, fallback; mode=fast"));
    }

    #[test]
    fn test_duplicate_host_header_rejected() {
        let request = b"GET / HTTP/1.1\r\n\
Host: example.com\r\n\
Host: evil.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

        assert!(matches!(
            HandshakeRequest::parse(request),
            Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn test_parse_request_missing_key() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Key")));
    }

    #[test]
    fn test_invalid_http_method() {
        let request = b"POST /chat HTTP/1.1\r\nHost: x\r\n\r\n";
        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("GET")));
    }

    #[test]
    fn test_validate_rejects_bad_version_and_key() {
        let req = HandshakeRequest::parse(REQUEST).unwrap();

        let old = HandshakeRequest {
            version: 8,
            ..req.clone()
        };
        assert!(matches!(old.validate(), Err(Error::InvalidHandshake(msg)) if msg.contains("version")));

        let short_key = HandshakeRequest {
            key: "c2hvcnQ=".to_string(),
            ..req
        };
        assert!(short_key.validate().is_err());
    }

    #[test]
    fn test_handshake_too_large() {
        let large = vec![b'A'; 10_000];
        assert!(matches!(
            HandshakeRequest::parse(&large),
            Err(Error::HandshakeTooLarge { size: 10_000, max: 8192 })
        ));

        let tight = Limits {
            max_handshake_size: REQUEST.len() - 1,
            ..Limits::default()
        };
        assert!(matches!(
            HandshakeRequest::parse_with_limits(REQUEST, &tight),
            Err(Error::HandshakeTooLarge { .. })
        ));
        let exact = Limits {
            max_handshake_size: REQUEST.len(),
            ..Limits::default()
        };
        assert!(HandshakeRequest::parse_with_limits(REQUEST, &exact).is_ok());
    }

    #[test]
    fn test_response_from_request() {
        let req = HandshakeRequest::parse(REQUEST).unwrap();
        let resp = HandshakeResponse::from_request(&req);
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        // subprotocols are the caller's choice, never echoed
        assert_eq!(req.protocols.first().map(String::as_str), Some("chat"));
        assert_eq!(resp.protocol, None);
        assert_eq!(resp.extensions, None);
    }

    #[test]
    fn test_response_write_with_extensions() {
        let resp = HandshakeResponse {
            accept: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string(),
            protocol: None,
            extensions: Some("permessage-deflate; server_no_context_takeover".to_string()),
        };

        let mut buf = Vec::new();
        resp.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains(
            "Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover\r\n"
        ));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_omits_absent_or_empty_extensions() {
        for extensions in [None, Some(String::new())] {
            let resp = HandshakeResponse {
                accept: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string(),
                protocol: None,
                extensions,
            };
            let mut buf = Vec::new();
            resp.write(&mut buf).unwrap();
            let text = String::from_utf8(buf).unwrap();
            assert!(!text.contains("Sec-WebSocket-Extensions"));
        }
    }

    #[test]
    fn test_crlf_in_extension_rejected() {
        let response = HandshakeResponse {
            accept: "dGhlIHNhbXBsZSBub25jZQ==".to_string(),
            protocol: None,
            extensions: Some("permessage-deflate\nX-Evil: bad".to_string()),
        };
        let mut buf = Vec::new();
        assert!(matches!(
            response.write(&mut buf),
            Err(Error::InvalidHeaderValue { .. })
        ));
    }
}
