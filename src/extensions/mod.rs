//! Server-side WebSocket extension framework (RFC 6455 Section 9).
//!
//! The pieces, from the header inwards:
//!
//! - [`ExtensionOffer::parse_header`] turns the client's
//!   `Sec-WebSocket-Extensions` value into ordered offers.
//! - A [`ServerExtensionHandshaker`] accepts or declines one offer, producing a
//!   [`ServerExtension`].
//! - [`RsvAllocator`] keeps two accepted extensions from sharing a reserved bit.
//! - [`ServerExtensionNegotiator`] drives all of the above for one connection,
//!   installs each extension's [`ExtensionDecoder`] / [`ExtensionEncoder`] in the
//!   connection's [`Pipeline`](crate::pipeline::Pipeline), and removes itself
//!   once the upgrade response has been written.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsext::extensions::{Handshakers, ServerExtensionNegotiator};
//! use wsext::pipeline::Pipeline;
//!
//! let handshakers = Handshakers::new(vec![Box::new(main), Box::new(fallback)]);
//!
//! // per connection
//! let mut pipeline = Pipeline::new();
//! let mut negotiator = ServerExtensionNegotiator::new(handshakers.clone());
//! negotiator.install(&mut pipeline)?;
//! negotiator.handle_request(&mut pipeline, request.extensions.as_deref())?;
//! negotiator.prepare_response(&mut response)?;
//! // ... write the response ...
//! negotiator.write_completed(&mut pipeline, outcome);
//! ```

#[cfg(feature = "compression")]
pub mod deflate;
pub mod rsv;
pub mod server;
pub mod state;

pub use rsv::{RsvAllocator, RsvBits};
pub use server::ServerExtensionNegotiator;
pub use state::NegotiationPhase;

use crate::error::{Error, Result};
use crate::protocol::Frame;
use std::fmt;
use std::sync::Arc;

/// RFC 7230 `tchar`.
const fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

/// Whether `s` is a non-empty RFC 7230 token.
#[must_use]
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

/// Split on `sep` wherever it is not inside a quoted string.
fn split_unquoted(s: &str, sep: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(Error::InvalidExtension("Unterminated quoted string".into()));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> Result<String> {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return Err(Error::InvalidExtension(format!(
            "Invalid quoted value: {}",
            value
        )));
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => {
                    return Err(Error::InvalidExtension(format!(
                        "Dangling escape in value: {}",
                        value
                    )));
                }
            },
            '"' => {
                return Err(Error::InvalidExtension(format!(
                    "Unescaped quote in value: {}",
                    value
                )));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// A single extension parameter, `key` or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g., "client_max_window_bits").
    pub name: String,
    /// Optional parameter value. None for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `key`, `key=token` or `key="quoted string"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the key is not a token, or the
    /// value is empty, not a token, or a malformed quoted string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (s, None),
        };

        if !is_token(name) {
            return Err(Error::InvalidExtension(format!(
                "Invalid parameter name: {:?}",
                name
            )));
        }

        let value = match value {
            None => None,
            Some(v) if v.starts_with('"') => Some(unquote(v)?),
            Some(v) if is_token(v) => Some(v.to_string()),
            Some(v) => {
                return Err(Error::InvalidExtension(format!(
                    "Invalid value for parameter {}: {:?}",
                    name, v
                )));
            }
        };

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) if is_token(v) => write!(f, "{}={}", self.name, v),
            Some(v) => {
                write!(f, "{}=\"", self.name)?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")
            }
            None => write!(f, "{}", self.name),
        }
    }
}

/// One extension entry of a `Sec-WebSocket-Extensions` value: a name and its
/// ordered parameters.
///
/// Used both for client offers and for the server's response descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g., "permessage-deflate").
    pub name: String,
    /// Extension parameters, in header order.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single entry: `extension-name; param1=value1; param2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the name is not a token or any
    /// parameter is malformed.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = split_unquoted(s, ';')?.into_iter();
        let name = parts.next().unwrap_or_default().trim();

        if !is_token(name) {
            return Err(Error::InvalidExtension(format!(
                "Invalid extension name: {:?}",
                name
            )));
        }

        let params = parts
            .map(ExtensionParam::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Parse a whole `Sec-WebSocket-Extensions` value into ordered offers.
    ///
    /// An empty or whitespace-only value yields no offers. A single malformed
    /// entry invalidates the whole value: callers treat that as "no extensions
    /// requested" rather than trying to salvage the remaining entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if any entry is malformed.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        if header.trim().is_empty() {
            return Ok(Vec::new());
        }
        split_unquoted(header, ',')?
            .into_iter()
            .map(Self::parse)
            .collect()
    }

    /// Get a parameter by name.
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check if a parameter is present.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// Serialize response descriptors into a `Sec-WebSocket-Extensions` value.
///
/// Returns `None` when there is nothing to send, so that the header is
/// omitted rather than written empty.
#[must_use]
pub fn response_header(accepted: &[ExtensionOffer]) -> Option<String> {
    if accepted.is_empty() {
        return None;
    }
    Some(
        accepted
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Inbound transform contributed by a negotiated extension.
///
/// Decoders see frames coming from the peer, in the order the extensions
/// were negotiated, and should clear the reserved bits they consume.
pub trait ExtensionDecoder: Send {
    /// Transform an inbound frame in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the frame cannot be decoded.
    fn decode(&mut self, frame: &mut Frame) -> Result<()>;
}

/// Outbound transform contributed by a negotiated extension.
pub trait ExtensionEncoder: Send {
    /// Transform an outbound frame in place, setting the reserved bits the
    /// extension owns where appropriate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the frame cannot be encoded.
    fn encode(&mut self, frame: &mut Frame) -> Result<()>;
}

/// An extension a handshaker agreed to for one connection.
///
/// The negotiator calls [`rsv`](Self::rsv) first; the remaining methods are
/// only called if the reserved bits were free.
pub trait ServerExtension: Send {
    /// Reserved bits the extension sets on frames.
    fn rsv(&self) -> RsvBits;

    /// Entry to emit in the response's `Sec-WebSocket-Extensions` header.
    fn response_data(&self) -> ExtensionOffer;

    /// Create the inbound transform.
    fn new_decoder(&self) -> Box<dyn ExtensionDecoder>;

    /// Create the outbound transform.
    fn new_encoder(&self) -> Box<dyn ExtensionEncoder>;
}

/// Accepts or declines a client's extension offer.
///
/// Handshakers are stateless with respect to connections and are shared by
/// every negotiator built from the same [`Handshakers`] list.
pub trait ServerExtensionHandshaker: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Produce a negotiated extension for `offer`, or `None` to decline.
    fn handshake(&self, offer: &ExtensionOffer) -> Option<Box<dyn ServerExtension>>;
}

/// Priority-ordered list of handshakers, first entry consulted first.
///
/// Cloning is cheap; every connection's negotiator holds a clone.
#[derive(Clone)]
pub struct Handshakers {
    inner: Arc<[Box<dyn ServerExtensionHandshaker>]>,
}

impl Handshakers {
    /// Build from handshakers in priority order.
    pub fn new(handshakers: Vec<Box<dyn ServerExtensionHandshaker>>) -> Self {
        Self {
            inner: handshakers.into(),
        }
    }

    /// Number of handshakers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn ServerExtensionHandshaker> {
        self.inner.iter().map(|h| h.as_ref())
    }

    /// Ask each handshaker in turn; the first to accept wins.
    pub fn handshake(&self, offer: &ExtensionOffer) -> Option<Box<dyn ServerExtension>> {
        self.iter().find_map(|h| h.handshake(offer))
    }
}

impl Default for Handshakers {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FromIterator<Box<dyn ServerExtensionHandshaker>> for Handshakers {
    fn from_iter<T: IntoIterator<Item = Box<dyn ServerExtensionHandshaker>>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for Handshakers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|h| h.name())).finish()
    }
}
