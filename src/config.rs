//! Configuration and limits for server-side extension negotiation.

/// Default pipeline stage name under which the negotiator installs itself.
pub const DEFAULT_STAGE_NAME: &str = "ws-server-extensions";

/// Resource limits applied while negotiating and running extensions.
///
/// These bound the work a single client can force onto the server during
/// the upgrade handshake and while decompressing payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of extension offers negotiated per request.
    ///
    /// Offers beyond this count are ignored.
    ///
    /// Default: 16
    pub max_extension_offers: usize,

    /// Maximum length of the `Sec-WebSocket-Extensions` value in bytes.
    ///
    /// Longer values are treated as if the header were absent.
    ///
    /// Default: 4 KB (4096)
    pub max_extensions_header_size: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,

    /// Maximum size of a message after an extension transform expands it.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_extension_offers: 16,
            max_extensions_header_size: 4096,
            max_handshake_size: 8192,
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_extension_offers: usize,
        max_extensions_header_size: usize,
        max_handshake_size: usize,
        max_message_size: usize,
    ) -> Self {
        Self {
            max_extension_offers,
            max_extensions_header_size,
            max_handshake_size,
            max_message_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }

    /// Whether an extensions header of `len` bytes should be considered at all.
    #[must_use]
    #[inline]
    pub const fn accepts_extensions_header(&self, len: usize) -> bool {
        len <= self.max_extensions_header_size
    }
}

/// Negotiator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Name of the pipeline stage the negotiator occupies.
    ///
    /// Default: [`DEFAULT_STAGE_NAME`]
    pub stage_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            stage_name: DEFAULT_STAGE_NAME.to_string(),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the pipeline stage name used by the negotiator.
    #[must_use]
    pub fn with_stage_name(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }
}
