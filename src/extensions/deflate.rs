//! Deflate-based extensions: `permessage-deflate` (RFC 7692) and the older
//! `deflate-frame` draft that is commonly offered as its fallback.
//!
//! Both claim RSV1, so at most one of them is active on a connection.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::extensions::{
    ExtensionDecoder, ExtensionEncoder, ExtensionOffer, ExtensionParam, RsvBits, ServerExtension,
    ServerExtensionHandshaker,
};
use crate::protocol::{Frame, OpCode};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

/// Extension name of RFC 7692 compression.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
/// Extension name of the deflate-frame draft.
pub const DEFLATE_FRAME: &str = "deflate-frame";
/// Vendor-prefixed alias of [`DEFLATE_FRAME`].
pub const X_WEBKIT_DEFLATE_FRAME: &str = "x-webkit-deflate-frame";

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Smallest window the client may announce.
const MIN_WINDOW_BITS: u8 = 8;
/// zlib cannot produce raw deflate streams with a 256-byte window.
const MIN_SERVER_WINDOW_BITS: u8 = 9;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const CHUNK: usize = 4096;

/// Server-side policy for the deflate handshakers.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// zlib compression level, 0-9. Default: 6.
    pub compression_level: u32,
    /// Accept a client's `server_max_window_bits` request. Default: false.
    pub allow_server_window_bits: bool,
    /// Accept a client's `server_no_context_takeover` request. Default: false.
    pub allow_server_no_context_takeover: bool,
    /// Window the client is asked to use when it offers `client_max_window_bits`.
    /// Default: 15.
    pub client_window_bits: u8,
    /// Ask the client to reset its compressor after each message when it
    /// offers `client_no_context_takeover`. Default: false.
    pub client_no_context_takeover: bool,
    /// Bounds decompressed message size.
    pub limits: Limits,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            allow_server_window_bits: false,
            allow_server_no_context_takeover: false,
            client_window_bits: MAX_WINDOW_BITS,
            client_no_context_takeover: false,
            limits: Limits::default(),
        }
    }
}

impl DeflateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }

    pub fn allow_server_window_bits(mut self, value: bool) -> Self {
        self.allow_server_window_bits = value;
        self
    }

    pub fn allow_server_no_context_takeover(mut self, value: bool) -> Self {
        self.allow_server_no_context_takeover = value;
        self
    }

    pub fn client_window_bits(mut self, bits: u8) -> Result<Self> {
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
            return Err(Error::InvalidExtension(format!(
                "client_window_bits must be {}-{}, got {}",
                MIN_WINDOW_BITS, MAX_WINDOW_BITS, bits
            )));
        }
        self.client_window_bits = bits;
        Ok(self)
    }

    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

fn parse_window_bits(value: Option<&str>, min: u8) -> Option<u8> {
    let value = value?;
    // 1*DIGIT without a leading zero
    if value.starts_with('0') {
        return None;
    }
    let bits: u8 = value.parse().ok()?;
    (min..=MAX_WINDOW_BITS).contains(&bits).then_some(bits)
}

// ============================================================================
// Compression primitives
// ============================================================================

struct Deflater {
    compress: Compress,
    no_context_takeover: bool,
}

impl Deflater {
    fn new(level: u32, window_bits: u8, no_context_takeover: bool) -> Self {
        Self {
            compress: Compress::new_with_window_bits(Compression::new(level), false, window_bits),
            no_context_takeover,
        }
    }

    /// Compress with a sync flush; `strip_trailer` drops the trailing empty
    /// stored block.
    fn compress(&mut self, input: &[u8], strip_trailer: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut consumed = 0;

        loop {
            if out.len() == out.capacity() {
                out.reserve(CHUNK);
            }
            let in_before = self.compress.total_in();
            let out_before = self.compress.total_out();

            self.compress
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("Compression failed: {}", e)))?;

            consumed += (self.compress.total_in() - in_before) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if self.compress.total_in() == in_before && self.compress.total_out() == out_before {
                return Err(Error::Extension("Compression made no progress".into()));
            }
        }

        if strip_trailer && out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }
        Ok(out)
    }

    fn end_message(&mut self) {
        if self.no_context_takeover {
            self.compress.reset();
        }
    }
}

struct Inflater {
    decompress: Decompress,
    no_context_takeover: bool,
    limits: Limits,
}

impl Inflater {
    fn new(no_context_takeover: bool, limits: Limits) -> Self {
        Self {
            // the peer's window is never larger than the maximum
            decompress: Decompress::new_with_window_bits(false, MAX_WINDOW_BITS),
            no_context_takeover,
            limits,
        }
    }

    /// Decompress `input`, restoring the stripped trailer when
    /// `restore_trailer` is set. `already` counts bytes of the same message
    /// produced by earlier frames.
    fn decompress(&mut self, input: &[u8], restore_trailer: bool, already: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len().saturating_mul(2).min(CHUNK * 4) + 64);
        self.inflate(input, &mut out, already)?;
        if restore_trailer {
            self.inflate(&DEFLATE_TRAILER, &mut out, already)?;
        }
        Ok(out)
    }

    fn inflate(&mut self, input: &[u8], out: &mut Vec<u8>, already: usize) -> Result<()> {
        let mut consumed = 0;

        loop {
            if out.len() == out.capacity() {
                out.reserve(CHUNK);
            }
            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();

            let status = self
                .decompress
                .decompress_vec(&input[consumed..], out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("Decompression failed: {}", e)))?;

            let read = self.decompress.total_in() - in_before;
            let written = self.decompress.total_out() - out_before;
            consumed += read as usize;
            self.limits.check_message_size(already + out.len())?;

            if status == Status::StreamEnd {
                // a BFINAL block ends the stream; whatever follows starts a new one
                self.decompress.reset(false);
                if consumed == input.len() {
                    break;
                }
                continue;
            }
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if read == 0 && written == 0 {
                return Err(Error::Extension("Decompression made no progress".into()));
            }
        }
        Ok(())
    }

    fn end_message(&mut self) {
        if self.no_context_takeover {
            self.decompress.reset(false);
        }
    }
}

// ============================================================================
// Transforms
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One compressed stream per message; RSV1 on the first frame only.
    PerMessage,
    /// Every data frame compressed on its own, each with RSV1.
    PerFrame,
}

/// Outbound compression.
pub struct DeflateEncoder {
    deflater: Deflater,
    mode: Mode,
    compressing: bool,
}

impl DeflateEncoder {
    fn new(mode: Mode, level: u32, window_bits: u8, no_context_takeover: bool) -> Self {
        Self {
            deflater: Deflater::new(level, window_bits, no_context_takeover),
            mode,
            compressing: false,
        }
    }
}

impl ExtensionEncoder for DeflateEncoder {
    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            return Ok(());
        }

        match self.mode {
            Mode::PerFrame => {
                if frame.payload().is_empty() {
                    return Ok(());
                }
                let compressed = self.deflater.compress(frame.payload(), true)?;
                frame.set_payload(compressed);
                RsvBits::RSV1.set_on(frame);
                self.deflater.end_message();
            }
            Mode::PerMessage => {
                let first = frame.opcode != OpCode::Continuation;
                if first {
                    // empty single-frame messages go out as they are
                    self.compressing = !(frame.fin && frame.payload().is_empty());
                }
                if !self.compressing {
                    return Ok(());
                }

                let compressed = self.deflater.compress(frame.payload(), frame.fin)?;
                frame.set_payload(compressed);
                if first {
                    RsvBits::RSV1.set_on(frame);
                } else {
                    RsvBits::RSV1.clear_on(frame);
                }

                if frame.fin {
                    self.compressing = false;
                    self.deflater.end_message();
                }
            }
        }
        Ok(())
    }
}

/// Inbound decompression.
pub struct DeflateDecoder {
    inflater: Inflater,
    mode: Mode,
    in_compressed_message: bool,
    message_len: usize,
}

impl DeflateDecoder {
    fn new(mode: Mode, no_context_takeover: bool, limits: Limits) -> Self {
        Self {
            inflater: Inflater::new(no_context_takeover, limits),
            mode,
            in_compressed_message: false,
            message_len: 0,
        }
    }
}

impl ExtensionDecoder for DeflateDecoder {
    fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            if frame.rsv1 {
                return Err(Error::Extension("RSV1 set on control frame".to_string()));
            }
            return Ok(());
        }

        match self.mode {
            Mode::PerFrame => {
                if !frame.rsv1 {
                    return Ok(());
                }
                let decompressed = self.inflater.decompress(frame.payload(), true, 0)?;
                frame.set_payload(decompressed);
                RsvBits::RSV1.clear_on(frame);
                self.inflater.end_message();
            }
            Mode::PerMessage => {
                if frame.opcode == OpCode::Continuation {
                    if frame.rsv1 {
                        return Err(Error::Extension(
                            "RSV1 set on continuation frame".to_string(),
                        ));
                    }
                    if !self.in_compressed_message {
                        return Ok(());
                    }
                } else {
                    if !frame.rsv1 {
                        self.in_compressed_message = false;
                        return Ok(());
                    }
                    self.in_compressed_message = true;
                    self.message_len = 0;
                }

                let decompressed =
                    self.inflater
                        .decompress(frame.payload(), frame.fin, self.message_len)?;
                self.message_len += decompressed.len();
                frame.set_payload(decompressed);
                RsvBits::RSV1.clear_on(frame);

                if frame.fin {
                    self.in_compressed_message = false;
                    self.inflater.end_message();
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// permessage-deflate
// ============================================================================

/// Negotiated `permessage-deflate` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerMessageDeflateExtension {
    compression_level: u32,
    server_no_context_takeover: bool,
    server_window_bits: u8,
    client_no_context_takeover: bool,
    client_window_bits: u8,
    limits: Limits,
}

impl ServerExtension for PerMessageDeflateExtension {
    fn rsv(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn response_data(&self) -> ExtensionOffer {
        let mut params = Vec::new();
        if self.server_no_context_takeover {
            params.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if self.client_no_context_takeover {
            params.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.server_window_bits != MAX_WINDOW_BITS {
            params.push(ExtensionParam::new(
                SERVER_MAX_WINDOW_BITS,
                self.server_window_bits.to_string(),
            ));
        }
        if self.client_window_bits != MAX_WINDOW_BITS {
            params.push(ExtensionParam::new(
                CLIENT_MAX_WINDOW_BITS,
                self.client_window_bits.to_string(),
            ));
        }
        ExtensionOffer::with_params(PERMESSAGE_DEFLATE, params)
    }

    fn new_decoder(&self) -> Box<dyn ExtensionDecoder> {
        Box::new(DeflateDecoder::new(
            Mode::PerMessage,
            self.client_no_context_takeover,
            self.limits.clone(),
        ))
    }

    fn new_encoder(&self) -> Box<dyn ExtensionEncoder> {
        Box::new(DeflateEncoder::new(
            Mode::PerMessage,
            self.compression_level,
            self.server_window_bits,
            self.server_no_context_takeover,
        ))
    }
}

/// Accepts `permessage-deflate` offers the configured policy can honour.
///
/// Unknown, repeated, disallowed or out-of-range parameters make it decline
/// so the next handshaker can take a look at the client's fallback offer.
#[derive(Debug, Clone, Default)]
pub struct PerMessageDeflateHandshaker {
    config: DeflateConfig,
}

impl PerMessageDeflateHandshaker {
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }

    fn negotiate(&self, offer: &ExtensionOffer) -> Option<PerMessageDeflateExtension> {
        let config = &self.config;
        let mut ext = PerMessageDeflateExtension {
            compression_level: config.compression_level,
            server_no_context_takeover: false,
            server_window_bits: MAX_WINDOW_BITS,
            client_no_context_takeover: false,
            client_window_bits: MAX_WINDOW_BITS,
            limits: config.limits.clone(),
        };

        for (i, param) in offer.params.iter().enumerate() {
            if offer.params[..i].iter().any(|p| p.name == param.name) {
                trace!(param = %param.name, "permessage-deflate declined, repeated parameter");
                return None;
            }

            let value = param.value.as_deref();
            match param.name.as_str() {
                SERVER_NO_CONTEXT_TAKEOVER if config.allow_server_no_context_takeover && value.is_none() => {
                    ext.server_no_context_takeover = true;
                }
                CLIENT_NO_CONTEXT_TAKEOVER if value.is_none() => {
                    ext.client_no_context_takeover = config.client_no_context_takeover;
                }
                SERVER_MAX_WINDOW_BITS if config.allow_server_window_bits => {
                    ext.server_window_bits = parse_window_bits(value, MIN_SERVER_WINDOW_BITS)?;
                }
                CLIENT_MAX_WINDOW_BITS => {
                    let offered = match value {
                        Some(_) => parse_window_bits(value, MIN_WINDOW_BITS)?,
                        None => MAX_WINDOW_BITS,
                    };
                    ext.client_window_bits = config.client_window_bits.min(offered);
                }
                _ => {
                    trace!(param = %param, "permessage-deflate declined, parameter not accepted");
                    return None;
                }
            }
        }

        Some(ext)
    }
}

impl ServerExtensionHandshaker for PerMessageDeflateHandshaker {
    fn name(&self) -> &str {
        PERMESSAGE_DEFLATE
    }

    fn handshake(&self, offer: &ExtensionOffer) -> Option<Box<dyn ServerExtension>> {
        if offer.name != PERMESSAGE_DEFLATE {
            return None;
        }
        self.negotiate(offer)
            .map(|ext| Box::new(ext) as Box<dyn ServerExtension>)
    }
}

// ============================================================================
// deflate-frame
// ============================================================================

/// Negotiated `deflate-frame` extension; answers with the name it was offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateFrameExtension {
    name: String,
    compression_level: u32,
    limits: Limits,
}

impl ServerExtension for DeflateFrameExtension {
    fn rsv(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn response_data(&self) -> ExtensionOffer {
        ExtensionOffer::new(self.name.clone())
    }

    fn new_decoder(&self) -> Box<dyn ExtensionDecoder> {
        Box::new(DeflateDecoder::new(Mode::PerFrame, false, self.limits.clone()))
    }

    fn new_encoder(&self) -> Box<dyn ExtensionEncoder> {
        Box::new(DeflateEncoder::new(
            Mode::PerFrame,
            self.compression_level,
            MAX_WINDOW_BITS,
            false,
        ))
    }
}

/// Accepts parameterless `deflate-frame` and `x-webkit-deflate-frame` offers.
#[derive(Debug, Clone, Default)]
pub struct DeflateFrameHandshaker {
    config: DeflateConfig,
}

impl DeflateFrameHandshaker {
    /// Only the compression level and limits of `config` apply.
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }
}

impl ServerExtensionHandshaker for DeflateFrameHandshaker {
    fn name(&self) -> &str {
        DEFLATE_FRAME
    }

    fn handshake(&self, offer: &ExtensionOffer) -> Option<Box<dyn ServerExtension>> {
        if offer.name != DEFLATE_FRAME && offer.name != X_WEBKIT_DEFLATE_FRAME {
            return None;
        }
        if !offer.params.is_empty() {
            trace!(extension = %offer.name, "deflate-frame declined, parameters not supported");
            return None;
        }
        Some(Box::new(DeflateFrameExtension {
            name: offer.name.clone(),
            compression_level: self.config.compression_level,
            limits: self.config.limits.clone(),
        }))
    }
}
