//! Test doubles for negotiation tests.
//!
//! Mock handshakers count every call the negotiator makes on them and their
//! extensions, and mock transforms append a label to frame payloads so the
//! order in which a pipeline applies them can be read back.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wsext::{
    ExtensionDecoder, ExtensionEncoder, ExtensionOffer, Frame, Handshakers, Pipeline, Result,
    RsvBits, ServerExtension, ServerExtensionHandshaker, ServerExtensionNegotiator, Stage,
};

pub const REQUEST_HEAD: &str = "GET /chat HTTP/1.1\r\n\
    Host: server.example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n";

/// Raw upgrade request, with an extensions header when `extensions` is set.
pub fn upgrade_request(extensions: Option<&str>) -> Vec<u8> {
    let mut request = REQUEST_HEAD.to_string();
    if let Some(value) = extensions {
        request.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", value));
    }
    request.push_str("\r\n");
    request.into_bytes()
}

/// Calls observed on one handshaker and every extension it produced.
#[derive(Debug, Default)]
pub struct CallCounts {
    handshake: AtomicUsize,
    rsv: AtomicUsize,
    response_data: AtomicUsize,
    new_decoder: AtomicUsize,
    new_encoder: AtomicUsize,
}

impl CallCounts {
    pub fn handshakes(&self) -> usize {
        self.handshake.load(Ordering::SeqCst)
    }

    pub fn rsv_queries(&self) -> usize {
        self.rsv.load(Ordering::SeqCst)
    }

    pub fn response_data(&self) -> usize {
        self.response_data.load(Ordering::SeqCst)
    }

    pub fn decoders(&self) -> usize {
        self.new_decoder.load(Ordering::SeqCst)
    }

    pub fn encoders(&self) -> usize {
        self.new_encoder.load(Ordering::SeqCst)
    }

    /// True when no extension from this handshaker was ever materialized.
    pub fn never_materialized(&self) -> bool {
        self.response_data() == 0 && self.decoders() == 0 && self.encoders() == 0
    }
}

/// Appends `label` to every data payload it sees.
pub struct Label(pub String);

impl Label {
    fn apply(&self, frame: &mut Frame) {
        let mut payload = frame.payload().to_vec();
        payload.extend_from_slice(self.0.as_bytes());
        frame.set_payload(payload);
    }
}

impl ExtensionDecoder for Label {
    fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        self.apply(frame);
        Ok(())
    }
}

impl ExtensionEncoder for Label {
    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        self.apply(frame);
        Ok(())
    }
}

pub struct MockExtension {
    label: &'static str,
    rsv: RsvBits,
    offer: ExtensionOffer,
    calls: Arc<CallCounts>,
}

impl ServerExtension for MockExtension {
    fn rsv(&self) -> RsvBits {
        self.calls.rsv.fetch_add(1, Ordering::SeqCst);
        self.rsv
    }

    fn response_data(&self) -> ExtensionOffer {
        self.calls.response_data.fetch_add(1, Ordering::SeqCst);
        self.offer.clone()
    }

    fn new_decoder(&self) -> Box<dyn ExtensionDecoder> {
        self.calls.new_decoder.fetch_add(1, Ordering::SeqCst);
        Box::new(Label(format!("[d:{}]", self.label)))
    }

    fn new_encoder(&self) -> Box<dyn ExtensionEncoder> {
        self.calls.new_encoder.fetch_add(1, Ordering::SeqCst);
        Box::new(Label(format!("[e:{}]", self.label)))
    }
}

/// Accepts offers named `accepts` and echoes them back as the response entry.
pub struct MockHandshaker {
    label: &'static str,
    accepts: &'static str,
    rsv: RsvBits,
    calls: Arc<CallCounts>,
}

impl MockHandshaker {
    pub fn new(label: &'static str, accepts: &'static str, rsv: RsvBits) -> Self {
        Self {
            label,
            accepts,
            rsv,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<CallCounts> {
        self.calls.clone()
    }
}

impl ServerExtensionHandshaker for MockHandshaker {
    fn name(&self) -> &str {
        self.label
    }

    fn handshake(&self, offer: &ExtensionOffer) -> Option<Box<dyn ServerExtension>> {
        self.calls.handshake.fetch_add(1, Ordering::SeqCst);
        if offer.name != self.accepts {
            return None;
        }
        Some(Box::new(MockExtension {
            label: self.label,
            rsv: self.rsv,
            offer: offer.clone(),
            calls: self.calls.clone(),
        }))
    }
}

/// A pipeline shaped like a server connection right before the upgrade:
/// `http-codec`, the negotiator, `app`.
pub fn connection(handshakers: Handshakers) -> (ServerExtensionNegotiator, Pipeline) {
    let negotiator = ServerExtensionNegotiator::new(handshakers);
    let mut pipeline = Pipeline::new();
    pipeline.add_last("http-codec", Stage::Marker).unwrap();
    negotiator.install(&mut pipeline).unwrap();
    pipeline.add_last("app", Stage::Marker).unwrap();
    (negotiator, pipeline)
}

pub fn stage_names(pipeline: &Pipeline) -> Vec<String> {
    pipeline.names().map(String::from).collect()
}
