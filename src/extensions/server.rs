//! Per-connection negotiation of server-side extensions.
//!
//! The negotiator sits in the connection's [`Pipeline`] under a well-known stage
//! name while the upgrade handshake is in flight:
//!
//! 1. [`handle_request`](ServerExtensionNegotiator::handle_request) runs each
//!    offer through the handshakers in priority order, lets
//!    [`RsvAllocator`] arbitrate reserved bits in offer order, and installs the
//!    winners' transforms around its own stage straight away.
//! 2. [`prepare_response`](ServerExtensionNegotiator::prepare_response) writes
//!    the `Sec-WebSocket-Extensions` header, or leaves it out when nothing was
//!    accepted.
//! 3. [`write_completed`](ServerExtensionNegotiator::write_completed) removes
//!    the negotiator's stage if the response went out. On failure the stage
//!    stays where it is so connection-level code can see the handshake never
//!    finished; installed transforms are never rolled back.

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extensions::{
    ExtensionDecoder, ExtensionEncoder, ExtensionOffer, Handshakers, NegotiationPhase,
    RsvAllocator, RsvBits, response_header,
};
use crate::pipeline::{Pipeline, Stage};
use crate::protocol::{HandshakeRequest, HandshakeResponse};

/// Transforms materialized for one accepted extension, awaiting installation.
struct Accepted {
    name: String,
    decoder: Box<dyn ExtensionDecoder>,
    encoder: Box<dyn ExtensionEncoder>,
}

/// Drives extension negotiation for a single connection.
#[derive(Debug)]
pub struct ServerExtensionNegotiator {
    handshakers: Handshakers,
    config: Config,
    phase: NegotiationPhase,
    allocator: RsvAllocator,
    selected: Vec<ExtensionOffer>,
}

impl ServerExtensionNegotiator {
    /// Create a negotiator with the default configuration.
    pub fn new(handshakers: Handshakers) -> Self {
        Self::with_config(handshakers, Config::default())
    }

    /// Create a negotiator with a custom configuration.
    pub fn with_config(handshakers: Handshakers, config: Config) -> Self {
        Self {
            handshakers,
            config,
            phase: NegotiationPhase::Idle,
            allocator: RsvAllocator::new(),
            selected: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Response descriptors of the accepted extensions, in acceptance order.
    pub fn selected(&self) -> &[ExtensionOffer] {
        &self.selected
    }

    /// Reserved bits claimed by the accepted extensions.
    pub fn claimed_bits(&self) -> RsvBits {
        self.allocator.claimed()
    }

    /// Name of the pipeline stage this negotiator occupies.
    pub fn stage_name(&self) -> &str {
        &self.config.stage_name
    }

    /// Add this negotiator's stage at the application end of `pipeline`.
    ///
    /// Callers that need a different position can insert
    /// [`Stage::Handshake`] under [`stage_name`](Self::stage_name) themselves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStage`] if the stage is already present.
    pub fn install(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.add_last(self.config.stage_name.clone(), Stage::Handshake)
    }

    /// Parse a raw upgrade request under this negotiator's [`Limits`](crate::Limits).
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `data` exceeds the configured
    /// handshake size, or any error of [`HandshakeRequest::parse`].
    pub fn parse_request(&self, data: &[u8]) -> Result<HandshakeRequest> {
        HandshakeRequest::parse_with_limits(data, &self.config.limits)
    }

    /// Negotiate the extensions offered in an already parsed upgrade request.
    ///
    /// # Errors
    ///
    /// Same as [`handle_request`](Self::handle_request).
    pub fn handle_upgrade_request(
        &mut self,
        pipeline: &mut Pipeline,
        request: &HandshakeRequest,
    ) -> Result<()> {
        self.handle_request(pipeline, request.extensions.as_deref())
    }

    /// Negotiate the raw `Sec-WebSocket-Extensions` value of an upgrade request
    /// and install the accepted extensions' transforms.
    ///
    /// Declined offers and reserved-bit conflicts are dropped silently; a
    /// malformed or oversized header counts as no offers at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a request was already handled, or
    /// [`Error::StageNotFound`] if the negotiator's stage is not in `pipeline`.
    pub fn handle_request(
        &mut self,
        pipeline: &mut Pipeline,
        extensions_header: Option<&str>,
    ) -> Result<()> {
        if !self.phase.can_handle_request() {
            return Err(self.invalid_state("handle_request"));
        }
        if !pipeline.contains(&self.config.stage_name) {
            return Err(Error::StageNotFound(self.config.stage_name.clone()));
        }

        let offers = self.parse_offers(extensions_header);
        let mut accepted = Vec::new();

        for offer in &offers {
            let Some(extension) = self.handshakers.handshake(offer) else {
                trace!(extension = %offer.name, "extension offer declined");
                continue;
            };

            let rsv = extension.rsv();
            if self.allocator.try_claim(rsv).is_none() {
                debug!(
                    extension = %offer.name,
                    rsv = %rsv,
                    claimed = %self.allocator.claimed(),
                    "extension dropped, reserved bits already claimed"
                );
                continue;
            }

            let response = extension.response_data();
            accepted.push(Accepted {
                name: response.name.clone(),
                decoder: extension.new_decoder(),
                encoder: extension.new_encoder(),
            });
            self.selected.push(response);
        }

        self.phase = NegotiationPhase::Negotiating;
        debug!(
            offered = offers.len(),
            accepted = accepted.len(),
            rsv = %self.allocator.claimed(),
            "extension negotiation finished"
        );

        self.install_transforms(pipeline, accepted)
    }

    fn parse_offers(&self, header: Option<&str>) -> Vec<ExtensionOffer> {
        let Some(header) = header else {
            return Vec::new();
        };

        let limits = &self.config.limits;
        if !limits.accepts_extensions_header(header.len()) {
            debug!(
                len = header.len(),
                max = limits.max_extensions_header_size,
                "extensions header too large, ignoring"
            );
            return Vec::new();
        }

        match ExtensionOffer::parse_header(header) {
            Ok(mut offers) => {
                if offers.len() > limits.max_extension_offers {
                    debug!(
                        offered = offers.len(),
                        max = limits.max_extension_offers,
                        "too many extension offers, ignoring the rest"
                    );
                    offers.truncate(limits.max_extension_offers);
                }
                offers
            }
            Err(err) => {
                debug!(error = %err, "malformed extensions header, treating as absent");
                Vec::new()
            }
        }
    }

    /// Lay out `[enc_n .. enc_1, self, dec_1 .. dec_n]` so that both directions
    /// meet the transforms in acceptance order.
    fn install_transforms(&self, pipeline: &mut Pipeline, accepted: Vec<Accepted>) -> Result<()> {
        let mut decoder_anchor = self.config.stage_name.clone();
        let mut encoder_anchor = self.config.stage_name.clone();

        for Accepted {
            name,
            decoder,
            encoder,
        } in accepted
        {
            let decoder_name = pipeline.unique_name(&format!("{}-decoder", name));
            pipeline.add_after(&decoder_anchor, decoder_name.clone(), Stage::Decoder(decoder))?;

            let encoder_name = pipeline.unique_name(&format!("{}-encoder", name));
            pipeline.add_before(&encoder_anchor, encoder_name.clone(), Stage::Encoder(encoder))?;

            debug!(
                extension = %name,
                decoder = %decoder_name,
                encoder = %encoder_name,
                "extension transforms installed"
            );
            decoder_anchor = decoder_name;
            encoder_anchor = encoder_name;
        }

        Ok(())
    }

    /// Put the negotiated extensions into the upgrade response.
    ///
    /// If nothing was accepted the response is left as is, so the header
    /// stays absent. An extensions value already on the response is kept and
    /// the negotiated entries are appended to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless called once, after
    /// [`handle_request`](Self::handle_request).
    pub fn prepare_response(&mut self, response: &mut HandshakeResponse) -> Result<()> {
        if self.phase != NegotiationPhase::Negotiating {
            return Err(self.invalid_state("prepare_response"));
        }

        if let Some(value) = response_header(&self.selected) {
            response.extensions = Some(match response.extensions_header() {
                Some(existing) => format!("{}, {}", existing, value),
                None => value,
            });
        }

        self.phase = NegotiationPhase::AwaitingWriteCompletion;
        Ok(())
    }

    /// Deliver the outcome of the upgrade response write.
    ///
    /// Success removes the negotiator's stage from `pipeline`; failure leaves
    /// it in place. Outcomes arriving in any phase other than
    /// [`NegotiationPhase::AwaitingWriteCompletion`] are ignored.
    pub fn write_completed(&mut self, pipeline: &mut Pipeline, outcome: Result<()>) {
        if self.phase != NegotiationPhase::AwaitingWriteCompletion {
            debug!(phase = %self.phase, "ignoring response write completion");
            return;
        }

        match outcome {
            Ok(()) => {
                if let Err(err) = pipeline.remove(&self.config.stage_name) {
                    debug!(error = %err, "negotiator stage already gone");
                }
                self.phase = NegotiationPhase::Detached;
                trace!("extension negotiator detached");
            }
            Err(err) => {
                warn!(
                    error = %err,
                    stage = %self.config.stage_name,
                    "upgrade response write failed, extension negotiator stays in pipeline"
                );
                self.phase = NegotiationPhase::Resident;
            }
        }
    }

    /// The connection went away before the response write completed.
    ///
    /// Moves to [`NegotiationPhase::Resident`]; connection teardown owns the
    /// pipeline from here on.
    pub fn connection_closed(&mut self) {
        if self.phase == NegotiationPhase::AwaitingWriteCompletion {
            debug!("connection closed before upgrade response completed");
            self.phase = NegotiationPhase::Resident;
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            phase: self.phase.to_string(),
        }
    }
}
