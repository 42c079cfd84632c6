//! Per-connection processing chain.
//!
//! A [`Pipeline`] is an ordered sequence of uniquely named stages. Index 0 is
//! the network side: inbound frames visit stages in ascending order, outbound
//! frames in descending order. Only decoder stages act on inbound frames and
//! only encoder stages act on outbound frames; everything else passes frames
//! through untouched.
//!
//! ```text
//!  network                                                    application
//!    |  [enc_n .. enc_1]  [ws-server-extensions]  [dec_1 .. dec_n]  |
//!    |  <--- outbound ---                          --- inbound --->  |
//! ```

use std::fmt;

use tracing::trace;

use crate::error::{Error, Result};
use crate::extensions::{ExtensionDecoder, ExtensionEncoder};
use crate::protocol::Frame;

/// One stage of a [`Pipeline`].
pub enum Stage {
    /// Slot occupied by the extension negotiator until the handshake finishes.
    Handshake,
    /// Stage owned by another layer (HTTP codec, application handler, ...).
    Marker,
    /// Inbound transform of a negotiated extension.
    Decoder(Box<dyn ExtensionDecoder>),
    /// Outbound transform of a negotiated extension.
    Encoder(Box<dyn ExtensionEncoder>),
}

impl Stage {
    fn kind(&self) -> &'static str {
        match self {
            Stage::Handshake => "handshake",
            Stage::Marker => "marker",
            Stage::Decoder(_) => "decoder",
            Stage::Encoder(_) => "encoder",
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

struct Entry {
    name: String,
    stage: Stage,
}

/// Ordered, mutable chain of named stages.
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<Entry>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the stage called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Whether a stage called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Look up a stage by name.
    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.stage)
    }

    /// Stage names, network side first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// `base` if unused, otherwise `base#2`, `base#3`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}#{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn insert(&mut self, index: usize, name: String, stage: Stage) -> Result<()> {
        if self.contains(&name) {
            return Err(Error::DuplicateStage(name));
        }
        trace!(stage = %name, kind = stage.kind(), index, "pipeline insert");
        self.entries.insert(index, Entry { name, stage });
        Ok(())
    }

    fn require(&self, base: &str) -> Result<usize> {
        self.position(base)
            .ok_or_else(|| Error::StageNotFound(base.to_string()))
    }

    /// Append a stage on the application side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStage`] if `name` is taken.
    pub fn add_last(&mut self, name: impl Into<String>, stage: Stage) -> Result<()> {
        let index = self.entries.len();
        self.insert(index, name.into(), stage)
    }

    /// Prepend a stage on the network side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStage`] if `name` is taken.
    pub fn add_first(&mut self, name: impl Into<String>, stage: Stage) -> Result<()> {
        self.insert(0, name.into(), stage)
    }

    /// Insert a stage immediately after `base` (application side of it).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageNotFound`] if `base` is missing, or
    /// [`Error::DuplicateStage`] if `name` is taken.
    pub fn add_after(&mut self, base: &str, name: impl Into<String>, stage: Stage) -> Result<()> {
        let index = self.require(base)? + 1;
        self.insert(index, name.into(), stage)
    }

    /// Insert a stage immediately before `base` (network side of it).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageNotFound`] if `base` is missing, or
    /// [`Error::DuplicateStage`] if `name` is taken.
    pub fn add_before(&mut self, base: &str, name: impl Into<String>, stage: Stage) -> Result<()> {
        let index = self.require(base)?;
        self.insert(index, name.into(), stage)
    }

    /// Remove the stage called `name` and hand it back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageNotFound`] if there is no such stage.
    pub fn remove(&mut self, name: &str) -> Result<Stage> {
        let index = self.require(name)?;
        trace!(stage = %name, index, "pipeline remove");
        Ok(self.entries.remove(index).stage)
    }

    /// Run an inbound frame through every decoder, network side first.
    ///
    /// # Errors
    ///
    /// Propagates the first decoder error; later stages are skipped.
    pub fn process_inbound(&mut self, frame: &mut Frame) -> Result<()> {
        for entry in &mut self.entries {
            if let Stage::Decoder(decoder) = &mut entry.stage {
                decoder.decode(frame)?;
            }
        }
        Ok(())
    }

    /// Run an outbound frame through every encoder, application side first.
    ///
    /// # Errors
    ///
    /// Propagates the first encoder error; later stages are skipped.
    pub fn process_outbound(&mut self, frame: &mut Frame) -> Result<()> {
        for entry in self.entries.iter_mut().rev() {
            if let Stage::Encoder(encoder) = &mut entry.stage {
                encoder.encode(frame)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, &e.stage)))
            .finish()
    }
}
