//! Writing the upgrade response and reporting the outcome to the negotiator.
//!
//! [`respond`] covers the common case where the connection task writes its
//! own response. When the response goes through a separate writer task, pair
//! a [`WritePromise`] with its [`WriteCompletion`]: the writer fulfils the
//! promise, the connection task awaits the completion, and the negotiator only
//! ever sees the outcome on the connection's own context.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};
use crate::extensions::ServerExtensionNegotiator;
use crate::pipeline::Pipeline;
use crate::protocol::HandshakeResponse;

async fn write_response<W>(response: &HandshakeResponse, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    response.write(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Finish the handshake: add the negotiated extensions to `response`, write it
/// to `writer`, and tell the negotiator how the write went.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] if the negotiator has not handled a request
/// yet, in which case nothing is written. Otherwise returns the write error,
/// if any, after the negotiator has seen it.
pub async fn respond<W>(
    negotiator: &mut ServerExtensionNegotiator,
    pipeline: &mut Pipeline,
    response: &mut HandshakeResponse,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    negotiator.prepare_response(response)?;
    let outcome = write_response(response, writer).await;
    negotiator.write_completed(pipeline, outcome.clone());
    outcome
}

/// Create a linked promise/completion pair for one response write.
pub fn write_promise() -> (WritePromise, WriteCompletion) {
    let (tx, rx) = oneshot::channel();
    (WritePromise { tx }, WriteCompletion { rx })
}

/// Writer-side half: reports the outcome of the response write.
///
/// Dropping it without completing counts as a failed write.
#[derive(Debug)]
pub struct WritePromise {
    tx: oneshot::Sender<Result<()>>,
}

impl WritePromise {
    /// Report the outcome.
    pub fn complete(self, outcome: Result<()>) {
        if self.tx.send(outcome).is_err() {
            trace!("write completion dropped before the outcome arrived");
        }
    }

    /// Write `response` to `writer` and report the outcome.
    ///
    /// # Errors
    ///
    /// Returns the same error that is reported through the promise.
    pub async fn write_response<W>(self, response: &HandshakeResponse, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let outcome = write_response(response, writer).await;
        self.complete(outcome.clone());
        outcome
    }
}

/// Connection-side half: waits for the outcome of the response write.
#[derive(Debug)]
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteCompletion {
    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the reported write error, or [`Error::Io`] if the promise was
    /// dropped without being completed.
    pub async fn outcome(self) -> Result<()> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Error::Io("response writer went away before completing".into())))
    }

    /// Wait for the outcome and hand it to `negotiator`.
    ///
    /// # Errors
    ///
    /// Same as [`outcome`](Self::outcome); the negotiator has already seen it.
    pub async fn deliver(
        self,
        negotiator: &mut ServerExtensionNegotiator,
        pipeline: &mut Pipeline,
    ) -> Result<()> {
        let outcome = self.outcome().await;
        negotiator.write_completed(pipeline, outcome.clone());
        outcome
    }
}
