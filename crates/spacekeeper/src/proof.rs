use crate::plot::PlotError;
use futures::channel::mpsc;
use futures::StreamExt;
use poc_primitives::{Proof, PublicKey};
use std::sync::Arc;
use thiserror::Error;

/// Proof lookup result for one work space.
///
/// Backend failures are embedded in [`Self::proof`] rather than failing the
/// whole lookup, so batched lookups always produce one record per work space.
#[derive(Debug, Clone)]
pub struct WorkSpaceProof {
    /// String form of the work space identity
    pub space_id: String,
    /// Public key the plot is bound to
    pub public_key: PublicKey,
    /// Ordinal the wallet assigned to the public key
    pub ordinal: u32,
    /// The proof, or the backend failure that stands in for it
    pub proof: Result<Proof, PlotError>,
}

/// Reader side of the proof stream was dropped.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("proof reader was dropped")]
pub struct ProofReaderClosed;

/// Bounded stream of proof records produced by a background task.
///
/// Dropping the reader cancels the producer: its next write fails locally
/// and it stops without touching the proof cache.
#[derive(Debug)]
pub struct ProofReader {
    receiver: mpsc::Receiver<Arc<WorkSpaceProof>>,
}

impl ProofReader {
    pub(crate) fn channel(capacity: usize) -> (ProofWriter, ProofReader) {
        let (sender, receiver) = mpsc::channel(capacity);
        (ProofWriter { sender }, ProofReader { receiver })
    }

    /// Next proof record, `None` once the producer finished.
    pub async fn next(&mut self) -> Option<Arc<WorkSpaceProof>> {
        self.receiver.next().await
    }
}

#[derive(Debug)]
pub(crate) struct ProofWriter {
    sender: mpsc::Sender<Arc<WorkSpaceProof>>,
}

impl ProofWriter {
    /// Writes one record; fails once the reader is gone.
    ///
    /// The channel is sized for the full expected result set, so a write can
    /// only fail through disconnection, never through backpressure.
    pub(crate) fn write(&mut self, proof: Arc<WorkSpaceProof>) -> Result<(), ProofReaderClosed> {
        self.sender.try_send(proof).map_err(|_| ProofReaderClosed)
    }
}
