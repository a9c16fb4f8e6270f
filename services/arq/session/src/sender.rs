//! Sender state machine for the single in-flight frame.
//!
//! [`Sender`] tracks the transmit bit, the last acknowledgement bit seen
//! from the peer and the frame currently in flight. It does not touch the
//! transport: the session task writes what [`Sender::start`] and
//! [`Sender::on_retry_tick`] hand back.

use crate::SessionError;
use arq_wire::SeqBit;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Completion of an accepted send
///
/// Resolves with `Ok(())` once the peer has acknowledged the frame, or with
/// [`SessionError::Closed`] if the session stops first.
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<()>,
}

impl Delivery {
    /// Wait for the peer to acknowledge the frame
    pub async fn delivered(self) -> Result<(), SessionError> {
        self.await
    }
}

impl Future for Delivery {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| SessionError::Closed))
    }
}

/// In-flight frame bookkeeping
#[derive(Debug)]
struct InFlight {
    frame: Bytes,
    completion: oneshot::Sender<()>,
    transmissions: u32,
    started: Instant,
}

/// Outcome of a retry timer tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Nothing in flight
    Idle,
    /// The in-flight frame was acknowledged and the caller notified
    Delivered {
        /// Times the frame went out on the wire
        transmissions: u32,
        /// Time from first transmission to confirmation
        elapsed: Duration,
    },
    /// Not yet acknowledged; write these bytes again
    Retransmit(Bytes),
}

/// Stop-and-wait send-side state
#[derive(Debug)]
pub struct Sender {
    tx_bit: SeqBit,
    peer_ack: Option<SeqBit>,
    in_flight: Option<InFlight>,
}

impl Sender {
    /// Create an idle sender with the initial transmit bit
    pub fn new() -> Self {
        Self {
            tx_bit: SeqBit::Zero,
            peer_ack: None,
            in_flight: None,
        }
    }

    /// Bit tagging the next (or current) data frame
    pub fn tx_bit(&self) -> SeqBit {
        self.tx_bit
    }

    /// Last acknowledgement bit observed from the peer
    pub fn peer_ack(&self) -> Option<SeqBit> {
        self.peer_ack
    }

    /// Whether a frame is in flight
    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the peer's last acknowledgement covers the current frame
    pub fn is_acknowledged(&self) -> bool {
        self.peer_ack == Some(self.tx_bit)
    }

    /// Frame the payload and make it the in-flight frame
    ///
    /// Returns the bytes to write immediately and the delivery handle.
    pub fn start<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
    ) -> Result<(Bytes, Delivery), SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::SendInProgress);
        }

        let frame = arq_wire::encode(self.tx_bit, payload)?;
        let (completion, rx) = oneshot::channel();

        self.in_flight = Some(InFlight {
            frame: frame.clone(),
            completion,
            transmissions: 1,
            started: Instant::now(),
        });

        debug!("DATA frame in flight: seq={} len={}", self.tx_bit, frame.len());
        Ok((frame, Delivery { rx }))
    }

    /// Record an acknowledgement bit from the peer
    pub fn on_ack(&mut self, bit: SeqBit) {
        self.peer_ack = Some(bit);
    }

    /// Drop the in-flight frame; its [`Delivery`] resolves as closed
    pub fn abandon(&mut self) {
        if let Some(entry) = self.in_flight.take() {
            debug!(
                "Abandoning DATA frame: seq={} transmissions={}",
                self.tx_bit, entry.transmissions
            );
        }
    }

    /// Advance on a retry timer tick
    pub fn on_retry_tick(&mut self) -> RetryAction {
        if self.in_flight.is_none() {
            return RetryAction::Idle;
        }

        if self.is_acknowledged() {
            let Some(done) = self.in_flight.take() else {
                return RetryAction::Idle;
            };
            self.tx_bit = self.tx_bit.flip();
            // The caller may have dropped the Delivery
            let _ = done.completion.send(());

            return RetryAction::Delivered {
                transmissions: done.transmissions,
                elapsed: done.started.elapsed(),
            };
        }

        match self.in_flight.as_mut() {
            Some(entry) => {
                entry.transmissions += 1;
                RetryAction::Retransmit(entry.frame.clone())
            }
            None => RetryAction::Idle,
        }
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}
