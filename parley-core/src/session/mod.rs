//! Boundary with the remote conversational session.
//!
//! The session itself (connection, auth, model setup) belongs to the caller.
//! The engine only needs somewhere to put outbound blocks ([`OutboundSink`])
//! and a way to be told about inbound events (`ParleyEngine::on_*`).
//! [`message`] models the JSON envelopes so an adapter can translate raw
//! server messages into engine events without re-deriving the ordering rules.

pub mod message;

use tracing::debug;

use crate::codec::EncodedBlock;

/// Outbound half of the session adapter.
///
/// `send` is fire-and-forget and must keep call order on the wire. It is
/// called from the engine thread and must not block.
pub trait OutboundSink {
    fn send(&mut self, block: EncodedBlock);
}

impl OutboundSink for crossbeam_channel::Sender<EncodedBlock> {
    fn send(&mut self, block: EncodedBlock) {
        if crossbeam_channel::Sender::send(self, block).is_err() {
            debug!("outbound receiver dropped, block discarded");
        }
    }
}

/// Lets an async transport task own the receiving end.
impl OutboundSink for tokio::sync::mpsc::UnboundedSender<EncodedBlock> {
    fn send(&mut self, block: EncodedBlock) {
        if tokio::sync::mpsc::UnboundedSender::send(self, block).is_err() {
            debug!("outbound receiver dropped, block discarded");
        }
    }
}

/// Collects blocks in memory.
impl OutboundSink for Vec<EncodedBlock> {
    fn send(&mut self, block: EncodedBlock) {
        self.push(block);
    }
}

impl<S: OutboundSink + ?Sized> OutboundSink for Box<S> {
    fn send(&mut self, block: EncodedBlock) {
        (**self).send(block);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F: FnMut(EncodedBlock)> OutboundSink for FnSink<F> {
    fn send(&mut self, block: EncodedBlock) {
        (self.0)(block);
    }
}
