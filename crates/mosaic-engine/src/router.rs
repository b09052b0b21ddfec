//! Fan-out of summary messages along the block graph.

use std::sync::Arc;

use tracing::error;

use mosaic_ir::{BlockGraph, BlockId, BlockSummaryMessage};

use crate::EngineError;

/// Resolves the receivers of a message from its originating block.
///
/// Post conditions go to the origin's successors, error conditions to its
/// predecessors. Receivers are returned in block-id order.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    graph: Arc<BlockGraph>,
}

impl MessageRouter {
    pub fn new(graph: Arc<BlockGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &BlockGraph {
        &self.graph
    }

    pub fn route(&self, message: &BlockSummaryMessage) -> Result<Vec<BlockId>, EngineError> {
        let origin = message.block_id();
        let Some(block) = self.graph.get(origin) else {
            error!(origin = %origin, kind = %message.kind(), "message from unknown block");
            return Err(EngineError::ProtocolViolation(format!(
                "{} names unknown block '{origin}'",
                message.kind()
            )));
        };
        let receivers = match message {
            BlockSummaryMessage::PostCondition(_) => block.successors(),
            BlockSummaryMessage::ErrorCondition(_) => block.predecessors(),
        };
        Ok(receivers.iter().cloned().collect())
    }
}
