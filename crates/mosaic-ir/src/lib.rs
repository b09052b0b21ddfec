#![doc = include_str!("../README.md")]

//! Mosaic intermediate representation.
//!
//! This crate defines the block graph a program is partitioned into, the
//! wire messages exchanged by block workers, the algorithm status flags
//! carried in every message, and the program model used as tool input.

pub mod block_graph;
pub mod message;
pub mod program;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod status;

pub use block_graph::{Block, BlockGraph, BlockId, ConfigurationError, Location};
pub use message::{
    BlockSummaryMessage, DeserializationError, ErrorConditionMessage, MessageKind, Payload,
    PostConditionMessage,
};
pub use program::{BlockBody, CfaEdge, Cmp, Operation, ProgramModel, Term};
pub use status::AlgorithmStatus;
