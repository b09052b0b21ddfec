//! Wire messages exchanged between block workers.
//!
//! Two message kinds exist: post conditions travel forward (to successors)
//! and error conditions travel backward (to predecessors). Both carry an
//! ordered string payload holding the serialized abstract state plus the
//! reserved status keys [`PROPERTY_KEY`], [`SOUND_KEY`] and [`PRECISE_KEY`].
//! Messages are immutable: fields are only readable once constructed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::block_graph::{BlockId, Location, ID_SEPARATOR};
use crate::status::AlgorithmStatus;

pub const PROPERTY_KEY: &str = "PROPERTY";
pub const PROPERTY_CHECKED: &str = "CHECKED";
pub const PROPERTY_UNCHECKED: &str = "UNCHECKED";

pub const SOUND_KEY: &str = "SOUND";
pub const SOUND_VALUE: &str = "SOUND";
pub const UNSOUND_VALUE: &str = "UNSOUND";

pub const PRECISE_KEY: &str = "PRECISE";
pub const PRECISE_VALUE: &str = "PRECISE";
pub const IMPRECISE_VALUE: &str = "IMPRECISE";

/// Protocol key listing the blocks an error condition has travelled through.
pub const VISITED_KEY: &str = "VISITED";

const RESERVED_KEYS: [&str; 4] = [PROPERTY_KEY, SOUND_KEY, PRECISE_KEY, VISITED_KEY];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializationError {
    #[error("missing payload key '{0}'")]
    MissingKey(String),
    #[error("invalid value '{value}' for payload key '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("malformed abstract state: {0}")]
    MalformedState(String),
    #[error("malformed wire message: {0}")]
    Wire(String),
}

/// Ordered key/value payload of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries owned by the abstract domain (everything except protocol keys).
    pub fn state_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !RESERVED_KEYS.contains(k))
    }

    /// Copy of the payload restricted to domain-owned entries.
    pub fn state_only(&self) -> Payload {
        self.state_entries()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Decode the reserved status keys.
    pub fn status(&self) -> Result<AlgorithmStatus, DeserializationError> {
        let property_checked =
            self.flag(PROPERTY_KEY, PROPERTY_CHECKED, PROPERTY_UNCHECKED)?;
        let sound = self.flag(SOUND_KEY, SOUND_VALUE, UNSOUND_VALUE)?;
        let precise = self.flag(PRECISE_KEY, PRECISE_VALUE, IMPRECISE_VALUE)?;
        Ok(AlgorithmStatus::new(property_checked, sound, precise))
    }

    fn flag(&self, key: &str, yes: &str, no: &str) -> Result<bool, DeserializationError> {
        match self.get(key) {
            Some(v) if v == yes => Ok(true),
            Some(v) if v == no => Ok(false),
            Some(v) => Err(DeserializationError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            }),
            None => Err(DeserializationError::MissingKey(key.to_string())),
        }
    }

    /// Write the reserved status keys, replacing any previous values.
    #[must_use]
    pub fn with_status(mut self, status: AlgorithmStatus) -> Self {
        let pick = |flag: bool, yes: &str, no: &str| if flag { yes } else { no }.to_string();
        self.insert(
            PROPERTY_KEY,
            pick(status.property_checked, PROPERTY_CHECKED, PROPERTY_UNCHECKED),
        );
        self.insert(SOUND_KEY, pick(status.sound, SOUND_VALUE, UNSOUND_VALUE));
        self.insert(
            PRECISE_KEY,
            pick(status.precise, PRECISE_VALUE, IMPRECISE_VALUE),
        );
        self
    }

    /// Blocks recorded under [`VISITED_KEY`], origin first.
    pub fn visited(&self) -> Vec<BlockId> {
        self.get(VISITED_KEY)
            .map(|v| {
                v.split(ID_SEPARATOR)
                    .filter(|s| !s.is_empty())
                    .map(BlockId::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn with_visited(mut self, visited: &[BlockId]) -> Self {
        let joined = visited
            .iter()
            .map(BlockId::as_str)
            .collect::<Vec<_>>()
            .join(&ID_SEPARATOR.to_string());
        self.insert(VISITED_KEY, joined);
        self
    }
}

impl FromIterator<(String, String)> for Payload {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Payload {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Forward summary: an abstract state that holds at the sender's end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostConditionMessage {
    block_id: BlockId,
    target_location: Location,
    payload: Payload,
    reachable: bool,
    full_path: bool,
}

impl PostConditionMessage {
    pub fn new(
        block_id: BlockId,
        target_location: Location,
        payload: Payload,
        reachable: bool,
        full_path: bool,
    ) -> Self {
        Self {
            block_id,
            target_location,
            payload,
            reachable,
            full_path,
        }
    }

    /// Originating block.
    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    pub fn target_location(&self) -> Location {
        self.target_location
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }

    /// The summary accounts for every path from the program entry.
    pub fn full_path(&self) -> bool {
        self.full_path
    }
}

/// Backward summary: a condition at the sender's start under which a
/// violation is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorConditionMessage {
    block_id: BlockId,
    target_location: Location,
    payload: Payload,
    first: bool,
}

impl ErrorConditionMessage {
    pub fn new(block_id: BlockId, target_location: Location, payload: Payload, first: bool) -> Self {
        Self {
            block_id,
            target_location,
            payload,
            first,
        }
    }

    /// Originating block.
    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    pub fn target_location(&self) -> Location {
        self.target_location
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// True when the sender found the violation itself (no refinement yet).
    pub fn first(&self) -> bool {
        self.first
    }

    /// Blocks the condition has been propagated through, origin first.
    pub fn visited(&self) -> Vec<BlockId> {
        self.payload.visited()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MessageKind {
    #[serde(rename = "post_condition")]
    PostCondition,
    #[serde(rename = "error_condition")]
    ErrorCondition,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::PostCondition => f.write_str("post-condition"),
            MessageKind::ErrorCondition => f.write_str("error-condition"),
        }
    }
}

/// Any message of the block-summary protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockSummaryMessage {
    PostCondition(PostConditionMessage),
    ErrorCondition(ErrorConditionMessage),
}

impl BlockSummaryMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BlockSummaryMessage::PostCondition(_) => MessageKind::PostCondition,
            BlockSummaryMessage::ErrorCondition(_) => MessageKind::ErrorCondition,
        }
    }

    pub fn block_id(&self) -> &BlockId {
        match self {
            BlockSummaryMessage::PostCondition(m) => m.block_id(),
            BlockSummaryMessage::ErrorCondition(m) => m.block_id(),
        }
    }

    pub fn target_location(&self) -> Location {
        match self {
            BlockSummaryMessage::PostCondition(m) => m.target_location(),
            BlockSummaryMessage::ErrorCondition(m) => m.target_location(),
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            BlockSummaryMessage::PostCondition(m) => m.payload(),
            BlockSummaryMessage::ErrorCondition(m) => m.payload(),
        }
    }

    pub fn status(&self) -> Result<AlgorithmStatus, DeserializationError> {
        self.payload().status()
    }

    pub fn to_json(&self) -> String {
        // Serializing string maps, integers and booleans cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Result<Self, DeserializationError> {
        serde_json::from_str(raw).map_err(|e| DeserializationError::Wire(e.to_string()))
    }
}

impl From<PostConditionMessage> for BlockSummaryMessage {
    fn from(value: PostConditionMessage) -> Self {
        BlockSummaryMessage::PostCondition(value)
    }
}

impl From<ErrorConditionMessage> for BlockSummaryMessage {
    fn from(value: ErrorConditionMessage) -> Self {
        BlockSummaryMessage::ErrorCondition(value)
    }
}

impl fmt::Display for BlockSummaryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSummaryMessage::PostCondition(m) => write!(
                f,
                "post-condition from {} at {} (reachable: {}, full path: {})",
                m.block_id, m.target_location, m.reachable, m.full_path
            ),
            BlockSummaryMessage::ErrorCondition(m) => write!(
                f,
                "error-condition from {} at {} (first: {})",
                m.block_id, m.target_location, m.first
            ),
        }
    }
}
