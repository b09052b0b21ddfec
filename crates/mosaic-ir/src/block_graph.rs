//! Block graph: the immutable partition of a program into analysis blocks.
//!
//! Each [`Block`] covers a contiguous fragment of the control-flow graph
//! between a start and an end location. Blocks are linked to their
//! predecessors and successors; the subset of predecessors reached through a
//! back-edge (a loop) is tracked separately because their summaries are
//! ignored until they carry real information.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Identifier of a block. Also the routing key of every message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BlockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A control-flow location (node number in the program's CFA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(u32);

impl Location {
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    pub const fn number(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<u32> for Location {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Errors raised while building or validating a block graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("block graph is empty")]
    EmptyGraph,
    #[error("duplicate block id '{0}'")]
    DuplicateBlock(BlockId),
    #[error("block '{block}' references unknown block '{reference}'")]
    UnknownBlock { block: BlockId, reference: BlockId },
    #[error("edge {from} -> {to} is not recorded on both endpoints")]
    AsymmetricEdge { from: BlockId, to: BlockId },
    #[error("block '{block}' lists loop predecessor '{predecessor}' that is not a predecessor")]
    LoopPredecessorNotPredecessor {
        block: BlockId,
        predecessor: BlockId,
    },
    #[error("no entry block: every block has a forward predecessor")]
    MissingEntry,
    #[error("ambiguous entry block, candidates: {}", join_ids(.0))]
    AmbiguousEntry(Vec<BlockId>),
    #[error("no block starts at the program entry {0}")]
    EntryLocationNotFound(Location),
    #[error("no analysis available for block '{0}'")]
    MissingAnalysis(BlockId),
    #[error("block id '{0}' must be non-empty and must not contain ','")]
    InvalidBlockId(BlockId),
    #[error("malformed program model: {0}")]
    Malformed(String),
}

/// Separates block ids in a visited trail.
pub const ID_SEPARATOR: char = ',';

fn check_id(id: &BlockId) -> Result<(), ConfigurationError> {
    if id.as_str().is_empty() || id.as_str().contains(ID_SEPARATOR) {
        return Err(ConfigurationError::InvalidBlockId(id.clone()));
    }
    Ok(())
}

fn join_ids(ids: &[BlockId]) -> String {
    ids.iter()
        .map(BlockId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One analysis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    start: Location,
    end: Location,
    predecessors: BTreeSet<BlockId>,
    successors: BTreeSet<BlockId>,
    loop_predecessors: BTreeSet<BlockId>,
}

impl Block {
    pub fn new(
        id: impl Into<BlockId>,
        start: Location,
        end: Location,
        predecessors: impl IntoIterator<Item = BlockId>,
        successors: impl IntoIterator<Item = BlockId>,
        loop_predecessors: impl IntoIterator<Item = BlockId>,
    ) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            predecessors: predecessors.into_iter().collect(),
            successors: successors.into_iter().collect(),
            loop_predecessors: loop_predecessors.into_iter().collect(),
        }
    }

    /// A block without any neighbours.
    pub fn isolated(id: impl Into<BlockId>, start: Location, end: Location) -> Self {
        Self::new(id, start, end, [], [], [])
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn start(&self) -> Location {
        self.start
    }

    pub fn end(&self) -> Location {
        self.end
    }

    pub fn predecessors(&self) -> &BTreeSet<BlockId> {
        &self.predecessors
    }

    pub fn successors(&self) -> &BTreeSet<BlockId> {
        &self.successors
    }

    pub fn loop_predecessors(&self) -> &BTreeSet<BlockId> {
        &self.loop_predecessors
    }

    pub fn is_predecessor(&self, id: &BlockId) -> bool {
        self.predecessors.contains(id)
    }

    pub fn is_successor(&self, id: &BlockId) -> bool {
        self.successors.contains(id)
    }

    pub fn is_loop_predecessor(&self, id: &BlockId) -> bool {
        self.loop_predecessors.contains(id)
    }

    /// True when the block has no predecessor reached by a forward edge.
    pub fn is_entry_candidate(&self) -> bool {
        self.predecessors
            .iter()
            .all(|p| self.loop_predecessors.contains(p))
    }
}

/// Validated, immutable set of blocks with a unique entry (root) block.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    blocks: IndexMap<BlockId, Block>,
    root: BlockId,
    on_cycle: BTreeSet<BlockId>,
}

impl BlockGraph {
    /// Validate a set of fully linked blocks.
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> Result<Self, ConfigurationError> {
        let mut map = IndexMap::new();
        for block in blocks {
            check_id(block.id())?;
            if map.contains_key(block.id()) {
                return Err(ConfigurationError::DuplicateBlock(block.id().clone()));
            }
            map.insert(block.id().clone(), block);
        }
        if map.is_empty() {
            return Err(ConfigurationError::EmptyGraph);
        }
        validate_links(&map)?;

        let candidates: Vec<BlockId> = map
            .values()
            .filter(|b| b.is_entry_candidate())
            .map(|b| b.id().clone())
            .collect();
        let root = match candidates.as_slice() {
            [] => return Err(ConfigurationError::MissingEntry),
            [only] => only.clone(),
            _ => return Err(ConfigurationError::AmbiguousEntry(candidates)),
        };

        let on_cycle = blocks_on_cycles(&map);
        Ok(Self {
            blocks: map,
            root,
            on_cycle,
        })
    }

    /// Link blocks by matching ends to starts and classify back-edges.
    ///
    /// `spans` lists `(id, start, end)`; block `a` precedes `b` whenever
    /// `a.end == b.start`. The block starting at `entry` becomes the root and
    /// loop predecessors are the sources of back-edges found by a depth-first
    /// search from it.
    pub fn connect(
        spans: impl IntoIterator<Item = (BlockId, Location, Location)>,
        entry: Location,
    ) -> Result<Self, ConfigurationError> {
        let mut order: IndexMap<BlockId, (Location, Location)> = IndexMap::new();
        for (id, start, end) in spans {
            check_id(&id)?;
            if order.contains_key(&id) {
                return Err(ConfigurationError::DuplicateBlock(id));
            }
            order.insert(id, (start, end));
        }
        if order.is_empty() {
            return Err(ConfigurationError::EmptyGraph);
        }

        let mut successors: IndexMap<BlockId, BTreeSet<BlockId>> = IndexMap::new();
        let mut predecessors: IndexMap<BlockId, BTreeSet<BlockId>> = IndexMap::new();
        for id in order.keys() {
            successors.insert(id.clone(), BTreeSet::new());
            predecessors.insert(id.clone(), BTreeSet::new());
        }
        for (from, (_, end)) in &order {
            for (to, (start, _)) in &order {
                if end == start {
                    successors[from].insert(to.clone());
                    predecessors[to].insert(from.clone());
                }
            }
        }

        let entries: Vec<BlockId> = order
            .iter()
            .filter(|(_, (start, _))| *start == entry)
            .map(|(id, _)| id.clone())
            .collect();
        let root = match entries.as_slice() {
            [] => return Err(ConfigurationError::EntryLocationNotFound(entry)),
            [only] => only.clone(),
            _ => return Err(ConfigurationError::AmbiguousEntry(entries)),
        };

        let back_edges = back_edges_from(&root, &successors);
        let blocks = order.iter().map(|(id, (start, end))| {
            let loops = back_edges
                .iter()
                .filter(|(_, to)| to == id)
                .map(|(from, _)| from.clone());
            Block::new(
                id.clone(),
                *start,
                *end,
                predecessors[id].iter().cloned(),
                successors[id].iter().cloned(),
                loops,
            )
        });
        let graph = Self::new(blocks.collect::<Vec<_>>())?;
        if graph.root != root {
            return Err(ConfigurationError::AmbiguousEntry(vec![
                root,
                graph.root.clone(),
            ]));
        }
        Ok(graph)
    }

    pub fn root(&self) -> &BlockId {
        &self.root
    }

    pub fn root_block(&self) -> &Block {
        &self.blocks[&self.root]
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    /// Blocks in declaration order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True when the block lies on a cycle of the block graph.
    pub fn lies_on_cycle(&self, id: &BlockId) -> bool {
        self.on_cycle.contains(id)
    }

    pub fn has_cycles(&self) -> bool {
        !self.on_cycle.is_empty()
    }
}

fn validate_links(blocks: &IndexMap<BlockId, Block>) -> Result<(), ConfigurationError> {
    for block in blocks.values() {
        for reference in block.predecessors.iter().chain(&block.successors) {
            if !blocks.contains_key(reference) {
                return Err(ConfigurationError::UnknownBlock {
                    block: block.id.clone(),
                    reference: reference.clone(),
                });
            }
        }
        for succ in &block.successors {
            if !blocks[succ].predecessors.contains(&block.id) {
                return Err(ConfigurationError::AsymmetricEdge {
                    from: block.id.clone(),
                    to: succ.clone(),
                });
            }
        }
        for pred in &block.predecessors {
            if !blocks[pred].successors.contains(&block.id) {
                return Err(ConfigurationError::AsymmetricEdge {
                    from: pred.clone(),
                    to: block.id.clone(),
                });
            }
        }
        if let Some(bad) = block
            .loop_predecessors
            .iter()
            .find(|p| !block.predecessors.contains(*p))
        {
            return Err(ConfigurationError::LoopPredecessorNotPredecessor {
                block: block.id.clone(),
                predecessor: bad.clone(),
            });
        }
    }
    Ok(())
}

/// Back-edges `(from, to)` of an iterative depth-first search from `root`.
fn back_edges_from(
    root: &BlockId,
    successors: &IndexMap<BlockId, BTreeSet<BlockId>>,
) -> BTreeSet<(BlockId, BlockId)> {
    let mut back_edges = BTreeSet::new();
    let mut visited: BTreeSet<BlockId> = BTreeSet::new();
    let mut on_stack: BTreeSet<BlockId> = BTreeSet::new();
    // (node, successors still to visit)
    let mut stack: Vec<(BlockId, Vec<BlockId>)> = Vec::new();

    visited.insert(root.clone());
    on_stack.insert(root.clone());
    stack.push((root.clone(), successors[root].iter().rev().cloned().collect()));

    while let Some((node, pending)) = stack.last_mut() {
        match pending.pop() {
            Some(next) => {
                if on_stack.contains(&next) {
                    back_edges.insert((node.clone(), next));
                } else if visited.insert(next.clone()) {
                    on_stack.insert(next.clone());
                    let children = successors[&next].iter().rev().cloned().collect();
                    stack.push((next, children));
                }
            }
            None => {
                on_stack.remove(node);
                stack.pop();
            }
        }
    }
    back_edges
}

fn blocks_on_cycles(blocks: &IndexMap<BlockId, Block>) -> BTreeSet<BlockId> {
    let mut on_cycle = BTreeSet::new();
    for start in blocks.keys() {
        let mut seen: BTreeSet<&BlockId> = BTreeSet::new();
        let mut queue: VecDeque<&BlockId> = blocks[start].successors.iter().collect();
        while let Some(current) = queue.pop_front() {
            if current == start {
                on_cycle.insert(start.clone());
                break;
            }
            if seen.insert(current) {
                queue.extend(blocks[current].successors.iter());
            }
        }
    }
    on_cycle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BlockId {
        BlockId::new(s)
    }

    fn span(name: &str, start: u32, end: u32) -> (BlockId, Location, Location) {
        (id(name), Location::new(start), Location::new(end))
    }

    #[test]
    fn connect_links_sequential_blocks() {
        let graph =
            BlockGraph::connect([span("A", 0, 1), span("B", 1, 2)], Location::new(0)).unwrap();
        assert_eq!(graph.root(), &id("A"));
        let a = graph.get(&id("A")).unwrap();
        let b = graph.get(&id("B")).unwrap();
        assert!(a.is_successor(&id("B")));
        assert!(b.is_predecessor(&id("A")));
        assert!(b.loop_predecessors().is_empty());
        assert!(!graph.has_cycles());
    }

    #[test]
    fn connect_marks_back_edges_as_loop_predecessors() {
        // A -> H -> B -> H (loop), H -> X (exit)
        let graph = BlockGraph::connect(
            [
                span("A", 0, 1),
                span("H", 1, 2),
                span("B", 2, 1),
                span("X", 2, 3),
            ],
            Location::new(0),
        )
        .unwrap();
        let head = graph.get(&id("H")).unwrap();
        assert!(head.is_loop_predecessor(&id("B")));
        assert!(!head.is_loop_predecessor(&id("A")));
        assert!(graph.lies_on_cycle(&id("H")));
        assert!(graph.lies_on_cycle(&id("B")));
        assert!(!graph.lies_on_cycle(&id("A")));
        assert!(!graph.lies_on_cycle(&id("X")));
    }

    #[test]
    fn connect_rejects_missing_entry_location() {
        let err = BlockGraph::connect([span("A", 0, 1)], Location::new(7)).unwrap_err();
        assert_eq!(err, ConfigurationError::EntryLocationNotFound(Location::new(7)));
    }

    #[test]
    fn ids_that_would_split_a_visited_trail_are_rejected() {
        let err = BlockGraph::connect([span("a,b", 0, 1)], Location::new(0)).unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidBlockId(id("a,b")));
        let empty = Block::isolated("", Location::new(0), Location::new(1));
        let err = BlockGraph::new([empty]).unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidBlockId(id("")));
    }

    #[test]
    fn new_rejects_duplicate_ids() {
        let a = Block::isolated("A", Location::new(0), Location::new(1));
        let err = BlockGraph::new([a.clone(), a]).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateBlock(id("A")));
    }

    #[test]
    fn new_rejects_dangling_reference() {
        let a = Block::new("A", Location::new(0), Location::new(1), [], [id("Z")], []);
        let err = BlockGraph::new([a]).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownBlock { .. }));
    }

    #[test]
    fn new_rejects_one_sided_edge() {
        let a = Block::new("A", Location::new(0), Location::new(1), [], [id("B")], []);
        let b = Block::isolated("B", Location::new(1), Location::new(2));
        let err = BlockGraph::new([a, b]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::AsymmetricEdge {
                from: id("A"),
                to: id("B")
            }
        );
    }

    #[test]
    fn new_rejects_loop_predecessor_outside_predecessors() {
        let a = Block::new("A", Location::new(0), Location::new(1), [], [], [id("A")]);
        let err = BlockGraph::new([a]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::LoopPredecessorNotPredecessor { .. }
        ));
    }

    #[test]
    fn new_rejects_two_entry_candidates() {
        let a = Block::isolated("A", Location::new(0), Location::new(1));
        let b = Block::isolated("B", Location::new(2), Location::new(3));
        let err = BlockGraph::new([a, b]).unwrap_err();
        assert!(matches!(err, ConfigurationError::AmbiguousEntry(ref ids) if ids.len() == 2));
        assert!(err.to_string().contains("A, B"));
    }

    #[test]
    fn self_loop_block_is_its_own_loop_predecessor() {
        let graph =
            BlockGraph::connect([span("E", 0, 1), span("L", 1, 1)], Location::new(0)).unwrap();
        let l = graph.get(&id("L")).unwrap();
        assert!(l.is_loop_predecessor(&id("L")));
        assert!(graph.lies_on_cycle(&id("L")));
    }

    #[test]
    fn single_block_with_equal_start_and_end_is_root() {
        let graph = BlockGraph::connect([span("S", 4, 4)], Location::new(4)).unwrap();
        // The block links to itself (end == start) and the edge is a back-edge.
        assert_eq!(graph.root(), &id("S"));
        assert!(graph.root_block().is_entry_candidate());
    }
}
