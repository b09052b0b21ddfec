//! Program model: blocks with their local control-flow edges.
//!
//! The model is the input format of the `mosaic` tool. It lists the already
//! decomposed blocks of a program together with the CFA edges each block
//! owns, the program entry location, and the error locations that define the
//! safety property.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::block_graph::{BlockGraph, BlockId, ConfigurationError, Location};

/// Comparison operator of an assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cmp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Eq => "==",
            Cmp::Ge => ">=",
            Cmp::Gt => ">",
        };
        f.write_str(s)
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Const(i64),
    Var {
        name: String,
        #[serde(default)]
        offset: i64,
    },
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(c) => write!(f, "{c}"),
            Term::Var { name, offset: 0 } => write!(f, "{name}"),
            Term::Var { name, offset } if *offset < 0 => write!(f, "{name} - {}", -offset),
            Term::Var { name, offset } => write!(f, "{name} + {offset}"),
        }
    }
}

/// Effect of a CFA edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Assign {
        var: String,
        value: Term,
    },
    Assume {
        var: String,
        cmp: Cmp,
        value: i64,
    },
    Havoc {
        var: String,
    },
    Skip,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Assign { var, value } => write!(f, "{var} := {value}"),
            Operation::Assume { var, cmp, value } => write!(f, "assume {var} {cmp} {value}"),
            Operation::Havoc { var } => write!(f, "havoc {var}"),
            Operation::Skip => f.write_str("skip"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CfaEdge {
    pub from: Location,
    pub to: Location,
    pub op: Operation,
}

impl CfaEdge {
    pub fn new(from: u32, to: u32, op: Operation) -> Self {
        Self {
            from: Location::new(from),
            to: Location::new(to),
            op,
        }
    }
}

impl fmt::Display for CfaEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.op)
    }
}

/// Body of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub id: BlockId,
    pub start: Location,
    pub end: Location,
    #[serde(default)]
    pub edges: Vec<CfaEdge>,
}

impl BlockBody {
    /// Locations touched by the block, including start and end.
    pub fn locations(&self) -> BTreeSet<Location> {
        let mut locations: BTreeSet<Location> = self
            .edges
            .iter()
            .flat_map(|e| [e.from, e.to])
            .collect();
        locations.insert(self.start);
        locations.insert(self.end);
        locations
    }

    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        for edge in &self.edges {
            match &edge.op {
                Operation::Assign { var, value } => {
                    vars.insert(var.clone());
                    if let Term::Var { name, .. } = value {
                        vars.insert(name.clone());
                    }
                }
                Operation::Assume { var, .. } | Operation::Havoc { var } => {
                    vars.insert(var.clone());
                }
                Operation::Skip => {}
            }
        }
        vars
    }
}

/// A decomposed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramModel {
    #[serde(default)]
    pub name: Option<String>,
    pub entry: Location,
    #[serde(default)]
    pub error_locations: BTreeSet<Location>,
    pub blocks: Vec<BlockBody>,
}

impl ProgramModel {
    pub fn from_json(raw: &str) -> Result<Self, ConfigurationError> {
        let model: ProgramModel =
            serde_json::from_str(raw).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigurationError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigurationError::Malformed(e.to_string()))
    }

    /// Check that no edge leaves a block through its end location.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for body in &self.blocks {
            for edge in &body.edges {
                if edge.from == body.end && body.start != body.end {
                    return Err(ConfigurationError::Malformed(format!(
                        "block '{}' has edge {edge} leaving its end location",
                        body.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn block_graph(&self) -> Result<BlockGraph, ConfigurationError> {
        BlockGraph::connect(
            self.blocks
                .iter()
                .map(|b| (b.id.clone(), b.start, b.end)),
            self.entry,
        )
    }

    pub fn body(&self, id: &BlockId) -> Option<&BlockBody> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub fn is_error_location(&self, location: Location) -> bool {
        self.error_locations.contains(&location)
    }
}
