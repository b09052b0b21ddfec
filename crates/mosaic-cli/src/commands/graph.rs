// Command handler for: Graph
//
// Prints the block graph derived from a program model: spans, local edges,
// neighbours and the loop predecessors found from the entry block.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use mosaic_ir::{BlockGraph, ProgramModel};

use super::helpers::{parse_output_format, read_model};
use crate::OutputFormat;

#[derive(Debug, Serialize)]
pub(crate) struct BlockView {
    pub id: String,
    pub start: u32,
    pub end: u32,
    pub root: bool,
    pub on_cycle: bool,
    pub predecessors: Vec<String>,
    pub successors: Vec<String>,
    pub loop_predecessors: Vec<String>,
    pub edges: Vec<String>,
}

pub(crate) fn block_views(model: &ProgramModel, graph: &BlockGraph) -> Vec<BlockView> {
    graph
        .blocks()
        .map(|block| {
            let names = |ids: &std::collections::BTreeSet<mosaic_ir::BlockId>| {
                ids.iter().map(|id| id.as_str().to_string()).collect()
            };
            BlockView {
                id: block.id().as_str().to_string(),
                start: block.start().number(),
                end: block.end().number(),
                root: block.id() == graph.root(),
                on_cycle: graph.lies_on_cycle(block.id()),
                predecessors: names(block.predecessors()),
                successors: names(block.successors()),
                loop_predecessors: names(block.loop_predecessors()),
                edges: model
                    .body(block.id())
                    .map(|body| body.edges.iter().map(ToString::to_string).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

pub(crate) fn render_text(views: &[BlockView]) -> String {
    let mut out = String::new();
    for view in views {
        let marker = if view.root { " (root)" } else { "" };
        let _ = writeln!(out, "block {}{}: {} -> {}", view.id, marker, view.start, view.end);
        for edge in &view.edges {
            let _ = writeln!(out, "  {edge}");
        }
        if !view.predecessors.is_empty() {
            let _ = writeln!(out, "  predecessors: {}", view.predecessors.join(", "));
        }
        if !view.successors.is_empty() {
            let _ = writeln!(out, "  successors: {}", view.successors.join(", "));
        }
        if !view.loop_predecessors.is_empty() {
            let _ = writeln!(out, "  loop predecessors: {}", view.loop_predecessors.join(", "));
        }
    }
    out
}

pub(crate) fn run_graph_command(file: PathBuf, format: String) -> miette::Result<()> {
    let output_format = parse_output_format(&format)?;
    let model = read_model(&file)?;
    let graph = model
        .block_graph()
        .map_err(|e| miette::miette!("Cannot build block graph for {}: {e}", file.display()))?;
    let views = block_views(&model, &graph);
    match output_format {
        OutputFormat::Text => print!("{}", render_text(&views)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&views).unwrap_or_default()
        ),
    }
    Ok(())
}
