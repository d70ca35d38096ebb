//! Validate command - checks a workflow definition file

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::domain::workflow::{NodeKind, Workflow};

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Path to a workflow definition in JSON
    pub file: PathBuf,
}

pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let workflow = crate::read_workflow_file(&args.file)?;
    workflow
        .validate()
        .with_context(|| format!("{} is not a valid workflow", args.file.display()))?;

    print!("{}", summarize(&workflow));
    Ok(())
}

/// Human-readable graph listing, nodes in traversal order from the start node
fn summarize(workflow: &Workflow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Workflow '{}' ({}) is valid", workflow.id(), workflow.name());
    let _ = writeln!(out, "Start: {}", workflow.start_node_id());

    let order = workflow.traversal();
    for (i, id) in order.iter().enumerate() {
        let Some(node) = workflow.node(id) else {
            continue;
        };

        let _ = write!(out, "{:>3}. {} [{}]", i + 1, id, node.node_type().as_str());
        if let NodeKind::Gather(gather) = node.kind() {
            let fields: Vec<&str> = gather.schema.fields.iter().map(|f| f.name.as_str()).collect();
            let _ = write!(out, " fields={}", fields.join(","));
        }
        match node.next_node_id() {
            Some(next) => {
                let _ = write!(out, " -> {}", next);
            }
            None => {
                let _ = write!(out, " (end)");
            }
        }
        if let NodeKind::Gather(gather) = node.kind() {
            if let Some(fallback) = &gather.fallback_node_id {
                let _ = write!(out, " fallback -> {}", fallback);
            }
        }
        out.push('\n');
    }

    let unreachable = workflow.nodes().len().saturating_sub(order.len());
    if unreachable > 0 {
        let _ = writeln!(out, "Warning: {} node(s) unreachable from the start node", unreachable);
    }

    out
}
