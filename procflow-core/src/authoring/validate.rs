use super::dto::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

fn err(rule: &str, message: String) -> ValidationError {
    ValidationError {
        rule: rule.to_string(),
        message,
    }
}

/// Validate a ProcessDefinitionDto before it becomes executable. Returns all
/// errors found.
pub fn validate_dto(dto: &ProcessDefinitionDto) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V0: Key must be non-empty
    if dto.key.trim().is_empty() {
        errors.push(err("V0", "Process key is empty".to_string()));
    }

    // V1: Node IDs must be unique and non-empty
    let mut node_map: HashMap<&str, &NodeDto> = HashMap::new();
    for node in &dto.nodes {
        let id = node.id();
        if id.trim().is_empty() {
            errors.push(err("V1", "Node with empty id".to_string()));
        } else if node_map.insert(id, node).is_some() {
            errors.push(err("V1", format!("Duplicate node id: {}", id)));
        }
    }

    // V2: Edges reference known nodes; edge ids are unique
    let mut edge_ids = HashSet::new();
    for edge in &dto.edges {
        for (field, reference) in [("from", &edge.from), ("to", &edge.to)] {
            if !node_map.contains_key(reference.as_str()) {
                errors.push(err(
                    "V2",
                    format!("Edge references unknown node: {} ({})", reference, field),
                ));
            }
        }
        if !edge_ids.insert(edge.edge_id()) {
            errors.push(err("V2", format!("Duplicate edge id: {}", edge.edge_id())));
        }
    }

    // V3: Exactly one Start node
    let starts: Vec<&NodeDto> = dto.nodes.iter().filter(|n| n.is_start()).collect();
    if starts.len() != 1 {
        errors.push(err(
            "V3",
            format!("Expected exactly one Start node, found {}", starts.len()),
        ));
    }

    // V4: At least one End node
    if !dto.nodes.iter().any(|n| n.is_end()) {
        errors.push(err("V4", "No End node found".to_string()));
    }

    let mut outgoing: HashMap<&str, Vec<&EdgeDto>> = HashMap::new();
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for edge in &dto.edges {
        outgoing.entry(edge.from.as_str()).or_default().push(edge);
        *incoming.entry(edge.to.as_str()).or_default() += 1;
    }

    for node in &dto.nodes {
        let id = node.id();
        let out_edges = outgoing.get(id).map(Vec::as_slice).unwrap_or_default();

        // V5: Start has no incoming edges, End has no outgoing edges
        if node.is_start() && incoming.get(id).copied().unwrap_or(0) > 0 {
            errors.push(err("V5", format!("Start node {} has incoming edges", id)));
        }
        if node.is_end() && !out_edges.is_empty() {
            errors.push(err("V5", format!("End node {} has outgoing edges", id)));
        }

        // V6: Every non-End node has somewhere to go
        if !node.is_end() && out_edges.is_empty() {
            errors.push(err("V6", format!("Node {} has no outgoing edge", id)));
        }

        // V8: Outside a parallel fork, at most one unconditional (default) edge
        if !node.is_fork() {
            let unconditional = out_edges.iter().filter(|e| e.condition.is_none()).count();
            if unconditional > 1 {
                errors.push(err(
                    "V8",
                    format!(
                        "Node {}: at most one unconditional/default outgoing edge allowed, found {}",
                        id, unconditional
                    ),
                ));
            }
        }

        // V9: Service tasks name a handler
        if let NodeDto::ServiceTask { handler, .. } = node {
            if handler.trim().is_empty() {
                errors.push(err("V9", format!("ServiceTask {} has no handler", id)));
            }
        }
    }

    // V7: An edge is either conditional or default, never both
    for edge in &dto.edges {
        if edge.condition.is_some() && edge.is_default {
            errors.push(err(
                "V7",
                format!(
                    "Edge {}→{}: condition and is_default are mutually exclusive",
                    edge.from, edge.to
                ),
            ));
        }
    }

    // Reachability needs a well-formed graph
    if errors.is_empty() {
        errors.extend(validate_reachability(dto));
    }

    errors
}

/// V10: every node reachable from Start. V11: every non-End node reaches an End.
fn validate_reachability(dto: &ProcessDefinitionDto) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for node in &dto.nodes {
        index.insert(node.id(), graph.add_node(node.id()));
    }
    for edge in &dto.edges {
        graph.add_edge(index[edge.from.as_str()], index[edge.to.as_str()], ());
    }

    let Some(start) = dto.nodes.iter().find(|n| n.is_start()) else {
        return errors;
    };

    let mut from_start = HashSet::new();
    let mut dfs = Dfs::new(&graph, index[start.id()]);
    while let Some(nx) = dfs.next(&graph) {
        from_start.insert(nx);
    }

    let reversed = Reversed(&graph);
    let mut to_end = HashSet::new();
    let mut ends = dto.nodes.iter().filter(|n| n.is_end()).map(|n| index[n.id()]);
    if let Some(first) = ends.next() {
        let mut dfs = Dfs::new(reversed, first);
        loop {
            while let Some(nx) = dfs.next(reversed) {
                to_end.insert(nx);
            }
            match ends.next() {
                Some(next) => dfs.move_to(next),
                None => break,
            }
        }
    }

    for node in &dto.nodes {
        let nx = index[node.id()];
        if !from_start.contains(&nx) {
            errors.push(err(
                "V10",
                format!("Node {} is not reachable from Start", node.id()),
            ));
        }
        if !to_end.contains(&nx) {
            errors.push(err(
                "V11",
                format!("Node {} cannot reach an End node", node.id()),
            ));
        }
    }

    errors
}
