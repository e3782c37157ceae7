//! Execution-order resolution for enabled passes.
//!
//! Dependencies and conflicts both become `before -> after` edges in one
//! directed graph. A cycle fails the run before any mutation; otherwise the
//! order is a topological sort with ties broken by descending priority and
//! then registration order.

use crate::{Error, Pass, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// Resolves a valid execution order over `passes`, returned as indices into
/// the input slice.
pub fn execution_order(passes: &[Box<dyn Pass>]) -> Result<Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut nodes: Vec<NodeIndex> = Vec::with_capacity(passes.len());
    let mut by_id: HashMap<&str, NodeIndex> = HashMap::new();

    for (index, pass) in passes.iter().enumerate() {
        let node = graph.add_node(index);
        if by_id.insert(pass.id(), node).is_some() {
            return Err(Error::Configuration(format!(
                "duplicate pass id '{}'",
                pass.id()
            )));
        }
        nodes.push(node);
    }

    for (index, pass) in passes.iter().enumerate() {
        for dependency in pass.dependencies() {
            let Some(&dep_node) = by_id.get(dependency) else {
                return Err(Error::UnknownDependency {
                    pass: pass.id().to_string(),
                    dependency: dependency.to_string(),
                });
            };
            graph.add_edge(dep_node, nodes[index], ());
        }
        // A conflicting pass, when present, executes first.
        for conflict in pass.conflicts_with() {
            if let Some(&conflict_node) = by_id.get(conflict) {
                graph.add_edge(conflict_node, nodes[index], ());
            }
        }
    }

    if let Some(cycle) = find_cycle(&graph) {
        let names: Vec<&str> = cycle.iter().map(|&n| passes[graph[n]].id()).collect();
        return Err(Error::DependencyCycle(names.join(" -> ")));
    }

    let order = priority_topo(&graph, passes);
    debug!(
        "resolved execution order: {:?}",
        order.iter().map(|&i| passes[i].id()).collect::<Vec<_>>()
    );
    Ok(order)
}

/// Depth-first walk tracking an explicit recursion stack. Returns the nodes
/// of the first cycle found, in walk order.
fn find_cycle(graph: &DiGraph<usize, ()>) -> Option<Vec<NodeIndex>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks = vec![Mark::White; graph.node_count()];
    let mut stack: Vec<NodeIndex> = Vec::new();

    fn visit(
        graph: &DiGraph<usize, ()>,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        marks[node.index()] = Mark::Grey;
        stack.push(node);
        for next in graph.neighbors(node) {
            match marks[next.index()] {
                Mark::Grey => {
                    // Slice the stack from the first occurrence of `next`.
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::White => {
                    if let Some(cycle) = visit(graph, next, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }
        stack.pop();
        marks[node.index()] = Mark::Black;
        None
    }

    for node in graph.node_indices() {
        if marks[node.index()] == Mark::White {
            if let Some(cycle) = visit(graph, node, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm over the acyclic graph; the ready set is a max-heap on
/// (priority, earliest registration).
fn priority_topo(graph: &DiGraph<usize, ()>, passes: &[Box<dyn Pass>]) -> Vec<usize> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, petgraph::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<(i32, Reverse<usize>, NodeIndex)> = graph
        .node_indices()
        .filter(|n| in_degree[n] == 0)
        .map(|n| (passes[graph[n]].priority(), Reverse(graph[n]), n))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((_, _, node)) = ready.pop() {
        order.push(graph[node]);
        for next in graph.neighbors(node) {
            let degree = in_degree.get_mut(&next).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push((passes[graph[next]].priority(), Reverse(graph[next]), next));
            }
        }
    }
    order
}
