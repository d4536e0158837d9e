//! Topology analysis over prerequisite adjacency maps
//!
//! Pure algorithms, no I/O: reachability, cycle pre-checks, Kahn leveling,
//! degree counts, orphan detection and DAG validation.
//!
//! Every function that takes a node set works on the graph *restricted* to
//! that set: arcs whose source or target is outside the set are ignored.

use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Directed adjacency: source key -> target keys.
pub type Adjacency = HashMap<String, Vec<String>>;

/// Maximum number of unprocessed keys carried by [`TopologyError::CycleDetected`].
pub const CYCLE_SAMPLE_LIMIT: usize = 5;

/// Errors from topology computations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("cycle detected among nodes: {}", sample.join(", "))]
    CycleDetected {
        /// Up to five nodes that could not be leveled
        sample: Vec<String>,
    },
}

/// Result type for topology computations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Build an adjacency map from `(from, to)` arcs.
pub fn adjacency_from_arcs<I, S>(arcs: I) -> Adjacency
where
    I: IntoIterator<Item = (S, S)>,
    S: Into<String>,
{
    let mut adj = Adjacency::new();
    for (from, to) in arcs {
        adj.entry(from.into()).or_default().push(to.into());
    }
    adj
}

/// True if `target` can be reached from `start`. Trivially true when equal.
///
/// Iterative DFS with an explicit stack, O(V+E).
pub fn reachable(adj: &Adjacency, start: &str, target: &str) -> bool {
    if start == target {
        return true;
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    visited.insert(start);

    while let Some(current) = stack.pop() {
        let Some(neighbors) = adj.get(current) else {
            continue;
        };
        for next in neighbors {
            if next == target {
                return true;
            }
            if visited.insert(next.as_str()) {
                stack.push(next.as_str());
            }
        }
    }

    false
}

/// True if adding the arc `from -> to` would close a cycle.
pub fn would_create_cycle(adj: &Adjacency, from: &str, to: &str) -> bool {
    from == to || reachable(adj, to, from)
}

/// In-degrees of `nodes`, counting only arcs with both endpoints in `nodes`.
fn restricted_in_degree<'a>(nodes: &'a HashSet<String>, adj: &Adjacency) -> HashMap<&'a str, usize> {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    for (from, targets) in adj {
        if !nodes.contains(from) {
            continue;
        }
        for to in targets {
            if let Some(count) = in_degree.get_mut(to.as_str()) {
                *count += 1;
            }
        }
    }
    in_degree
}

/// Assign a level to every node with Kahn's algorithm.
///
/// Level 0 goes to nodes with no incoming arcs inside `nodes`; every other
/// node gets `1 + max(level of its prerequisites)`. Fails with
/// [`TopologyError::CycleDetected`] if the restricted graph has a cycle.
pub fn compute_levels(nodes: &HashSet<String>, adj: &Adjacency) -> TopologyResult<HashMap<String, usize>> {
    let mut remaining = restricted_in_degree(nodes, adj);

    let mut seeds: Vec<&str> = remaining
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(node, _)| *node)
        .collect();
    seeds.sort_unstable();

    let mut levels: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
    let mut queue: VecDeque<&str> = VecDeque::new();
    for node in seeds {
        levels.insert(node.to_string(), 0);
        queue.push_back(node);
    }

    let mut processed = 0usize;
    while let Some(current) = queue.pop_front() {
        processed += 1;
        let level = levels[current];

        let Some(targets) = adj.get(current) else {
            continue;
        };
        for next in targets {
            let Some(count) = remaining.get_mut(next.as_str()) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                // BFS order: every prerequisite of `next` was dequeued at a
                // level <= `level`, so this is 1 + max.
                levels.insert(next.clone(), level + 1);
                queue.push_back(next.as_str());
            }
        }
    }

    if processed < nodes.len() {
        let mut sample: Vec<String> = nodes
            .iter()
            .filter(|n| !levels.contains_key(n.as_str()))
            .cloned()
            .collect();
        sample.sort_unstable();
        sample.truncate(CYCLE_SAMPLE_LIMIT);
        return Err(TopologyError::CycleDetected { sample });
    }

    Ok(levels)
}

/// Out-degree of every node in `nodes`, restricted to `nodes`.
pub fn compute_out_degree(nodes: &HashSet<String>, adj: &Adjacency) -> HashMap<String, usize> {
    nodes
        .iter()
        .map(|node| {
            let degree = adj
                .get(node)
                .map_or(0, |targets| targets.iter().filter(|t| nodes.contains(*t)).count());
            (node.clone(), degree)
        })
        .collect()
}

/// Nodes with neither incoming nor outgoing arcs inside `nodes`.
pub fn find_orphans(nodes: &HashSet<String>, adj: &Adjacency) -> HashSet<String> {
    let in_degree = restricted_in_degree(nodes, adj);
    let out_degree = compute_out_degree(nodes, adj);
    nodes
        .iter()
        .filter(|n| in_degree.get(n.as_str()) == Some(&0) && out_degree.get(*n) == Some(&0))
        .cloned()
        .collect()
}

/// Outcome of [`validate_dag`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagValidation {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Validate that `adj` over `nodes` is a well-formed DAG.
///
/// Accumulates every self-loop and every arc touching an unknown node. The
/// acyclicity check runs only when no structural error was found, so that a
/// malformed arc is never reported as a cycle.
pub fn validate_dag(nodes: &HashSet<String>, adj: &Adjacency) -> DagValidation {
    let mut errors = Vec::new();

    let mut sources: Vec<&String> = adj.keys().collect();
    sources.sort_unstable();

    for from in sources {
        for to in &adj[from] {
            if from == to {
                errors.push(format!("self-loop on '{}'", from));
            }
            if !nodes.contains(from) {
                errors.push(format!("edge '{}' -> '{}' references unknown node '{}'", from, to, from));
            }
            if !nodes.contains(to) {
                errors.push(format!("edge '{}' -> '{}' references unknown node '{}'", from, to, to));
            }
        }
    }

    if errors.is_empty() {
        if let Err(e) = compute_levels(nodes, adj) {
            errors.push(e.to_string());
        }
    }

    DagValidation {
        ok: errors.is_empty(),
        errors,
    }
}
