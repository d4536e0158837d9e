//! Core graph data structures

mod candidate;
mod edge;
mod ids;
mod node;


pub use candidate::{CandidateEdge, CandidateGraph, CandidateNode};
pub use edge::{Edge, Relation, RelationKind};
pub use ids::{BusinessKey, GraphId};
pub use node::{Node, StoredEmbedding, Topology, TopologyLevel};
