//! Prerequisite edges and the relation kinds that produce them

use super::ids::BusinessKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant of a relation, persisted alongside each edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `from` must be understood before `to`
    Prerequisite,
    /// `parent` is a broader topic containing `child`
    Hierarchy,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Prerequisite => "prerequisite",
            RelationKind::Hierarchy => "hierarchy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prerequisite" => Some(RelationKind::Prerequisite),
            "hierarchy" => Some(RelationKind::Hierarchy),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate relation between two concepts
///
/// Hierarchy relations are named by parent/child rather than source/target;
/// both kinds persist as a directed arc (see [`Relation::arc`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    Prerequisite { from: BusinessKey, to: BusinessKey },
    Hierarchy { parent: BusinessKey, child: BusinessKey },
}

impl Relation {
    pub fn prerequisite(from: impl Into<BusinessKey>, to: impl Into<BusinessKey>) -> Self {
        Relation::Prerequisite {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn hierarchy(parent: impl Into<BusinessKey>, child: impl Into<BusinessKey>) -> Self {
        Relation::Hierarchy {
            parent: parent.into(),
            child: child.into(),
        }
    }

    pub fn kind(&self) -> RelationKind {
        match self {
            Relation::Prerequisite { .. } => RelationKind::Prerequisite,
            Relation::Hierarchy { .. } => RelationKind::Hierarchy,
        }
    }

    /// The persisted arc `(from, to)`. Hierarchy persists as `parent -> child`.
    pub fn arc(&self) -> (&BusinessKey, &BusinessKey) {
        match self {
            Relation::Prerequisite { from, to } => (from, to),
            Relation::Hierarchy { parent, child } => (parent, child),
        }
    }

    /// Rewrite both endpoints through `f`.
    pub fn map_endpoints(&self, mut f: impl FnMut(&BusinessKey) -> BusinessKey) -> Self {
        match self {
            Relation::Prerequisite { from, to } => Relation::Prerequisite {
                from: f(from),
                to: f(to),
            },
            Relation::Hierarchy { parent, child } => Relation::Hierarchy {
                parent: f(parent),
                child: f(child),
            },
        }
    }

    /// True when both endpoints are the same key.
    pub fn is_self_loop(&self) -> bool {
        let (from, to) = self.arc();
        from == to
    }
}

/// A persisted directed prerequisite edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: BusinessKey,
    pub to: BusinessKey,
    pub kind: RelationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Create a new edge from a relation
    pub fn from_relation(relation: &Relation, weight: Option<f32>) -> Self {
        let (from, to) = relation.arc();
        Self {
            from: from.clone(),
            to: to.clone(),
            kind: relation.kind(),
            weight,
            created_at: Utc::now(),
        }
    }

    /// Reconstruct the relation this edge was persisted from
    pub fn relation(&self) -> Relation {
        match self.kind {
            RelationKind::Prerequisite => Relation::prerequisite(self.from.clone(), self.to.clone()),
            RelationKind::Hierarchy => Relation::hierarchy(self.from.clone(), self.to.clone()),
        }
    }
}
