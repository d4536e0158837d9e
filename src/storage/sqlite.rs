//! SQLite storage backend

use super::traits::{GraphSnapshot, GraphStore, InsertOutcome, OpenStore, StorageError, StorageResult};
use crate::graph::{BusinessKey, Edge, GraphId, Node, RelationKind, StoredEmbedding, Topology, TopologyLevel};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SQLite-backed graph store
///
/// Uses a single SQLite database file with tables for graphs, nodes, and
/// edges. Thread-safe via internal mutex on the connection.
///
/// Uniqueness of node keys and of `(from, to)` pairs is enforced by primary
/// keys, so inserts use `INSERT OR IGNORE` and replays are no-ops; a
/// self-loop is skipped the same way. Edge endpoints reference nodes of the
/// same graph, and a dangling endpoint fails the whole batch.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Graphs table
            CREATE TABLE IF NOT EXISTS graphs (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            -- Nodes table; topology columns are a cache rewritten after each build
            CREATE TABLE IF NOT EXISTS nodes (
                graph_id TEXT NOT NULL,
                key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                description TEXT,
                embedding BLOB,
                embedding_model_version TEXT,
                created_at TEXT NOT NULL,
                level INTEGER,
                dependents_count INTEGER,
                PRIMARY KEY (graph_id, key),
                FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
            );

            -- Edges table; one row per (from, to) pair regardless of kind
            CREATE TABLE IF NOT EXISTS edges (
                graph_id TEXT NOT NULL,
                from_key TEXT NOT NULL,
                to_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                weight REAL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (graph_id, from_key, to_key),
                CHECK (from_key <> to_key),
                FOREIGN KEY (graph_id, from_key) REFERENCES nodes(graph_id, key) ON DELETE CASCADE,
                FOREIGN KEY (graph_id, to_key) REFERENCES nodes(graph_id, key) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(graph_id, to_key);

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }

    /// Deserialize a node from database columns
    #[allow(clippy::too_many_arguments)]
    fn row_to_node(
        key: String,
        display_name: String,
        description: Option<String>,
        embedding: Option<Vec<u8>>,
        embedding_model_version: Option<String>,
        created_at: String,
        level: Option<i64>,
        dependents_count: Option<i64>,
    ) -> StorageResult<Node> {
        let embedding = match embedding {
            Some(blob) => Some(decode_embedding(&blob).ok_or_else(|| StorageError::Corrupt {
                key: key.clone(),
                reason: format!("embedding blob of {} bytes", blob.len()),
            })?),
            None => None,
        };
        let topology = match (level, dependents_count) {
            (Some(level), Some(dependents_count)) => Some(Topology {
                level: level.max(0) as usize,
                dependents_count: dependents_count.max(0) as usize,
            }),
            _ => None,
        };

        Ok(Node {
            key: BusinessKey::from_string(key),
            display_name,
            description,
            embedding,
            embedding_model_version,
            created_at: Self::parse_timestamp(&created_at)?,
            topology,
        })
    }

    /// Deserialize an edge from database columns
    fn row_to_edge(
        from_key: String,
        to_key: String,
        kind: String,
        weight: Option<f64>,
        created_at: String,
    ) -> StorageResult<Edge> {
        let kind = RelationKind::parse(&kind).ok_or_else(|| StorageError::Corrupt {
            key: format!("{}->{}", from_key, to_key),
            reason: format!("unknown relation kind '{}'", kind),
        })?;
        Ok(Edge {
            from: BusinessKey::from_string(from_key),
            to: BusinessKey::from_string(to_key),
            kind,
            weight: weight.map(|w| w as f32),
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }
}

/// Embeddings are stored as little-endian f32 blobs.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl GraphStore for SqliteStore {
    // === Graph Operations ===

    fn list_graphs(&self) -> StorageResult<Vec<GraphId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM graphs ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(GraphId::from_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn load_graph(&self, graph_id: &GraphId) -> StorageResult<GraphSnapshot> {
        let conn = self.conn()?;

        // Load nodes
        let mut stmt = conn.prepare(
            "SELECT key, display_name, description, embedding, embedding_model_version,
                    created_at, level, dependents_count
             FROM nodes WHERE graph_id = ?1 ORDER BY rowid",
        )?;
        let nodes_iter = stmt.query_map(params![graph_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in nodes_iter {
            let (key, name, description, embedding, version, created, level, dependents) = row?;
            nodes.push(Self::row_to_node(key, name, description, embedding, version, created, level, dependents)?);
        }

        // Load edges
        let mut stmt = conn.prepare(
            "SELECT from_key, to_key, kind, weight, created_at
             FROM edges WHERE graph_id = ?1 ORDER BY rowid",
        )?;
        let edges_iter = stmt.query_map(params![graph_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in edges_iter {
            let (from, to, kind, weight, created) = row?;
            edges.push(Self::row_to_edge(from, to, kind, weight, created)?);
        }

        Ok(GraphSnapshot { nodes, edges })
    }

    fn load_embeddings(&self, graph_id: &GraphId) -> StorageResult<Vec<StoredEmbedding>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, embedding, embedding_model_version
             FROM nodes WHERE graph_id = ?1 AND embedding IS NOT NULL ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![graph_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (key, blob, model_version) = row?;
            let embedding = decode_embedding(&blob).ok_or_else(|| StorageError::Corrupt {
                key: key.clone(),
                reason: format!("embedding blob of {} bytes", blob.len()),
            })?;
            embeddings.push(StoredEmbedding {
                key: BusinessKey::from_string(key),
                embedding,
                model_version,
            });
        }
        Ok(embeddings)
    }

    // === Writes ===

    fn insert_batch(&self, graph_id: &GraphId, nodes: &[Node], edges: &[Edge]) -> StorageResult<InsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut outcome = InsertOutcome::default();

        tx.execute(
            "INSERT OR IGNORE INTO graphs (id, created_at) VALUES (?1, ?2)",
            params![graph_id.as_str(), Utc::now().to_rfc3339()],
        )?;

        {
            let mut insert_node = tx.prepare(
                "INSERT OR IGNORE INTO nodes
                    (graph_id, key, display_name, description, embedding, embedding_model_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for node in nodes {
                outcome.nodes_inserted += insert_node.execute(params![
                    graph_id.as_str(),
                    node.key.as_str(),
                    node.display_name,
                    node.description,
                    node.embedding.as_deref().map(encode_embedding),
                    node.embedding_model_version,
                    node.created_at.to_rfc3339(),
                ])?;
            }

            let mut insert_edge = tx.prepare(
                "INSERT OR IGNORE INTO edges (graph_id, from_key, to_key, kind, weight, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for edge in edges {
                outcome.edges_inserted += insert_edge.execute(params![
                    graph_id.as_str(),
                    edge.from.as_str(),
                    edge.to.as_str(),
                    edge.kind.as_str(),
                    edge.weight.map(f64::from),
                    edge.created_at.to_rfc3339(),
                ])?;
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;

        debug!(
            graph_id = %graph_id,
            nodes_inserted = outcome.nodes_inserted,
            edges_inserted = outcome.edges_inserted,
            "batch committed"
        );
        Ok(outcome)
    }

    fn write_topology(&self, graph_id: &GraphId, levels: &[TopologyLevel]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut update = tx.prepare(
                "UPDATE nodes SET level = ?3, dependents_count = ?4 WHERE graph_id = ?1 AND key = ?2",
            )?;
            for level in levels {
                update.execute(params![
                    graph_id.as_str(),
                    level.key.as_str(),
                    level.level as i64,
                    level.dependents_count as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_embeddings(&self, graph_id: &GraphId, embeddings: &[StoredEmbedding]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut update = tx.prepare(
                "UPDATE nodes SET embedding = ?3, embedding_model_version = ?4
                 WHERE graph_id = ?1 AND key = ?2",
            )?;
            for stored in embeddings {
                updated += update.execute(params![
                    graph_id.as_str(),
                    stored.key.as_str(),
                    encode_embedding(&stored.embedding),
                    stored.model_version,
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Relation;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn graph() -> GraphId {
        GraphId::from("calculus")
    }

    fn node(key: &str) -> Node {
        Node::new(BusinessKey::from(key), key.to_uppercase())
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::from_relation(&Relation::prerequisite(from, to), None)
    }

    // ========================================================================
    // Graph lifecycle
    // ========================================================================

    #[test]
    fn test_empty_batch_registers_graph() {
        let store = create_test_store();
        store.insert_batch(&GraphId::from("b"), &[], &[]).unwrap();
        store.insert_batch(&GraphId::from("a"), &[], &[]).unwrap();
        store.insert_batch(&GraphId::from("a"), &[], &[]).unwrap();

        let ids = store.list_graphs().unwrap();
        assert_eq!(ids, vec![GraphId::from("a"), GraphId::from("b")]);
    }

    #[test]
    fn test_missing_graph_loads_empty() {
        let store = create_test_store();
        let snapshot = store.load_graph(&GraphId::from("nope")).unwrap();
        assert!(snapshot.is_empty());
    }

    // ========================================================================
    // Batch inserts
    // ========================================================================

    #[test]
    fn test_insert_and_load_batch() {
        let store = create_test_store();
        let nodes = vec![
            node("limits").with_description("approaching a value"),
            node("derivatives").with_embedding(vec![0.25, -1.5, 3.0], "mock-v1"),
        ];
        let weighted = Edge::from_relation(&Relation::hierarchy("limits", "derivatives"), Some(0.5));

        let outcome = store.insert_batch(&graph(), &nodes, &[weighted]).unwrap();
        assert_eq!(outcome, InsertOutcome { nodes_inserted: 2, edges_inserted: 1 });

        let snapshot = store.load_graph(&graph()).unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[0].key.as_str(), "limits");
        assert_eq!(snapshot.nodes[0].description.as_deref(), Some("approaching a value"));
        assert_eq!(snapshot.nodes[1].embedding, Some(vec![0.25, -1.5, 3.0]));
        assert_eq!(snapshot.nodes[1].embedding_model_version.as_deref(), Some("mock-v1"));
        assert!(snapshot.nodes[0].topology.is_none());

        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].kind, RelationKind::Hierarchy);
        assert_eq!(snapshot.edges[0].weight, Some(0.5));
        assert!(store.list_graphs().unwrap().contains(&graph()));
    }

    #[test]
    fn test_replayed_batch_is_a_no_op() {
        let store = create_test_store();
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b")];

        store.insert_batch(&graph(), &nodes, &edges).unwrap();
        let replay = store.insert_batch(&graph(), &nodes, &edges).unwrap();

        assert_eq!(replay, InsertOutcome::default());
        let snapshot = store.load_graph(&graph()).unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[test]
    fn test_pair_is_unique_regardless_of_kind() {
        let store = create_test_store();
        let hierarchy = Edge::from_relation(&Relation::hierarchy("a", "b"), None);
        let outcome = store
            .insert_batch(&graph(), &[node("a"), node("b")], &[edge("a", "b"), hierarchy])
            .unwrap();
        assert_eq!(outcome.edges_inserted, 1);
    }

    #[test]
    fn test_dangling_edge_rolls_back_batch() {
        let store = create_test_store();
        let result = store.insert_batch(&graph(), &[node("a")], &[edge("a", "ghost")]);

        assert!(matches!(result, Err(StorageError::Database(_))));
        let snapshot = store.load_graph(&graph()).unwrap();
        assert!(snapshot.nodes.is_empty(), "node insert must be rolled back");
    }

    #[test]
    fn test_self_loop_is_skipped() {
        let store = create_test_store();
        let outcome = store.insert_batch(&graph(), &[node("a")], &[edge("a", "a")]).unwrap();
        assert_eq!(outcome, InsertOutcome { nodes_inserted: 1, edges_inserted: 0 });
    }

    #[test]
    fn test_graphs_are_isolated() {
        let store = create_test_store();
        store.insert_batch(&GraphId::from("one"), &[node("a")], &[]).unwrap();
        store.insert_batch(&GraphId::from("two"), &[node("a"), node("b")], &[]).unwrap();

        assert_eq!(store.load_graph(&GraphId::from("one")).unwrap().nodes.len(), 1);
        assert_eq!(store.load_graph(&GraphId::from("two")).unwrap().nodes.len(), 2);
    }

    // ========================================================================
    // Derived data rewrites
    // ========================================================================

    #[test]
    fn test_write_topology() {
        let store = create_test_store();
        store.insert_batch(&graph(), &[node("a"), node("b")], &[edge("a", "b")]).unwrap();

        store
            .write_topology(
                &graph(),
                &[
                    TopologyLevel { key: BusinessKey::from("a"), level: 0, dependents_count: 1 },
                    TopologyLevel { key: BusinessKey::from("b"), level: 1, dependents_count: 0 },
                ],
            )
            .unwrap();

        let snapshot = store.load_graph(&graph()).unwrap();
        assert_eq!(snapshot.nodes[0].topology, Some(Topology { level: 0, dependents_count: 1 }));
        assert_eq!(snapshot.nodes[1].topology, Some(Topology { level: 1, dependents_count: 0 }));
    }

    #[test]
    fn test_load_and_update_embeddings() {
        let store = create_test_store();
        store
            .insert_batch(&graph(), &[node("a").with_embedding(vec![1.0, 0.0], "old"), node("b")], &[])
            .unwrap();

        let before = store.load_embeddings(&graph()).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].model_version.as_deref(), Some("old"));

        let updated = store
            .update_embeddings(
                &graph(),
                &[
                    StoredEmbedding {
                        key: BusinessKey::from("a"),
                        embedding: vec![0.0, 1.0],
                        model_version: Some("new".to_string()),
                    },
                    StoredEmbedding {
                        key: BusinessKey::from("b"),
                        embedding: vec![0.5, 0.5],
                        model_version: Some("new".to_string()),
                    },
                ],
            )
            .unwrap();
        assert_eq!(updated, 2);

        let after = store.load_embeddings(&graph()).unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|e| e.model_version.as_deref() == Some("new")));
        assert_eq!(after[0].embedding, vec![0.0, 1.0]);
    }

    #[test]
    fn test_embedding_blob_encoding() {
        let values = vec![1.0f32, -0.5, f32::MAX];
        assert_eq!(decode_embedding(&encode_embedding(&values)), Some(values));
        assert_eq!(decode_embedding(&[0, 1, 2]), None);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graphs.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_batch(&graph(), &[node("a")], &[]).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load_graph(&graph()).unwrap().nodes.len(), 1);
    }
}
