//! Graph reader: file trees, graph views, node detail and similarity search

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::embedding::cosine_similarity;
use crate::storage::models::EntityKind;
use crate::storage::sqlite::decode_embedding;
use crate::storage::Database;

/// A function or method listed under its file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// A file and its callables, ordered by start line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub path: String,
    pub language: String,
    pub functions: Vec<FunctionSummary>,
}

/// Which subgraph [`GraphReader::get_graph`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphMode {
    /// Files, their callables and DECLARES edges
    Structure,
    /// Callables and the CALLS edges between them
    Calls,
}

impl FromStr for GraphMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structure" => Ok(GraphMode::Structure),
            "calls" => Ok(GraphMode::Calls),
            other => anyhow::bail!("unknown graph type '{}': expected 'structure' or 'calls'", other),
        }
    }
}

impl fmt::Display for GraphMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphMode::Structure => f.write_str("structure"),
            GraphMode::Calls => f.write_str("calls"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    /// The callee name matched several entities
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}

/// Nodes and edges, each unique by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Detail view of a file or entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Names of callees, sorted
    pub calls: Vec<String>,
    /// Names of callers, sorted
    pub called_by: Vec<String>,
}

/// One similarity search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub signature: String,
    pub file_path: String,
    pub repo_id: String,
    pub repo_name: String,
    pub score: f64,
}

/// Deduplicating graph builder
#[derive(Default)]
struct GraphAccumulator {
    graph: GraphData,
    node_ids: HashSet<String>,
    edge_ids: HashSet<String>,
}

impl GraphAccumulator {
    fn node(&mut self, node: GraphNode) {
        if self.node_ids.insert(node.id.clone()) {
            self.graph.nodes.push(node);
        }
    }

    fn edge(&mut self, source: &str, target: &str, edge_type: &str, ambiguous: bool) {
        let id = format!("{}->{}", source, target);
        if self.edge_ids.insert(format!("{}:{}", edge_type, id)) {
            self.graph.edges.push(GraphEdge {
                id,
                source: source.to_string(),
                target: target.to_string(),
                edge_type: edge_type.to_string(),
                ambiguous,
            });
        }
    }
}

fn callable_node(id: String, kind: &str, name: String, signature: String, file_path: String, start_line: u32) -> GraphNode {
    GraphNode {
        id,
        label: name,
        node_type: kind.to_string(),
        properties: json!({
            "signature": signature,
            "filePath": file_path,
            "startLine": start_line,
        }),
    }
}

/// Read-only queries over the graph. Each call uses its own connection.
pub struct GraphReader {
    db: Database,
    min_score: Option<f32>,
}

impl GraphReader {
    /// Create a new graph reader
    pub fn new(db: Database) -> Self {
        Self { db, min_score: None }
    }

    /// Drop similarity hits scoring below `min_score`
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Files of a repository ordered by path, each with its functions and
    /// methods ordered by start line
    pub fn get_file_tree(&self, repo_id: &str) -> Result<Vec<FileNode>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.path, f.language, e.id, e.name, e.kind, e.signature, e.start_line, e.end_line
             FROM edges c
             JOIN files f ON f.id = c.target_id
             LEFT JOIN edges d ON d.source_id = f.id AND d.edge_type = 'DECLARES'
             LEFT JOIN entities e ON e.id = d.target_id AND e.kind IN ('Function', 'Method')
             WHERE c.source_id = ?1 AND c.edge_type = 'CONTAINS'
             ORDER BY f.path, e.start_line, e.name",
        )?;

        let mut rows = stmt.query(params![repo_id])?;
        let mut files: Vec<FileNode> = Vec::new();

        while let Some(row) = rows.next()? {
            let file_id: String = row.get(0)?;
            if files.last().map(|f| f.id != file_id).unwrap_or(true) {
                files.push(FileNode {
                    id: file_id,
                    path: row.get(1)?,
                    language: row.get(2)?,
                    functions: Vec::new(),
                });
            }

            let Some(entity_id) = row.get::<_, Option<String>>(3)? else {
                continue;
            };
            let kind: String = row.get(5)?;
            if let Some(file) = files.last_mut() {
                file.functions.push(FunctionSummary {
                    id: entity_id,
                    name: row.get(4)?,
                    kind: kind.parse()?,
                    signature: row.get(6)?,
                    start_line: row.get(7)?,
                    end_line: row.get(8)?,
                });
            }
        }

        Ok(files)
    }

    /// Graph view of a repository
    pub fn get_graph(&self, repo_id: &str, mode: GraphMode) -> Result<GraphData> {
        match mode {
            GraphMode::Structure => self.structure_graph(repo_id),
            GraphMode::Calls => self.call_graph(repo_id),
        }
    }

    fn structure_graph(&self, repo_id: &str) -> Result<GraphData> {
        let mut acc = GraphAccumulator::default();

        for file in self.get_file_tree(repo_id)? {
            acc.node(GraphNode {
                id: file.id.clone(),
                label: file.path.clone(),
                node_type: "File".to_string(),
                properties: json!({ "path": file.path, "language": file.language }),
            });

            for function in file.functions {
                acc.edge(&file.id, &function.id, "DECLARES", false);
                acc.node(callable_node(
                    function.id,
                    function.kind.as_str(),
                    function.name,
                    function.signature,
                    file.path.clone(),
                    function.start_line,
                ));
            }
        }

        Ok(acc.graph)
    }

    fn call_graph(&self, repo_id: &str) -> Result<GraphData> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.kind, e.name, e.signature, e.file_path, e.start_line,
                    t.id, t.kind, t.name, t.signature, t.file_path, t.start_line, k.ambiguous
             FROM edges c
             JOIN files f ON f.id = c.target_id
             JOIN edges d ON d.source_id = f.id AND d.edge_type = 'DECLARES'
             JOIN entities e ON e.id = d.target_id AND e.kind IN ('Function', 'Method')
             LEFT JOIN edges k ON k.source_id = e.id AND k.edge_type = 'CALLS'
             LEFT JOIN entities t ON t.id = k.target_id AND t.kind IN ('Function', 'Method')
             WHERE c.source_id = ?1 AND c.edge_type = 'CONTAINS'
             ORDER BY f.path, e.start_line, t.file_path, t.start_line",
        )?;

        let mut rows = stmt.query(params![repo_id])?;
        let mut acc = GraphAccumulator::default();

        while let Some(row) = rows.next()? {
            let caller_id: String = row.get(0)?;
            let caller_kind: String = row.get(1)?;
            acc.node(callable_node(
                caller_id.clone(),
                &caller_kind,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ));

            let Some(callee_id) = row.get::<_, Option<String>>(6)? else {
                continue;
            };
            let callee_kind: String = row.get(7)?;
            acc.node(callable_node(
                callee_id.clone(),
                &callee_kind,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
            ));
            acc.edge(&caller_id, &callee_id, "CALLS", row.get(12)?);
        }

        Ok(acc.graph)
    }

    /// Detail of a file or entity owned by the repository, `None` if the
    /// id is unknown or belongs to another repository
    pub fn get_node_detail(&self, repo_id: &str, node_id: &str) -> Result<Option<NodeDetail>> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;

        let detail = match file_detail(&tx, repo_id, node_id)? {
            Some(file) => Some(file),
            None => entity_detail(&tx, repo_id, node_id)?,
        };

        tx.commit()?;
        Ok(detail)
    }

    /// Entities with embeddings ranked by cosine similarity to `embedding`,
    /// highest first. `repo_id` restricts the candidates before ranking.
    pub fn vector_search(&self, embedding: &[f32], limit: usize, repo_id: Option<&str>) -> Result<Vec<SearchHit>> {
        if limit == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.kind, e.signature, e.file_path, r.id, r.name, e.embedding
             FROM repositories r
             JOIN edges c ON c.source_id = r.id AND c.edge_type = 'CONTAINS'
             JOIN edges d ON d.source_id = c.target_id AND d.edge_type = 'DECLARES'
             JOIN entities e ON e.id = d.target_id
             WHERE e.embedding IS NOT NULL AND (?1 IS NULL OR r.id = ?1)",
        )?;

        let mut rows = stmt.query(params![repo_id])?;
        let mut hits = Vec::new();

        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(7)?;
            let candidate = decode_embedding(&blob);
            if candidate.len() != embedding.len() {
                continue;
            }

            let score = cosine_similarity(embedding, &candidate);
            if let Some(min) = self.min_score {
                if score < min as f64 {
                    continue;
                }
            }

            let kind: String = row.get(2)?;
            hits.push(SearchHit {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: kind.parse()?,
                signature: row.get(3)?,
                file_path: row.get(4)?,
                repo_id: row.get(5)?,
                repo_name: row.get(6)?,
                score,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn file_detail(tx: &Transaction<'_>, repo_id: &str, node_id: &str) -> Result<Option<NodeDetail>> {
    tx.query_row(
        "SELECT f.id, f.path, f.language FROM edges c
         JOIN files f ON f.id = c.target_id
         WHERE c.source_id = ?1 AND c.edge_type = 'CONTAINS' AND f.id = ?2",
        params![repo_id, node_id],
        |row| {
            let path: String = row.get(1)?;
            Ok(NodeDetail {
                id: row.get(0)?,
                name: path.clone(),
                node_type: "File".to_string(),
                file_path: path,
                language: Some(row.get(2)?),
                signature: None,
                docstring: None,
                start_line: None,
                end_line: None,
                content: None,
                calls: Vec::new(),
                called_by: Vec::new(),
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

fn entity_detail(tx: &Transaction<'_>, repo_id: &str, node_id: &str) -> Result<Option<NodeDetail>> {
    let detail = tx
        .query_row(
            "SELECT e.id, e.name, e.kind, e.signature, e.docstring, e.file_path, e.start_line, e.end_line, e.content, f.language
             FROM edges c
             JOIN files f ON f.id = c.target_id
             JOIN edges d ON d.source_id = f.id AND d.edge_type = 'DECLARES'
             JOIN entities e ON e.id = d.target_id
             WHERE c.source_id = ?1 AND c.edge_type = 'CONTAINS' AND e.id = ?2",
            params![repo_id, node_id],
            |row| {
                Ok(NodeDetail {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    node_type: row.get(2)?,
                    signature: Some(row.get(3)?),
                    docstring: row.get(4)?,
                    file_path: row.get(5)?,
                    start_line: Some(row.get(6)?),
                    end_line: Some(row.get(7)?),
                    content: Some(row.get(8)?),
                    language: Some(row.get(9)?),
                    calls: Vec::new(),
                    called_by: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut detail) = detail else {
        return Ok(None);
    };

    detail.calls = neighbour_names(
        tx,
        "SELECT DISTINCT t.name FROM edges k JOIN entities t ON t.id = k.target_id
         WHERE k.source_id = ?1 AND k.edge_type = 'CALLS' ORDER BY t.name",
        node_id,
    )?;
    detail.called_by = neighbour_names(
        tx,
        "SELECT DISTINCT s.name FROM edges k JOIN entities s ON s.id = k.source_id
         WHERE k.target_id = ?1 AND k.edge_type = 'CALLS' ORDER BY s.name",
        node_id,
    )?;

    Ok(Some(detail))
}

fn neighbour_names(tx: &Transaction<'_>, sql: &str, node_id: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(params![node_id], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

/// Nodes of `graph` keyed by id
pub fn nodes_by_id(graph: &GraphData) -> HashMap<&str, &GraphNode> {
    graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::GraphWriter;
    use crate::storage::models::{CodeEntity, FileRecord, IndexResult, Repository};

    fn entity(kind: EntityKind, name: &str, path: &str, line: u32, calls: &[&str], embedding: Option<Vec<f32>>) -> CodeEntity {
        CodeEntity {
            kind,
            subkind: None,
            name: name.to_string(),
            signature: format!("sig {}", name),
            docstring: Some(format!("doc {}", name)),
            start_line: line,
            end_line: line + 2,
            file_path: path.to_string(),
            content: format!("body of {}", name),
            nl_description: None,
            embedding,
            calls: calls.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn file(repo: &Repository, path: &str, language: &str) -> FileRecord {
        FileRecord {
            repo_id: repo.id.clone(),
            path: path.to_string(),
            language: language.to_string(),
            hash: "h".to_string(),
            size: 1,
        }
    }

    /// Two repositories; the first has a small call graph
    fn setup() -> (Database, Repository, Repository) {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let shop = Repository::new("/src/shop", "shop", "main");
        let blog = Repository::new("/src/blog", "blog", "main");
        db.insert_repository(&shop).unwrap();
        db.insert_repository(&blog).unwrap();

        let writer = GraphWriter::new(db.clone());
        writer
            .write_index_result(&IndexResult {
                repo_id: shop.id.clone(),
                files_processed: 2,
                entities_found: 4,
                files: vec![file(&shop, "z/cart.go", "go"), file(&shop, "a/main.go", "go")],
                entities: vec![
                    entity(EntityKind::Function, "checkout", "z/cart.go", 10, &["total"], Some(vec![1.0, 0.0])),
                    entity(EntityKind::Function, "total", "z/cart.go", 3, &[], Some(vec![0.0, 1.0])),
                    entity(EntityKind::Function, "main", "a/main.go", 1, &["checkout", "total"], None),
                    entity(EntityKind::Class, "Cart", "z/cart.go", 1, &[], Some(vec![0.7, 0.7])),
                ],
                ..Default::default()
            })
            .unwrap();
        writer
            .write_index_result(&IndexResult {
                repo_id: blog.id.clone(),
                files_processed: 1,
                entities_found: 1,
                files: vec![file(&blog, "post.py", "python")],
                entities: vec![entity(EntityKind::Function, "publish", "post.py", 1, &[], Some(vec![0.9, 0.1]))],
                ..Default::default()
            })
            .unwrap();

        (db, shop, blog)
    }

    fn id_of(db: &Database, name: &str) -> String {
        db.conn()
            .unwrap()
            .query_row("SELECT id FROM entities WHERE name = ?1", params![name], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_graph_mode_parse() {
        assert_eq!("structure".parse::<GraphMode>().unwrap(), GraphMode::Structure);
        assert_eq!("calls".parse::<GraphMode>().unwrap(), GraphMode::Calls);
        assert!("imports".parse::<GraphMode>().is_err());
    }

    #[test]
    fn test_file_tree_ordering() {
        let (db, shop, _) = setup();
        let tree = GraphReader::new(db).get_file_tree(&shop.id).unwrap();

        let paths: Vec<_> = tree.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a/main.go", "z/cart.go"]);

        let cart: Vec<_> = tree[1].functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(cart, vec!["total", "checkout"]);
    }

    #[test]
    fn test_file_tree_of_unknown_repository_is_empty() {
        let (db, _, _) = setup();
        assert!(GraphReader::new(db).get_file_tree("nope").unwrap().is_empty());
    }

    #[test]
    fn test_structure_graph() {
        let (db, shop, _) = setup();
        let graph = GraphReader::new(db).get_graph(&shop.id, GraphMode::Structure).unwrap();

        assert_eq!(graph.nodes.len(), 5);
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.edges.iter().all(|e| e.edge_type == "DECLARES"));
        assert!(graph.nodes.iter().all(|n| n.node_type != "Class"));

        let ids: HashSet<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), graph.nodes.len());
    }

    #[test]
    fn test_call_graph() {
        let (db, shop, _) = setup();
        let graph = GraphReader::new(db.clone()).get_graph(&shop.id, GraphMode::Calls).unwrap();

        assert_eq!(graph.nodes.len(), 3);
        assert!(graph.nodes.iter().all(|n| n.node_type == "Function"));
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.edges.iter().all(|e| e.edge_type == "CALLS" && !e.ambiguous));

        let by_id = nodes_by_id(&graph);
        let main_id = id_of(&db, "main");
        let main_callees: Vec<_> = graph
            .edges
            .iter()
            .filter(|e| e.source == main_id)
            .map(|e| by_id[e.target.as_str()].label.as_str())
            .collect();
        assert_eq!(main_callees.len(), 2);
        assert!(main_callees.contains(&"checkout") && main_callees.contains(&"total"));
    }

    #[test]
    fn test_node_detail() {
        let (db, shop, blog) = setup();
        let reader = GraphReader::new(db.clone());

        let total = reader.get_node_detail(&shop.id, &id_of(&db, "total")).unwrap().unwrap();
        assert_eq!(total.node_type, "Function");
        assert_eq!(total.docstring.as_deref(), Some("doc total"));
        assert!(total.calls.is_empty());
        assert_eq!(total.called_by, vec!["checkout", "main"]);

        let main = reader.get_node_detail(&shop.id, &id_of(&db, "main")).unwrap().unwrap();
        assert_eq!(main.calls, vec!["checkout", "total"]);

        // Ids from another repository are not found
        assert!(reader.get_node_detail(&blog.id, &id_of(&db, "total")).unwrap().is_none());
        assert!(reader.get_node_detail(&shop.id, "missing").unwrap().is_none());
    }

    #[test]
    fn test_node_detail_for_file() {
        let (db, shop, _) = setup();
        let reader = GraphReader::new(db);
        let file_id = reader.get_file_tree(&shop.id).unwrap()[0].id.clone();

        let detail = reader.get_node_detail(&shop.id, &file_id).unwrap().unwrap();
        assert_eq!(detail.node_type, "File");
        assert_eq!(detail.name, "a/main.go");
        assert_eq!(detail.language.as_deref(), Some("go"));
    }

    #[test]
    fn test_vector_search_ranks_and_scopes() {
        let (db, shop, _) = setup();
        let reader = GraphReader::new(db);

        let hits = reader.vector_search(&[1.0, 0.0], 10, None).unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["checkout", "publish", "Cart", "total"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let scoped = reader.vector_search(&[1.0, 0.0], 2, Some(&shop.id)).unwrap();
        let names: Vec<_> = scoped.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["checkout", "Cart"]);
        assert!(scoped.iter().all(|h| h.repo_name == "shop"));
    }

    #[test]
    fn test_vector_search_min_score_and_limits() {
        let (db, _, _) = setup();
        let reader = GraphReader::new(db).with_min_score(Some(0.5));

        let hits = reader.vector_search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(reader.vector_search(&[1.0, 0.0], 0, None).unwrap().is_empty());
        assert!(reader.vector_search(&[1.0, 0.0, 0.0], 10, None).unwrap().is_empty());
    }
}
