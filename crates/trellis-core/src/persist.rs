//! Line-oriented snapshot persistence for finalized graphs

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::Graph;
use crate::model::{GraphEdge, GraphNode, MentionNode, PackageNode};

/// One line of a snapshot file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SnapshotRecord {
    Package(PackageNode),
    Mention(MentionNode),
    Edge(GraphEdge),
}

/// Errors reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed snapshot record on line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

/// Write a graph as one JSON record per line: all nodes first, then all
/// edges, each group in identity order so snapshots are byte-stable.
pub fn save<W: Write>(graph: &Graph, writer: &mut W) -> Result<(), PersistError> {
    let mut nodes: Vec<&GraphNode> = graph.nodes().collect();
    nodes.sort_by_key(|node| node.identity());
    for node in nodes {
        let record = match node {
            GraphNode::Package(pkg) => SnapshotRecord::Package(pkg.clone()),
            GraphNode::Mention(m) => SnapshotRecord::Mention(m.clone()),
        };
        serde_json::to_writer(&mut *writer, &record).map_err(io::Error::other)?;
        writer.write_all(b"\n")?;
    }

    let mut edges: Vec<&GraphEdge> = graph.edges().collect();
    edges.sort_by_key(|edge| edge.key());
    for edge in edges {
        let record = SnapshotRecord::Edge(edge.clone());
        serde_json::to_writer(&mut *writer, &record).map_err(io::Error::other)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Reload a snapshot into a graph. Node and edge identity and provenance
/// round-trip losslessly through [`save`].
pub fn load<R: BufRead>(reader: R) -> Result<Graph, PersistError> {
    let mut graph = Graph::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SnapshotRecord =
            serde_json::from_str(&line).map_err(|source| PersistError::Malformed {
                line: number + 1,
                source,
            })?;
        match record {
            SnapshotRecord::Package(pkg) => {
                graph.merge_node(GraphNode::Package(pkg));
            }
            SnapshotRecord::Mention(m) => {
                graph.merge_node(GraphNode::Mention(m));
            }
            SnapshotRecord::Edge(edge) => {
                graph.merge_edge(edge);
            }
        }
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Ecosystem, EdgeKind, MentionCandidate, NodeIdentity, PackageId, PostId,
    };
    use std::collections::BTreeSet;
    use std::io::BufReader;

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        let alpha = PackageId::new(Ecosystem::Pypi, "alpha", Some("1.0".into()));
        let beta = PackageId::new(Ecosystem::Pypi, "beta", None);

        graph.merge_node(GraphNode::Package(PackageNode {
            id: alpha.clone(),
            dependencies: vec![],
            published: None,
            license: None,
            prerelease: false,
            raw: serde_json::json!({"info": {"name": "alpha"}}),
            provenance: BTreeSet::from(["pypi/alpha/1.0".to_string()]),
        }));
        graph.merge_node(GraphNode::Mention(MentionNode {
            id: PostId(7),
            snippet: "try alpha".into(),
            candidates: vec![MentionCandidate {
                name: "alpha".into(),
                hint: None,
            }],
            provenance: BTreeSet::from(["so/7".to_string()]),
        }));
        graph.merge_edge(GraphEdge::new(
            NodeIdentity::Package(alpha),
            NodeIdentity::Package(beta),
            EdgeKind::DependsOn,
            "pypi/alpha/1.0",
        ));
        graph
    }

    #[test]
    fn snapshot_round_trips_identity_and_provenance() {
        let graph = sample_graph();
        let mut buffer = Vec::new();
        save(&graph, &mut buffer).unwrap();

        let reloaded = load(BufReader::new(buffer.as_slice())).unwrap();
        assert_eq!(reloaded.node_count(), graph.node_count());
        assert_eq!(reloaded.edge_count(), graph.edge_count());

        for node in graph.nodes() {
            let other = reloaded.node(&node.identity()).expect("node survives reload");
            assert_eq!(other.provenance(), node.provenance());
        }
        for edge in graph.edges() {
            let other = reloaded
                .edge(&edge.from, &edge.to, edge.kind)
                .expect("edge survives reload");
            assert_eq!(other.provenance, edge.provenance);
        }
    }

    #[test]
    fn snapshots_are_byte_stable() {
        let mut first = Vec::new();
        save(&sample_graph(), &mut first).unwrap();
        let mut second = Vec::new();
        save(&sample_graph(), &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_to_disk_and_reload(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.jsonl");

        let mut file = std::fs::File::create(&path).unwrap();
        save(&sample_graph(), &mut file).unwrap();

        let reloaded = load(BufReader::new(std::fs::File::open(&path).unwrap())).unwrap();
        assert_eq!(reloaded.node_count(), 3);
    }

    #[test]
    fn malformed_lines_are_reported_with_their_number() {
        let input = b"{\"type\":\"edge\",";
        let err = load(BufReader::new(input.as_slice())).unwrap_err();
        match err {
            PersistError::Malformed { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
