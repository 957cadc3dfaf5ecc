//! Graph wrapper using petgraph::StableDiGraph with identity-keyed dedup

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::model::{
    Ecosystem, EdgeKind, GraphEdge, GraphNode, MentionNode, NodeIdentity, PackageNode, PostId,
};
use crate::reconcile::{self, NameIndex};
use crate::record::RawRecord;

/// The package graph — a directed graph with identity-unique nodes and
/// `(from, to, kind)`-unique edges.
pub struct Graph {
    inner: StableDiGraph<GraphNode, GraphEdge>,
    by_identity: HashMap<NodeIdentity, NodeIndex>,
    by_endpoints: HashMap<(NodeIdentity, NodeIdentity, EdgeKind), EdgeIndex>,
    names: NameIndex,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: StableDiGraph::new(),
            by_identity: HashMap::new(),
            by_endpoints: HashMap::new(),
            names: NameIndex::default(),
        }
    }

    /// Merge a node. Idempotent: an already-known identity keeps its
    /// original attributes and only accumulates provenance. Returns
    /// `true` when the node is new.
    pub fn merge_node(&mut self, node: GraphNode) -> bool {
        let identity = node.identity();
        if let Some(&idx) = self.by_identity.get(&identity) {
            let provenance = node.provenance().clone();
            if let Some(existing) = self.inner.node_weight_mut(idx) {
                existing.provenance_mut().extend(provenance);
            }
            return false;
        }

        if let GraphNode::Package(pkg) = &node {
            self.names.insert(pkg.id.ecosystem, &pkg.id.name);
        }
        let idx = self.inner.add_node(node);
        self.by_identity.insert(identity, idx);
        true
    }

    /// Merge an edge, deduplicating by `(from, to, kind)` and unioning
    /// provenance. Unknown endpoints are materialized as stub nodes so
    /// that merge order across sources never matters. Returns `true`
    /// when the edge is new.
    pub fn merge_edge(&mut self, edge: GraphEdge) -> bool {
        let key = edge.key();
        if let Some(&idx) = self.by_endpoints.get(&key) {
            if let Some(existing) = self.inner.edge_weight_mut(idx) {
                existing.provenance.extend(edge.provenance);
            }
            return false;
        }

        let provenance_doc = edge.provenance.iter().next().cloned().unwrap_or_default();
        let from = self.ensure_node(&edge.from, &provenance_doc);
        let to = self.ensure_node(&edge.to, &provenance_doc);
        let idx = self.inner.add_edge(from, to, edge);
        self.by_endpoints.insert(key, idx);
        true
    }

    fn ensure_node(&mut self, identity: &NodeIdentity, provenance: &str) -> NodeIndex {
        if let Some(&idx) = self.by_identity.get(identity) {
            return idx;
        }
        let stub = match identity {
            NodeIdentity::Package(id) => {
                GraphNode::Package(PackageNode::stub(id.clone(), provenance))
            }
            NodeIdentity::Mention(id) => GraphNode::Mention(MentionNode {
                id: *id,
                snippet: String::new(),
                candidates: Vec::new(),
                provenance: [provenance.to_string()].into(),
            }),
        };
        self.merge_node(stub);
        self.by_identity[identity]
    }

    /// Resolve every mention node's candidates against the crawled name
    /// index and add the resulting `Mentions` edges. Runs once, at
    /// session finalization, so the outcome does not depend on the
    /// interleaving in which sources were merged.
    pub(crate) fn resolve_mentions(&mut self) {
        let mut resolved = Vec::new();
        for idx in self.inner.node_indices() {
            let Some(GraphNode::Mention(mention)) = self.inner.node_weight(idx) else {
                continue;
            };
            let from = NodeIdentity::Mention(mention.id);
            let document = mention.provenance.iter().next().cloned().unwrap_or_default();
            for candidate in &mention.candidates {
                for target in reconcile::resolve_mention(&candidate.name, candidate.hint, &self.names)
                {
                    resolved.push(GraphEdge::new(
                        from.clone(),
                        NodeIdentity::Package(target),
                        EdgeKind::Mentions,
                        &document,
                    ));
                }
            }
        }
        debug!(edges = resolved.len(), "resolved mention candidates");
        for edge in resolved {
            self.merge_edge(edge);
        }
    }

    pub fn node(&self, identity: &NodeIdentity) -> Option<&GraphNode> {
        self.by_identity
            .get(identity)
            .and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn contains_node(&self, identity: &NodeIdentity) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn edge(&self, from: &NodeIdentity, to: &NodeIdentity, kind: EdgeKind) -> Option<&GraphEdge> {
        self.by_endpoints
            .get(&(from.clone(), to.clone(), kind))
            .and_then(|&idx| self.inner.edge_weight(idx))
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Iterate over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    /// Iterate over all edges.
    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.inner
            .edge_indices()
            .filter_map(move |idx| self.inner.edge_weight(idx))
    }

    /// Outgoing edges of a node.
    pub fn edges_from(&self, identity: &NodeIdentity) -> impl Iterator<Item = &GraphEdge> {
        self.by_identity
            .get(identity)
            .into_iter()
            .flat_map(move |&idx| {
                self.inner
                    .edges_directed(idx, Direction::Outgoing)
                    .filter_map(move |edge_ref| self.inner.edge_weight(edge_ref.id()))
            })
    }

    /// All package nodes of one ecosystem.
    pub fn packages(&self, ecosystem: Ecosystem) -> impl Iterator<Item = &PackageNode> {
        self.nodes()
            .filter_map(GraphNode::as_package)
            .filter(move |pkg| pkg.id.ecosystem == ecosystem)
    }

    /// All mention nodes.
    pub fn mentions(&self) -> impl Iterator<Item = &MentionNode> {
        self.nodes().filter_map(GraphNode::as_mention)
    }

    pub fn mention(&self, post: PostId) -> Option<&MentionNode> {
        self.node(&NodeIdentity::Mention(post))
            .and_then(GraphNode::as_mention)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// The single mutation surface for graph state.
///
/// A crawl session runs exactly one assembler behind its record channel,
/// so all merges are serialized; nothing else touches the graph while a
/// session is live. `finish` resolves mentions and releases the graph
/// for read-only consumption.
pub struct Assembler {
    graph: Graph,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            graph: Graph::new(),
        }
    }

    /// Continue assembling into a previously-built graph (e.g. a reloaded
    /// snapshot). Sessions start fresh unless a caller opts in with this.
    pub fn with_seed(graph: Graph) -> Self {
        Assembler { graph }
    }

    /// Reconcile one raw record and merge its nodes and edges.
    /// Returns `false` when the record was rejected as implausible.
    pub fn merge_record(&mut self, record: RawRecord) -> bool {
        let Some(reconciled) = reconcile::reconcile(record) else {
            return false;
        };
        for node in reconciled.nodes {
            self.graph.merge_node(node);
        }
        for edge in reconciled.edges {
            self.graph.merge_edge(edge);
        }
        true
    }

    pub fn merge_node(&mut self, node: GraphNode) -> bool {
        self.graph.merge_node(node)
    }

    pub fn merge_edge(&mut self, edge: GraphEdge) -> bool {
        self.graph.merge_edge(edge)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Finalize: resolve mention candidates into `Mentions` edges and
    /// hand the graph over, read-only from here on.
    pub fn finish(mut self) -> Graph {
        self.graph.resolve_mentions();
        self.graph
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
