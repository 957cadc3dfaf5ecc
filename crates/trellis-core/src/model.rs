//! Core data structures for the package graph

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::license::LicenseClass;

/// Package registries that contribute package nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Pypi,
    Npm,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Pypi => "pypi",
            Ecosystem::Npm => "npm",
        }
    }

    /// First year the registry accepted uploads. Records dated earlier
    /// are mislabeled and get rejected during reconciliation.
    pub fn epoch_year(&self) -> i32 {
        match self {
            Ecosystem::Pypi => 2005,
            Ecosystem::Npm => 2010,
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crawlable data source. Superset of [`Ecosystem`]: StackOverflow
/// contributes mention nodes rather than package nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pypi,
    Npm,
    StackOverflow,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Pypi => "pypi",
            Source::Npm => "npm",
            Source::StackOverflow => "stackoverflow",
        })
    }
}

/// Canonical package identity: `(ecosystem, name, version)`.
///
/// `version: None` identifies the unversioned node for a package — the
/// target of dependency declarations and mention references that do not
/// pin a concrete release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: Option<String>,
}

impl PackageId {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: Option<String>) -> Self {
        PackageId {
            ecosystem,
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}@{}", self.ecosystem, self.name, v),
            None => write!(f, "{}:{}@*", self.ecosystem, self.name),
        }
    }
}

/// StackOverflow question or answer id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "so:{}", self.0)
    }
}

/// Identity of any node in the graph. Used as the dedup key by the
/// assembler and as the endpoint reference on edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeIdentity {
    Package(PackageId),
    Mention(PostId),
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdentity::Package(id) => id.fmt(f),
            NodeIdentity::Mention(id) => id.fmt(f),
        }
    }
}

/// A dependency as declared by the package, after name normalization.
/// `req` is the raw version-range string; ranges are recorded, never solved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub name: String,
    pub req: Option<String>,
}

/// A package release (or unversioned package stub) in the graph.
///
/// Attributes are fixed at creation; re-merging the same identity only
/// accumulates provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageNode {
    pub id: PackageId,
    pub dependencies: Vec<DependencyDecl>,
    pub published: Option<DateTime<Utc>>,
    pub license: Option<LicenseClass>,
    /// Alpha/beta/rc/dev release. Flagged so downstream analysis can
    /// exclude pre-releases without the graph dropping them.
    pub prerelease: bool,
    /// Source metadata as delivered by the registry.
    pub raw: serde_json::Value,
    /// Source documents that contributed this node.
    pub provenance: BTreeSet<String>,
}

impl PackageNode {
    /// Minimal node standing in for a package that was referenced but not
    /// (yet) crawled.
    pub fn stub(id: PackageId, provenance: &str) -> Self {
        PackageNode {
            id,
            dependencies: Vec::new(),
            published: None,
            license: None,
            prerelease: false,
            raw: serde_json::Value::Null,
            provenance: BTreeSet::from([provenance.to_string()]),
        }
    }
}

/// An ecosystem hint attached to a mention candidate, derived from the
/// surrounding text (`pip install` vs `npm install`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionCandidate {
    pub name: String,
    pub hint: Option<Ecosystem>,
}

/// A StackOverflow post that names one or more packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionNode {
    pub id: PostId,
    /// Leading excerpt of the post body.
    pub snippet: String,
    /// Package-name strings found in the body, unresolved until the
    /// session finalizes.
    pub candidates: Vec<MentionCandidate>,
    pub provenance: BTreeSet<String>,
}

/// A single node in the package graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphNode {
    Package(PackageNode),
    Mention(MentionNode),
}

impl GraphNode {
    pub fn identity(&self) -> NodeIdentity {
        match self {
            GraphNode::Package(p) => NodeIdentity::Package(p.id.clone()),
            GraphNode::Mention(m) => NodeIdentity::Mention(m.id),
        }
    }

    pub fn provenance(&self) -> &BTreeSet<String> {
        match self {
            GraphNode::Package(p) => &p.provenance,
            GraphNode::Mention(m) => &m.provenance,
        }
    }

    pub(crate) fn provenance_mut(&mut self) -> &mut BTreeSet<String> {
        match self {
            GraphNode::Package(p) => &mut p.provenance,
            GraphNode::Mention(m) => &mut m.provenance,
        }
    }

    pub fn as_package(&self) -> Option<&PackageNode> {
        match self {
            GraphNode::Package(p) => Some(p),
            GraphNode::Mention(_) => None,
        }
    }

    pub fn as_mention(&self) -> Option<&MentionNode> {
        match self {
            GraphNode::Mention(m) => Some(m),
            GraphNode::Package(_) => None,
        }
    }
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared dependency, package → package.
    DependsOn,
    /// Textual cross-reference, mention → package.
    Mentions,
}

/// A directed edge in the package graph. Edges are unique per
/// `(from, to, kind)`; provenance accumulates across merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeIdentity,
    pub to: NodeIdentity,
    pub kind: EdgeKind,
    pub provenance: BTreeSet<String>,
}

impl GraphEdge {
    pub fn new(from: NodeIdentity, to: NodeIdentity, kind: EdgeKind, provenance: &str) -> Self {
        GraphEdge {
            from,
            to,
            kind,
            provenance: BTreeSet::from([provenance.to_string()]),
        }
    }

    /// Dedup key for the assembler.
    pub fn key(&self) -> (NodeIdentity, NodeIdentity, EdgeKind) {
        (self.from.clone(), self.to.clone(), self.kind)
    }
}
