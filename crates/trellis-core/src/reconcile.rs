//! Identity reconciliation: raw records → canonical node identities

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::license;
use crate::model::{
    DependencyDecl, Ecosystem, EdgeKind, GraphEdge, GraphNode, MentionNode, NodeIdentity,
    PackageId, PackageNode, PostId,
};
use crate::record::{RawPackage, RawPost, RawRecord};

/// Runs of PyPI name separators, collapsed per PEP 503 equivalence.
static PYPI_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").unwrap());

/// Pre-release markers in version strings, covering both PEP 440
/// (`1.0a1`, `2.0.dev3`) and semver (`1.0.0-beta.2`) spellings.
static PRERELEASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[.\-_])(?:a(?:lpha)?|b(?:eta)?|rc|c|dev|pre(?:view)?)\.?\d*$|\d(?:a|b|rc|dev)\d+$")
        .unwrap()
});

/// Normalize a package name into its canonical per-ecosystem form.
///
/// PyPI names compare case-insensitively with `-`, `_`, and `.`
/// equivalent; NPM names are lowercased with scoped `@scope/name` names
/// retained as-is.
pub fn normalize_name(ecosystem: Ecosystem, raw: &str) -> String {
    let trimmed = raw.trim();
    match ecosystem {
        Ecosystem::Pypi => PYPI_SEPARATORS
            .replace_all(&trimmed.to_lowercase(), "-")
            .into_owned(),
        Ecosystem::Npm => trimmed.to_lowercase(),
    }
}

/// Whether a version string denotes a pre-release.
pub fn is_prerelease(version: &str) -> bool {
    PRERELEASE.is_match(version.trim())
}

/// Index of crawled package names per ecosystem, maintained by the graph
/// and consulted for mention resolution.
#[derive(Debug, Default)]
pub struct NameIndex {
    names: HashMap<Ecosystem, HashSet<String>>,
}

impl NameIndex {
    pub fn insert(&mut self, ecosystem: Ecosystem, name: &str) {
        self.names
            .entry(ecosystem)
            .or_default()
            .insert(name.to_string());
    }

    pub fn contains(&self, ecosystem: Ecosystem, name: &str) -> bool {
        self.names
            .get(&ecosystem)
            .is_some_and(|names| names.contains(name))
    }
}

/// Resolve a mention candidate against the crawled name index.
///
/// With an ecosystem hint only that ecosystem is searched; without one,
/// both are, and a name known to both yields both identities. Ambiguity
/// is preserved for downstream consumers — this function never picks a
/// single winner.
pub fn resolve_mention(
    candidate: &str,
    hint: Option<Ecosystem>,
    names: &NameIndex,
) -> Vec<PackageId> {
    let ecosystems: &[Ecosystem] = match hint {
        Some(Ecosystem::Pypi) => &[Ecosystem::Pypi],
        Some(Ecosystem::Npm) => &[Ecosystem::Npm],
        None => &[Ecosystem::Pypi, Ecosystem::Npm],
    };
    ecosystems
        .iter()
        .filter_map(|&eco| {
            let name = normalize_name(eco, candidate);
            names
                .contains(eco, &name)
                .then(|| PackageId::new(eco, name, None))
        })
        .collect()
}

/// Nodes and edges contributed by one reconciled record.
#[derive(Debug)]
pub struct Reconciled {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Map a raw record onto canonical nodes and edges.
///
/// Returns `None` for records rejected as implausible (publish date
/// before the ecosystem existed).
pub fn reconcile(record: RawRecord) -> Option<Reconciled> {
    match record {
        RawRecord::Package(pkg) => reconcile_package(pkg),
        RawRecord::Post(post) => Some(reconcile_post(post)),
    }
}

fn reconcile_package(pkg: RawPackage) -> Option<Reconciled> {
    use chrono::Datelike;

    if let Some(published) = pkg.published {
        if published.year() < pkg.ecosystem.epoch_year() {
            warn!(
                ecosystem = %pkg.ecosystem,
                name = %pkg.name,
                published = %published,
                "rejecting record dated before the registry existed"
            );
            return None;
        }
    }

    let name = normalize_name(pkg.ecosystem, &pkg.name);
    let id = PackageId::new(pkg.ecosystem, name, pkg.version.clone());
    let prerelease = pkg.version.as_deref().is_some_and(is_prerelease);

    let dependencies: Vec<DependencyDecl> = pkg
        .requirements
        .iter()
        .map(|r| DependencyDecl {
            name: normalize_name(pkg.ecosystem, &r.name),
            req: r.req.clone(),
        })
        .collect();

    let mut nodes = vec![GraphNode::Package(PackageNode {
        id: id.clone(),
        dependencies: dependencies.clone(),
        published: pkg.published,
        license: pkg.license.as_deref().and_then(license::classify),
        prerelease,
        raw: pkg.raw,
        provenance: BTreeSet::from([pkg.document.clone()]),
    })];

    // One unversioned target node and one edge per declared dependency.
    // Ranges stay declarative: the target is the package, not a release.
    let mut edges = Vec::with_capacity(dependencies.len());
    for dep in &dependencies {
        let target = PackageId::new(pkg.ecosystem, dep.name.clone(), None);
        nodes.push(GraphNode::Package(PackageNode::stub(
            target.clone(),
            &pkg.document,
        )));
        edges.push(GraphEdge::new(
            NodeIdentity::Package(id.clone()),
            NodeIdentity::Package(target),
            EdgeKind::DependsOn,
            &pkg.document,
        ));
    }

    Some(Reconciled { nodes, edges })
}

fn reconcile_post(post: RawPost) -> Reconciled {
    Reconciled {
        nodes: vec![GraphNode::Mention(MentionNode {
            id: PostId(post.post),
            snippet: post.snippet,
            candidates: post.candidates,
            provenance: BTreeSet::from([post.document]),
        })],
        edges: Vec::new(),
    }
}
