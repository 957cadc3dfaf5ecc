//! Trellis Core — package graph model, reconciliation, and assembly

pub mod graph;
pub mod license;
pub mod model;
pub mod persist;
pub mod reconcile;
pub mod record;


pub use graph::{Assembler, Graph};
pub use license::LicenseClass;
pub use model::{
    DependencyDecl, Ecosystem, EdgeKind, GraphEdge, GraphNode, MentionCandidate, MentionNode,
    NodeIdentity, PackageId, PackageNode, PostId, Source,
};
pub use persist::{load, save, PersistError};
pub use reconcile::{is_prerelease, normalize_name, resolve_mention, NameIndex};
pub use record::{RawPackage, RawPost, RawRecord, RawRequirement};
