//! Raw records as emitted by registry clients, prior to reconciliation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Ecosystem, MentionCandidate};

/// A dependency requirement as stated by the source registry, before
/// name normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequirement {
    pub name: String,
    pub req: Option<String>,
}

/// One package release as delivered by a registry client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPackage {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: Option<String>,
    pub requirements: Vec<RawRequirement>,
    pub published: Option<DateTime<Utc>>,
    pub license: Option<String>,
    /// Source document id, recorded as provenance on everything this
    /// record contributes.
    pub document: String,
    pub raw: serde_json::Value,
}

/// One StackOverflow post with its extracted package-name candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub post: u64,
    pub snippet: String,
    pub candidates: Vec<MentionCandidate>,
    pub document: String,
}

/// The common record shape every registry client produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawRecord {
    Package(RawPackage),
    Post(RawPost),
}
