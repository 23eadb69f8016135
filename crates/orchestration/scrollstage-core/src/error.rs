//! Error types for the page orchestrator.
//!
//! Every error here is recoverable at the smallest scope that can observe it
//! (controller, scheduler or registry). Only [`PageError::Fatal`] moves the
//! page into its fallback UI.

use serde::{Deserialize, Serialize};

use crate::ids::HandleId;

/// The animation engine or one of its plugins failed to load.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EngineInitError {
    #[error("animation engine plugin '{plugin}' failed to load: {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("animation engine unavailable: {reason}")]
    Unavailable { reason: String },
}

/// A section's required DOM anchor was absent when arming.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("section '{section_id}' is missing required anchor '{selector}'")]
pub struct AnchorMissingError {
    pub section_id: String,
    pub selector: String,
}

/// A registered cleanup returned an error while being invoked.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("cleanup for handle {handle:?} failed: {reason}")]
pub struct CleanupError {
    pub handle: HandleId,
    pub reason: String,
}

/// Asset fetch or decode failure, or an illegal load-state transition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AssetLoadError {
    #[error("network error loading '{url}': {reason}")]
    Network { url: String, reason: String },

    #[error("failed to decode '{url}': {reason}")]
    Decode { url: String, reason: String },

    #[error("illegal asset state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown asset id {0}")]
    UnknownAsset(u32),
}

/// DOM measurement failure reported by a [`DomProbe`](crate::geometry::DomProbe).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasureError {
    #[error("no element matches '{selector}'")]
    NotFound { selector: String },

    #[error("element '{selector}' is detached from the document")]
    Detached { selector: String },
}

/// A binding could not recompute its pixel offsets this cycle.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("refresh of binding '{binding}' skipped: {cause}")]
pub struct RefreshGeometryError {
    pub binding: String,
    #[source]
    pub cause: MeasureError,
}

/// Malformed trigger position string such as `"top 80%"`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid trigger position '{input}': {reason}")]
pub struct TriggerParseError {
    pub input: String,
    pub reason: String,
}

/// Failure arming or building one section controller.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SectionError {
    #[error(transparent)]
    AnchorMissing(#[from] AnchorMissingError),

    #[error("section '{section_id}' root could not be measured: {cause}")]
    RootGeometry {
        section_id: String,
        cause: MeasureError,
    },

    #[error("section '{section_id}' has an invalid spec: {reason}")]
    InvalidSpec { section_id: String, reason: String },
}

/// Configuration validation failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid config: {reason}")]
pub struct ConfigError {
    pub reason: String,
}

/// Page-level errors surfaced to the host.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PageError {
    #[error("section '{id}' is already mounted")]
    DuplicateSection { id: String },

    #[error("section '{id}' is not mounted")]
    UnknownSection { id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Section(#[from] SectionError),

    #[error("page failed: {reason}")]
    Fatal { reason: String },
}

impl PageError {
    /// Whether this error should move the whole page into its fallback UI.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
