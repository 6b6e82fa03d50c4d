//! kubelint core types: object identity, manifests, sources and the manifest package.

#![forbid(unsafe_code)]

mod id;
mod manifest;
mod package;

pub use id::{split_api_version, K8sObjectId};
pub use manifest::{K8sManifest, ManifestSource, ManifestState, RuleOutcome, SourceInfo, SourceKind};
pub use package::ManifestPackage;

/// Manifest shape errors raised while building a [`K8sManifest`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("apiVersion not set")]
    MissingApiVersion,
    #[error("kind not set")]
    MissingKind,
}

pub mod prelude {
    pub use super::{K8sManifest, K8sObjectId, ManifestError, ManifestPackage, ManifestSource, SourceKind};
}
