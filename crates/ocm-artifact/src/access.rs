//! Resource access specifications
//!
//! Component resources describe where their content lives through a typed
//! access specification. Only the variants that can be turned into an image
//! reference are modelled; everything else decodes to
//! [`AccessSpec::Unsupported`].

use crate::reference::{ImageReference, ReferenceError};
use serde::Deserialize;
use serde_json::Value;

/// Maximum number of global-access hops followed for local blobs
pub const MAX_ALIAS_DEPTH: usize = 8;

/// Decoded access specification
#[derive(Debug, Clone, PartialEq)]
pub enum AccessSpec {
    /// Image stored in an OCI registry
    OciArtifact { image_reference: String },
    /// Single blob stored in an OCI registry
    OciBlob { reference: String, digest: String },
    /// Blob stored alongside the component, optionally mirrored globally
    LocalBlob {
        local_reference: String,
        global_access: Option<Value>,
    },
    /// Any access type this crate does not resolve
    Unsupported(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OciArtifactFields {
    image_reference: String,
}

#[derive(Deserialize)]
struct OciBlobFields {
    #[serde(rename = "ref")]
    reference: String,
    digest: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalBlobFields {
    #[serde(default)]
    local_reference: String,
    #[serde(default)]
    global_access: Option<Value>,
}

type Decoder = fn(&Value) -> Result<AccessSpec, serde_json::Error>;

fn decode_oci_artifact(value: &Value) -> Result<AccessSpec, serde_json::Error> {
    let fields = OciArtifactFields::deserialize(value)?;
    Ok(AccessSpec::OciArtifact {
        image_reference: fields.image_reference,
    })
}

fn decode_oci_blob(value: &Value) -> Result<AccessSpec, serde_json::Error> {
    let fields = OciBlobFields::deserialize(value)?;
    Ok(AccessSpec::OciBlob {
        reference: fields.reference,
        digest: fields.digest,
    })
}

fn decode_local_blob(value: &Value) -> Result<AccessSpec, serde_json::Error> {
    let fields = LocalBlobFields::deserialize(value)?;
    Ok(AccessSpec::LocalBlob {
        local_reference: fields.local_reference,
        global_access: fields.global_access,
    })
}

/// Access type name → decoder
const DECODERS: &[(&str, Decoder)] = &[
    ("ociArtifact", decode_oci_artifact),
    ("ociArtifact/v1", decode_oci_artifact),
    ("OCIImage", decode_oci_artifact),
    ("OCIImage/v1", decode_oci_artifact),
    ("ociBlob", decode_oci_blob),
    ("ociBlob/v1", decode_oci_blob),
    ("localBlob", decode_local_blob),
    ("localBlob/v1", decode_local_blob),
];

impl AccessSpec {
    /// Decode a raw access specification by its `type` field
    ///
    /// # Errors
    /// Returns error if `type` is missing or the fields of a known type are malformed
    pub fn from_value(value: &Value) -> Result<Self, AccessError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(AccessError::MissingType)?;

        match DECODERS.iter().find(|(name, _)| *name == kind) {
            Some((_, decode)) => decode(value).map_err(|source| AccessError::Malformed {
                kind: kind.to_string(),
                source,
            }),
            None => Ok(Self::Unsupported(kind.to_string())),
        }
    }

    /// Resolve to a single canonical image reference string
    ///
    /// Local blobs follow their global access alias until a terminal variant
    /// is reached, at most [`MAX_ALIAS_DEPTH`] times.
    ///
    /// # Errors
    /// Returns error for unsupported access types, local blobs without a
    /// global alias, malformed aliases and alias chains that are too deep
    pub fn image_reference(&self) -> Result<String, AccessError> {
        let mut current = self.clone();
        for _ in 0..=MAX_ALIAS_DEPTH {
            current = match current {
                Self::OciArtifact { image_reference } => return Ok(image_reference),
                Self::OciBlob { reference, digest } => return Ok(format!("{reference}@{digest}")),
                Self::LocalBlob {
                    global_access: Some(alias),
                    ..
                } => Self::from_value(&alias)?,
                Self::LocalBlob {
                    local_reference, ..
                } => return Err(AccessError::NoGlobalAccess(local_reference)),
                Self::Unsupported(kind) => return Err(AccessError::Unsupported(kind)),
            };
        }
        Err(AccessError::AliasDepthExceeded(MAX_ALIAS_DEPTH))
    }

    /// Resolve and parse into an [`ImageReference`]
    ///
    /// # Errors
    /// See [`AccessSpec::image_reference`]; additionally fails if the
    /// resolved string is not a valid reference
    pub fn parse_reference(&self) -> Result<ImageReference, AccessError> {
        Ok(self.image_reference()?.parse()?)
    }
}

/// Access specification errors
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("access specification has no type")]
    MissingType,

    #[error("malformed {kind} access specification: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot determine image digest: local blob '{0}' has no global access")]
    NoGlobalAccess(String),

    #[error("cannot determine access spec type: '{0}' is not supported")]
    Unsupported(String),

    #[error("global access aliases nested deeper than {0} levels")]
    AliasDepthExceeded(usize),

    #[error("failed to parse access reference: {0}")]
    Reference(#[from] ReferenceError),
}
