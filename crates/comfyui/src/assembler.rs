//! Turns a finished job's outputs into artifacts the caller can use.

use futures::future::try_join_all;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::api::EngineApi;
use crate::config::{ConfigError, OutputMode};
use crate::error::{ComfyError, ComfyResult};
use crate::job::{ArtifactDescriptor, ArtifactKind, Job};

/// Artifact payload: fetched bytes or a retrieval URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Bytes(Vec<u8>),
    Url(String),
}

/// Bytes serialize as their length only; write them out separately.
impl Serialize for ArtifactContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ArtifactContent", 2)?;
        match self {
            Self::Bytes(bytes) => {
                state.serialize_field("type", "bytes")?;
                state.serialize_field("size", &bytes.len())?;
            }
            Self::Url(url) => {
                state.serialize_field("type", "url")?;
                state.serialize_field("url", url)?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArtifact {
    pub descriptor: ArtifactDescriptor,
    pub content: ArtifactContent,
}

impl ResolvedArtifact {
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            ArtifactContent::Bytes(b) => Some(b),
            ArtifactContent::Url(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Url(u) => Some(u),
            ArtifactContent::Bytes(_) => None,
        }
    }
}

/// Every artifact one output node produced, in engine order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledOutput {
    pub prompt_id: String,
    pub node_id: String,
    pub artifacts: Vec<ResolvedArtifact>,
}

impl AssembledOutput {
    /// The default artifact. Never `None` for an assembled output.
    pub fn first(&self) -> Option<&ResolvedArtifact> {
        self.artifacts.first()
    }
}

/// Resolves artifacts in file or URL mode.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    mode: OutputMode,
    /// Base for URL mode, without trailing slash.
    public_base_url: String,
}

impl ResultAssembler {
    pub fn new(mode: OutputMode, public_base_url: impl Into<String>) -> Self {
        Self {
            mode,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub async fn assemble<A: EngineApi>(
        &self,
        api: &A,
        job: &Job,
        node_id: &str,
    ) -> ComfyResult<AssembledOutput> {
        let descriptors = match job.outputs.get(node_id) {
            Some(d) if !d.is_empty() => d,
            _ => return Err(ComfyError::output_node_not_found(node_id)),
        };
        if let Some(other) = descriptors.iter().find(|d| d.kind != ArtifactKind::Image) {
            return Err(ComfyError::UnsupportedArtifact {
                node_id: node_id.to_string(),
                kind: other.kind.as_str().to_string(),
            });
        }

        let artifacts = match self.mode {
            OutputMode::Url => descriptors
                .iter()
                .map(|d| {
                    Ok(ResolvedArtifact {
                        descriptor: d.clone(),
                        content: ArtifactContent::Url(self.view_url(d)?),
                    })
                })
                .collect::<ComfyResult<Vec<_>>>()?,
            OutputMode::File => {
                try_join_all(descriptors.iter().map(|d| async move {
                    let bytes = api.view(&d.filename, &d.subfolder, &d.folder_type).await?;
                    Ok::<_, ComfyError>(ResolvedArtifact {
                        descriptor: d.clone(),
                        content: ArtifactContent::Bytes(bytes),
                    })
                }))
                .await?
            }
        };

        tracing::debug!(
            prompt_id = %job.prompt_id,
            node_id,
            count = artifacts.len(),
            mode = ?self.mode,
            "Assembled output",
        );
        Ok(AssembledOutput {
            prompt_id: job.prompt_id.clone(),
            node_id: node_id.to_string(),
            artifacts,
        })
    }

    /// Absolute `/view` URL with percent-encoded query values.
    pub fn view_url(&self, descriptor: &ArtifactDescriptor) -> ComfyResult<String> {
        reqwest::Url::parse_with_params(
            &format!("{}/view", self.public_base_url),
            [
                ("filename", descriptor.filename.as_str()),
                ("subfolder", descriptor.subfolder.as_str()),
                ("type", descriptor.folder_type.as_str()),
            ],
        )
        .map(String::from)
        .map_err(|e| {
            ComfyError::Config(ConfigError::Invalid {
                var: "COMFY_URL_EXTERNAL",
                value: self.public_base_url.clone(),
                reason: e.to_string(),
            })
        })
    }
}
