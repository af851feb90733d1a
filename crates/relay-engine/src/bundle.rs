use serde::{Deserialize, Serialize};

use relay_core::limits::{MAX_HEADER_BYTES, MAX_PREVIEWS, MAX_PREVIEW_BYTES};
use relay_core::ThreadId;

use crate::engine::Engine;
use crate::error::EngineError;

/// One artifact excerpt inside a bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundlePreview {
    pub artifact_id: String,
    pub excerpt: String,
}

/// The relay prompt bundle, the only internal prompt contract. For a
/// fixed state version and artifact set the serialized form is
/// byte-identical across runs: artifact ordering is (created_at desc, ref
/// asc), map keys are sorted, and no wall-clock values are embedded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptBundle {
    pub model_id: String,
    pub system: String,
    pub user: String,
    pub state_header: String,
    pub artifact_refs: Vec<String>,
    pub previews: Vec<BundlePreview>,
}

impl PromptBundle {
    /// Enforce the hard caps. Messages carry the smallest actionable fix.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.state_header.len() > MAX_HEADER_BYTES {
            return Err(EngineError::Quota(format!(
                "state_header exceeds {MAX_HEADER_BYTES} bytes (got {}). suggested action: reduce state size or increase cap",
                self.state_header.len()
            )));
        }
        if self.previews.len() > MAX_PREVIEWS {
            return Err(EngineError::Quota(format!(
                "previews count exceeds {MAX_PREVIEWS} (got {}). suggested action: reduce artifacts or increase cap",
                self.previews.len()
            )));
        }
        for p in &self.previews {
            if p.excerpt.len() > MAX_PREVIEW_BYTES {
                return Err(EngineError::Quota(format!(
                    "preview for artifact {} exceeds {MAX_PREVIEW_BYTES} bytes (got {}). suggested action: store a smaller preview or increase cap",
                    p.artifact_id,
                    p.excerpt.len()
                )));
            }
        }
        Ok(())
    }
}

/// Size accounting for a built bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleStats {
    pub bundle_bytes: usize,
    pub header_bytes: usize,
    pub preview_bytes: usize,
    pub preview_count: usize,
    pub prompt_bytes: usize,
}

impl Engine {
    /// Compose the capped bundle of system text, user text, state header,
    /// artifact refs and previews for a thread.
    pub fn build_bundle(
        &self,
        model_id: &str,
        system: &str,
        user: &str,
        thread_id: &ThreadId,
    ) -> Result<(PromptBundle, BundleStats), EngineError> {
        if user.trim().is_empty() {
            return Err(EngineError::Validation("user prompt required".into()));
        }

        let header = self.state_header(thread_id)?;
        let state_header = serde_json::to_string(&header)?;

        let mut artifacts = self.list_artifacts(thread_id)?;
        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.r#ref.cmp(&b.r#ref))
        });

        let mut bundle = PromptBundle {
            model_id: model_id.to_string(),
            system: system.to_string(),
            user: user.to_string(),
            state_header,
            artifact_refs: Vec::new(),
            previews: Vec::new(),
        };

        for art in artifacts.iter().take(MAX_PREVIEWS) {
            bundle.artifact_refs.push(art.r#ref.as_str().to_string());
            let text = &art.preview.text;
            let mut cut = MAX_PREVIEW_BYTES.min(text.len());
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            bundle.previews.push(BundlePreview {
                artifact_id: art.r#ref.as_str().to_string(),
                excerpt: text[..cut].to_string(),
            });
        }

        bundle.validate()?;

        let bundle_bytes = serde_json::to_vec(&bundle)?.len();
        let preview_bytes = bundle.previews.iter().map(|p| p.excerpt.len()).sum();
        let stats = BundleStats {
            bundle_bytes,
            header_bytes: bundle.state_header.len(),
            preview_bytes,
            preview_count: bundle.previews.len(),
            prompt_bytes: bundle.state_header.len() + user.len(),
        };

        Ok((bundle, stats))
    }
}
