use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use relay_core::limits::HTTP_FETCH_BODY_CAP;
use relay_store::{ArtifactRepo, ArtifactType, Provenance};

use crate::error::EngineError;
use crate::registry::{CapabilityDescriptor, CapabilityHandler, HandlerOutput, InvokeRequest};

const NAME: &str = "http.fetch";
const USER_AGENT: &str = "relay/1.0";
const DEFAULT_PREVIEW_SIZE: usize = 512;
const MAX_PREVIEW_SIZE: usize = 4096;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub fn descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor {
        name: NAME.into(),
        description: "Fetch a URL and store the response body as an artifact".into(),
        args_schema: json!({
            "type": "object",
            "properties": {
                "url":          {"type": "string", "description": "URL to fetch"},
                "method":       {"type": "string", "default": "GET"},
                "preview_size": {"type": "integer", "default": DEFAULT_PREVIEW_SIZE, "description": "Max preview bytes"}
            },
            "required": ["url"]
        }),
        cacheable: true,
        cache_ttl_secs: 600,
    }
}

#[derive(Deserialize)]
struct FetchArgs {
    #[serde(default)]
    url: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    preview_size: usize,
}

/// Built-in outbound HTTP fetch. The body (capped at 10 MiB) is stored as
/// an artifact; the preview carries status, content type and a short
/// excerpt.
pub struct HttpFetch {
    artifacts: Arc<ArtifactRepo>,
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(artifacts: Arc<ArtifactRepo>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { artifacts, client }
    }
}

#[async_trait]
impl CapabilityHandler for HttpFetch {
    async fn invoke(&self, req: &InvokeRequest) -> Result<HandlerOutput, EngineError> {
        let args: FetchArgs = serde_json::from_value(req.args.clone())
            .map_err(|e| EngineError::Validation(format!("invalid args: {e}")))?;
        if args.url.is_empty() {
            return Err(EngineError::Validation("url is required".into()));
        }
        if !args.url.starts_with("http://") && !args.url.starts_with("https://") {
            return Err(EngineError::Validation(
                "only http/https URLs are supported".into(),
            ));
        }
        let method = if args.method.is_empty() {
            reqwest::Method::GET
        } else {
            reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
                .map_err(|_| EngineError::Validation(format!("invalid method {:?}", args.method)))?
        };
        let preview_size = match args.preview_size {
            0 => DEFAULT_PREVIEW_SIZE,
            n => n.min(MAX_PREVIEW_SIZE),
        };

        let mut response = self.client.request(method, &args.url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() >= HTTP_FETCH_BODY_CAP {
                body.truncate(HTTP_FETCH_BODY_CAP);
                break;
            }
        }

        let text = String::from_utf8_lossy(&body);
        let mut cut = preview_size.min(text.len());
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let preview_text = &text[..cut];

        let preview = json!({
            "url": args.url,
            "status": status,
            "content_type": content_type,
            "size": body.len(),
            "preview": preview_text,
            "truncated": body.len() > preview_size,
        });

        let mime = if content_type.is_empty() {
            "text/plain"
        } else {
            content_type.as_str()
        };
        let artifact_ref = self
            .artifacts
            .put(
                &req.thread_id,
                Some(&format!("fetch-{}", safe_filename(&args.url))),
                ArtifactType::Text,
                mime,
                &mut body.as_slice(),
                Provenance::capability(NAME),
            )
            .map(|a| a.r#ref)
            .ok();

        Ok(HandlerOutput {
            preview,
            artifact_ref,
        })
    }
}

fn safe_filename(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    trimmed
        .chars()
        .map(|c| match c {
            '/' | '?' | '&' | '=' | '.' | ':' => '-',
            other => other,
        })
        .take(40)
        .collect()
}
