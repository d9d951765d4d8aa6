// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use sutra_config::{ProxyConfig, WireFormat};

use crate::alias::{AliasResolver, ResolvedTarget};
use crate::convert::{convert_request, convert_response, SourceRequest};
use crate::stream::{SseLineBuffer, StreamMirror};
use crate::upstream::UpstreamClient;
use crate::ProxyError;

/// A handled request: either a complete JSON body or a stream of SSE bytes
/// already translated into the source format.
pub enum ProxyResponse {
    Json(Value),
    Sse(std::pin::Pin<Box<dyn Stream<Item = Result<Vec<u8>, std::io::Error>> + Send>>),
}

impl std::fmt::Debug for ProxyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyResponse::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ProxyResponse::Sse(_) => f.debug_tuple("Sse").field(&"<stream>").finish(),
        }
    }
}

/// Protocol-mirror core, independent of any HTTP framework.
///
/// The route surface hands in raw request bytes and an optional proxy-auth
/// header value; everything else — alias resolution, conversion, upstream
/// call, stream mirroring — happens here.
pub struct ProxyService {
    cfg: ProxyConfig,
    resolver: AliasResolver,
    upstream: UpstreamClient,
}

impl ProxyService {
    pub fn new(cfg: ProxyConfig) -> Self {
        let resolver = AliasResolver::new(&cfg);
        let upstream = UpstreamClient::new(cfg.upstream_timeout_ms, cfg.max_retries);
        Self {
            cfg,
            resolver,
            upstream,
        }
    }

    fn check_auth(&self, proxy_key: Option<&str>) -> Result<(), ProxyError> {
        match &self.cfg.shared_secret {
            None => Ok(()),
            Some(secret) if proxy_key == Some(secret.as_str()) => Ok(()),
            Some(_) => Err(ProxyError::Unauthorized),
        }
    }

    fn api_key_for(target: &ResolvedTarget) -> Option<String> {
        target
            .config
            .api_key_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
    }

    fn chat_url(target: &ResolvedTarget, stream: bool) -> String {
        let base = target.config.base_url.trim_end_matches('/');
        match target.config.format {
            WireFormat::Passthrough => format!("{base}/v1/messages"),
            WireFormat::Openai => format!("{base}/chat/completions"),
            WireFormat::Google => {
                let verb = if stream {
                    "streamGenerateContent?alt=sse"
                } else {
                    "generateContent"
                };
                format!("{base}/v1beta/models/{}:{verb}", target.model)
            }
        }
    }

    /// `POST /v1/messages` — non-stream or SSE depending on the request's
    /// `stream` flag.
    pub async fn handle_messages(
        &self,
        body: &[u8],
        proxy_key: Option<&str>,
    ) -> Result<ProxyResponse, ProxyError> {
        self.check_auth(proxy_key)?;
        let request = SourceRequest::parse(body, self.cfg.max_request_bytes)?;
        let target = self.resolver.resolve(&request.model)?;
        let upstream_body = convert_request(&request, &target);
        let url = Self::chat_url(&target, request.stream);
        let api_key = Self::api_key_for(&target);

        debug!(
            model = %request.model,
            provider = %target.provider,
            upstream_model = %target.model,
            stream = request.stream,
            "proxying request"
        );

        let response = self
            .upstream
            .post(&url, api_key.as_deref(), &upstream_body)
            .await?;

        if !request.stream {
            let body: Value = response
                .json()
                .await
                .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;
            return Ok(ProxyResponse::Json(convert_response(
                &body,
                target.config.format,
                &target.model,
            )));
        }

        // Streaming: passthrough pipes raw bytes; other formats run the
        // line-boundary mirror.
        if target.config.format == WireFormat::Passthrough {
            let byte_stream = response
                .bytes_stream()
                .map(|chunk| match chunk {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(e) => Err(std::io::Error::other(e.to_string())),
                })
                .boxed();
            return Ok(ProxyResponse::Sse(byte_stream));
        }

        let format = target.config.format;
        let model = target.model.clone();
        let mirrored = response
            .bytes_stream()
            .scan(
                (SseLineBuffer::new(), StreamMirror::new(format, model)),
                |(buffer, mirror), chunk| {
                    let frames: Vec<u8> = match chunk {
                        Ok(bytes) => buffer
                            .push(&bytes)
                            .iter()
                            .flat_map(|line| mirror.on_line(line))
                            .collect::<String>()
                            .into_bytes(),
                        Err(e) => mirror
                            .on_error("upstream-error", &e.to_string())
                            .concat()
                            .into_bytes(),
                    };
                    std::future::ready(Some(Ok(frames)))
                },
            )
            .filter(|r: &Result<Vec<u8>, std::io::Error>| {
                std::future::ready(r.as_ref().map(|v| !v.is_empty()).unwrap_or(true))
            })
            .boxed();
        Ok(ProxyResponse::Sse(mirrored))
    }

    /// `POST /v1/messages/count_tokens` — passthrough for passthrough
    /// targets, local character-based estimate otherwise.
    pub async fn handle_count_tokens(
        &self,
        body: &[u8],
        proxy_key: Option<&str>,
    ) -> Result<Value, ProxyError> {
        self.check_auth(proxy_key)?;
        let request = SourceRequest::parse(body, self.cfg.max_request_bytes)?;
        let target = self.resolver.resolve(&request.model)?;

        if target.config.format == WireFormat::Passthrough {
            let base = target.config.base_url.trim_end_matches('/');
            let url = format!("{base}/v1/messages/count_tokens");
            let upstream_body = convert_request(&request, &target);
            let api_key = Self::api_key_for(&target);
            let response = self
                .upstream
                .post(&url, api_key.as_deref(), &upstream_body)
                .await?;
            return response
                .json()
                .await
                .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()));
        }

        Ok(json!({ "input_tokens": estimate_request_tokens(&request) }))
    }

    /// `GET /` — configuration snapshot for operators.
    pub fn index(&self) -> Value {
        json!({
            "providers": self.resolver.provider_names(),
            "aliases": self
                .resolver
                .aliases()
                .iter()
                .map(|(a, t)| json!({ "alias": a, "target": t }))
                .collect::<Vec<_>>(),
            "status": "ok",
        })
    }
}

/// Local token estimate: the source envelope is lowered onto the core
/// message types so the shared character-based estimator does the counting.
fn estimate_request_tokens(request: &SourceRequest) -> u64 {
    use sutra_model::{tokens, ContentPart, Message, Role, ToolSchema};

    let messages: Vec<Message> = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role.as_str() {
                "assistant" => Role::Assistant,
                "system" => Role::System,
                _ => Role::User,
            };
            let text = match &m.content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Message::new(role, vec![ContentPart::text(text)])
        })
        .collect();
    let tools: Vec<ToolSchema> = request
        .tools
        .iter()
        .map(|t| ToolSchema {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();
    let system = request.system_text();
    tokens::estimate_total_tokens(&messages, system.as_deref(), &tools) as u64
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sutra_config::ProxyProviderConfig;

    fn service(secret: Option<&str>) -> ProxyService {
        let mut providers = HashMap::new();
        providers.insert(
            "corp".to_string(),
            ProxyProviderConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key_env: None,
                format: WireFormat::Openai,
                models: vec![],
                max_tokens_cap: None,
            },
        );
        ProxyService::new(ProxyConfig {
            shared_secret: secret.map(String::from),
            max_retries: 0,
            upstream_timeout_ms: 500,
            providers,
            ..Default::default()
        })
    }

    fn request_body(model: &str) -> Vec<u8> {
        json!({
            "model": model,
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": false
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn missing_shared_secret_is_unauthorized() {
        let svc = service(Some("s3cret"));
        let err = svc
            .handle_messages(&request_body("anything"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unauthorized));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn correct_shared_secret_passes_auth() {
        let svc = service(Some("s3cret"));
        // Auth passes; the request then fails on the unreachable upstream.
        let err = svc
            .handle_messages(&request_body("m"), Some("s3cret"))
            .await
            .unwrap_err();
        assert!(!matches!(err, ProxyError::Unauthorized));
    }

    #[tokio::test]
    async fn unknown_model_maps_to_400() {
        let mut providers = HashMap::new();
        providers.insert(
            "corp".to_string(),
            ProxyProviderConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key_env: None,
                format: WireFormat::Openai,
                models: vec!["only-this".into()],
                max_tokens_cap: None,
            },
        );
        let svc = ProxyService::new(ProxyConfig {
            providers,
            ..Default::default()
        });
        let err = svc
            .handle_messages(&request_body("mystery"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UnknownModel(_)));
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn count_tokens_estimates_locally_for_non_passthrough() {
        let svc = service(None);
        let out = svc
            .handle_count_tokens(&request_body("anything"), None)
            .await
            .unwrap();
        let tokens = out["input_tokens"].as_u64().unwrap();
        assert!(tokens >= 100, "provider overhead floor, got {tokens}");
    }

    #[test]
    fn index_lists_providers_and_status() {
        let svc = service(None);
        let idx = svc.index();
        assert_eq!(idx["status"], "ok");
        assert_eq!(idx["providers"][0], "corp");
    }
}
