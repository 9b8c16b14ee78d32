//! Description backend dispatch.
//!
//! All four backends accept the same chat-completion request: one system
//! message, one user message carrying the prompt and the screenshot as a
//! base64 PNG data URL. Only the response envelope differs, and
//! [`extract_message_text`] knows each shape.

use crate::backend::ResolvedBackend;
use crate::config::DispatchConfig;
use crate::types::{CapturedImage, DispatchError};
use base64::Engine;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something that can describe an image
#[async_trait::async_trait]
pub trait DescriptionBackend: Send + Sync {
    async fn describe(
        &self,
        image: &CapturedImage,
        prompt: &str,
        system_prompt: &str,
        backend: &ResolvedBackend,
    ) -> Result<String, DispatchError>;
}

/// HTTP dispatcher for chat-completion style backends
pub struct HttpDispatcher {
    client: reqwest::Client,
    max_tokens: u32,
}

impl HttpDispatcher {
    pub fn new(settings: &DispatchConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| DispatchError::Unreachable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            max_tokens: settings.max_tokens,
        })
    }
}

/// Encode an image as a `data:` URL
pub fn image_data_url(image: &CapturedImage) -> Result<String, DispatchError> {
    let png = image
        .to_png()
        .map_err(|e| DispatchError::Encoding(e.to_string()))?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Build the chat-completion request body
pub fn build_request(
    model: &str,
    image_url: &str,
    prompt: &str,
    system_prompt: &str,
    max_tokens: u32,
) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": false,
        "messages": [
            { "role": "system", "content": system_prompt },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }
        ]
    })
}

/// Pull the assistant text out of a backend response.
///
/// Understands the OpenAI-compatible `choices` envelope (used by OpenAI,
/// Gemini's compatibility endpoint, Ollama's `/v1` and llama.cpp), Ollama's
/// native `message` envelope and Gemini's native `candidates` envelope.
pub fn extract_message_text(body: &Value) -> Option<String> {
    if let Some(content) = body.pointer("/choices/0/message/content") {
        return content_text(content);
    }
    if let Some(content) = body.pointer("/message/content") {
        return content_text(content);
    }
    if let Some(parts) = body.pointer("/candidates/0/content/parts").and_then(Value::as_array) {
        let text: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        if !text.is_empty() {
            return Some(text.concat());
        }
    }
    None
}

/// Content is either a string or a list of typed parts
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter(|p| p["type"].as_str().map_or(true, |t| t == "text"))
                .filter_map(|p| p["text"].as_str())
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(text.concat())
            }
        }
        _ => None,
    }
}

#[async_trait::async_trait]
impl DescriptionBackend for HttpDispatcher {
    async fn describe(
        &self,
        image: &CapturedImage,
        prompt: &str,
        system_prompt: &str,
        backend: &ResolvedBackend,
    ) -> Result<String, DispatchError> {
        // PNG encoding is CPU bound; keep it off the runtime threads
        let owned = image.clone();
        let image_url = tokio::task::spawn_blocking(move || image_data_url(&owned))
            .await
            .map_err(|e| DispatchError::Encoding(e.to_string()))??;
        let body = build_request(&backend.model, &image_url, prompt, system_prompt, self.max_tokens);

        info!(
            "Requesting description from {} ({}) at {}",
            backend.id, backend.model, backend.endpoint
        );
        let start = Instant::now();

        let mut request = self.client.post(&backend.endpoint).json(&body);
        if !backend.secret.is_empty() {
            request = request.bearer_auth(backend.secret.expose());
        }

        let response = request.send().await.map_err(|e| {
            warn!("{} unreachable: {}", backend.id, e);
            DispatchError::Unreachable(e.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("{} returned {}: {}", backend.id, status, text.trim());
            return Err(DispatchError::BadResponse(status.as_u16()));
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Unreachable(e.without_url().to_string())
            } else {
                DispatchError::ParseFailure(e.without_url().to_string())
            }
        })?;

        let text = extract_message_text(&payload).ok_or_else(|| {
            DispatchError::ParseFailure("response has no assistant message".to_string())
        })?;

        debug!(
            "{} answered with {} chars in {:?}",
            backend.id,
            text.len(),
            start.elapsed()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendIdentifier, Secret};
    use image::RgbaImage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}/v1/chat/completions", addr), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|l| {
                let lower = l.to_ascii_lowercase();
                lower
                    .strip_prefix("content-length:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + length
    }

    fn backend(endpoint: String, secret: &str) -> ResolvedBackend {
        ResolvedBackend {
            id: BackendIdentifier::Gpt,
            endpoint,
            secret: Secret::new(secret),
            model: "gpt-4o".to_string(),
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::new(RgbaImage::new(4, 4))
    }

    #[test]
    fn test_request_shape() {
        let body = build_request("llava", "data:image/png;base64,AAAA", "What is this?", "Be brief.", 300);
        assert_eq!(body["model"], "llava");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Be brief.");
        assert_eq!(body["messages"][1]["content"][0]["text"], "What is this?");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_image_data_url_prefix() {
        let url = image_data_url(&image()).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn test_image_data_url_reports_encoding_failure() {
        let empty = CapturedImage::new(RgbaImage::new(0, 0));
        let err = image_data_url(&empty).unwrap_err();
        assert!(matches!(err, DispatchError::Encoding(_)));
        assert!(err.to_string().starts_with("Could not encode the capture"));
    }

    #[test]
    fn test_extract_openai_envelope() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "A login form."}}]});
        assert_eq!(extract_message_text(&body).as_deref(), Some("A login form."));

        let parts = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "Two "},
            {"type": "text", "text": "buttons."}
        ]}}]});
        assert_eq!(extract_message_text(&parts).as_deref(), Some("Two buttons."));
    }

    #[test]
    fn test_extract_ollama_native_envelope() {
        let body = json!({"model": "llava", "message": {"role": "assistant", "content": "A cat."}, "done": true});
        assert_eq!(extract_message_text(&body).as_deref(), Some("A cat."));
    }

    #[test]
    fn test_extract_gemini_native_envelope() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "A chart"}, {"text": " of sales."}]}}]});
        assert_eq!(extract_message_text(&body).as_deref(), Some("A chart of sales."));
    }

    #[test]
    fn test_extract_unknown_envelope() {
        assert_eq!(extract_message_text(&json!({"result": "hi"})), None);
        assert_eq!(extract_message_text(&json!({"choices": [{"message": {"content": null}}]})), None);
    }

    #[tokio::test]
    async fn test_describe_success_sends_bearer() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"choices":[{"message":{"content":"A settings window."}}]}"#).await;
        let dispatcher = HttpDispatcher::new(&DispatchConfig::default()).unwrap();

        let text = dispatcher
            .describe(&image(), "Describe", "System", &backend(endpoint, "sk-abc"))
            .await
            .unwrap();
        assert_eq!(text, "A settings window.");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains("authorization: bearer sk-abc"));
        assert!(request.contains("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_describe_without_secret_sends_no_auth() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"message":{"content":"ok"}}"#).await;
        let dispatcher = HttpDispatcher::new(&DispatchConfig::default()).unwrap();

        dispatcher
            .describe(&image(), "Describe", "System", &backend(endpoint, ""))
            .await
            .unwrap();

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(!request.contains("authorization:"));
    }

    #[tokio::test]
    async fn test_describe_bad_status() {
        let (endpoint, server) = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let dispatcher = HttpDispatcher::new(&DispatchConfig::default()).unwrap();

        let err = dispatcher
            .describe(&image(), "Describe", "System", &backend(endpoint, "sk-wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::BadResponse(401));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_describe_malformed_body() {
        let (endpoint, server) = serve_once("200 OK", "<html>oops</html>").await;
        let dispatcher = HttpDispatcher::new(&DispatchConfig::default()).unwrap();

        let err = dispatcher
            .describe(&image(), "Describe", "System", &backend(endpoint, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ParseFailure(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_describe_unreachable() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = HttpDispatcher::new(&DispatchConfig::default()).unwrap();
        let err = dispatcher
            .describe(
                &image(),
                "Describe",
                "System",
                &backend(format!("http://{}/v1/chat/completions", addr), ""),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unreachable(_)));
    }
}
