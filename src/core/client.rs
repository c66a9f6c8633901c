//! Async client for a running translation server, with retry and fallback logic

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::config::ClientConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{
    Document, ErrorResponse, HealthResponse, TranslationRequest, TranslationResponse,
};

/// Outcome of translating a whole document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub translated: usize,
    /// Blocks that kept their source text
    pub failed: usize,
}

/// Async translation client with bounded concurrency
#[derive(Debug, Clone)]
pub struct TranslationClient {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
    semaphore: Arc<Semaphore>,
}

impl TranslationClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(config.max_concurrent)
            .build()?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        Ok(Self {
            client,
            config: Arc::new(config),
            semaphore,
        })
    }

    /// Check the server; returns the model it reports
    pub async fn health(&self) -> Result<String> {
        let response = self
            .client
            .get(self.config.url("health"))
            .send()
            .await
            .map_err(|e| TranslationError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let health: HealthResponse =
            response
                .json()
                .await
                .map_err(|e| TranslationError::InvalidResponseError {
                    message: e.to_string(),
                })?;

        info!("Successfully connected to translation server");
        Ok(health.model)
    }

    /// Translate a single text, retrying transient failures
    pub async fn translate(&self, text: &str) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| TranslationError::InternalError(e.to_string()))?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.config.retry_delay_ms, attempt);
                debug!("Retry attempt {} in {:?}", attempt, delay);
                sleep(delay).await;
            }

            match self.send_request(text).await {
                Ok(translation) => {
                    if attempt > 0 {
                        info!("Successfully translated after {} retries", attempt);
                    }
                    return Ok(translation);
                }
                Err(e) => {
                    // Client errors will not get better on retry
                    let permanent = matches!(
                        e,
                        TranslationError::ApiError { status, .. } if (400..500).contains(&status)
                    );
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TranslationError::InternalError("no translation attempt was made".to_string())
        }))
    }

    /// Send actual HTTP request
    async fn send_request(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(self.config.url("translate"))
            .json(&TranslationRequest::new(text))
            .send()
            .await
            .map_err(|e| TranslationError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();

        if status.is_success() {
            let body: TranslationResponse =
                response
                    .json()
                    .await
                    .map_err(|e| TranslationError::InvalidResponseError {
                        message: e.to_string(),
                    })?;
            Ok(body.translated_text)
        } else {
            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);

            Err(TranslationError::ApiError {
                status: status_code,
                message,
            })
        }
    }

    /// Translate every text block of `document` in place. Blocks that fail
    /// permanently keep their source text.
    pub async fn translate_document<F>(&self, document: &mut Document, mut on_done: F) -> BatchStats
    where
        F: FnMut(usize),
    {
        let mut tasks = JoinSet::new();

        for (index, block) in document.blocks().enumerate() {
            if !block.kind.is_text() || block.text.trim().is_empty() {
                continue;
            }
            let client = self.clone();
            let text = block.text.clone();
            tasks.spawn(async move { (index, client.translate(&text).await) });
        }

        let mut translations = Vec::with_capacity(tasks.len());
        let mut stats = BatchStats::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(translation))) => {
                    stats.translated += 1;
                    translations.push((index, translation));
                }
                Ok((index, Err(e))) => {
                    stats.failed += 1;
                    warn!("Failed to translate block {}: {}", index, e);
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("Translation task failed: {}", e);
                }
            }
            on_done(stats.translated + stats.failed);
        }

        translations.sort_by_key(|(index, _)| *index);
        let mut pending = translations.into_iter().peekable();
        for (index, block) in document.blocks_mut().enumerate() {
            if let Some((_, translation)) = pending.next_if(|(i, _)| *i == index) {
                block.text = translation;
            }
        }

        stats
    }

    /// Number of text blocks `translate_document` will send
    pub fn pending_blocks(document: &Document) -> usize {
        document
            .blocks()
            .filter(|b| b.kind.is_text() && !b.text.trim().is_empty())
            .count()
    }
}

/// `base_ms * 2^(attempt - 1)`, saturating instead of overflowing
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Block, BlockKind, Chapter};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serve `app` on an ephemeral port and return its base URL
    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(endpoint: String) -> ClientConfig {
        ClientConfig {
            endpoint,
            max_concurrent: 2,
            max_retries: 2,
            retry_delay_ms: 1,
            timeout_ms: 5000,
        }
    }

    async fn upper(Json(req): Json<TranslationRequest>) -> Json<TranslationResponse> {
        Json(TranslationResponse {
            translated_text: req.text.to_uppercase(),
            source_text: req.text,
        })
    }

    #[tokio::test]
    async fn test_translate_and_health() {
        let app = Router::new()
            .route("/translate", post(upper))
            .route("/health", get(|| async { Json(HealthResponse::healthy("stub")) }));
        let client = TranslationClient::new(config(spawn_server(app).await)).unwrap();

        assert_eq!(client.health().await.unwrap(), "stub");
        assert_eq!(client.translate("hello").await.unwrap(), "HELLO");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/translate",
            post(move |Json(req): Json<TranslationRequest>| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                            Json(ErrorResponse {
                                error: "busy".to_string(),
                            }),
                        ))
                    } else {
                        Ok(upper(Json(req)).await)
                    }
                }
            }),
        );
        let client = TranslationClient::new(config(spawn_server(app).await)).unwrap();

        assert_eq!(client.translate("again").await.unwrap(), "AGAIN");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/translate",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        axum::http::StatusCode::BAD_REQUEST,
                        Json(ErrorResponse {
                            error: "Text cannot be empty".to_string(),
                        }),
                    )
                }
            }),
        );
        let client = TranslationClient::new(config(spawn_server(app).await)).unwrap();

        match client.translate(" ").await {
            Err(TranslationError::ApiError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Text cannot be empty");
            }
            other => panic!("expected api error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_translate_document_keeps_order_and_images() {
        let app = Router::new().route("/translate", post(upper));
        let client = TranslationClient::new(config(spawn_server(app).await)).unwrap();

        let mut doc = Document::new(vec![
            Chapter::new(vec![
                Block::new(BlockKind::Title, "one"),
                Block::new(BlockKind::Image, "images/a.jpg"),
                Block::paragraph("two"),
            ]),
            Chapter::new(vec![Block::paragraph("three")]),
        ]);
        assert_eq!(TranslationClient::pending_blocks(&doc), 3);

        let mut progress = 0;
        let stats = client.translate_document(&mut doc, |done| progress = done).await;

        assert_eq!(stats, BatchStats { translated: 3, failed: 0 });
        assert_eq!(progress, 3);
        let texts: Vec<&str> = doc.blocks().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["ONE", "images/a.jpg", "TWO", "THREE"]);
    }

    #[tokio::test]
    async fn test_unreachable_server_keeps_source_text() {
        let mut cfg = config("http://127.0.0.1:9".to_string());
        cfg.max_retries = 0;
        let client = TranslationClient::new(cfg).unwrap();

        let mut doc = Document::new(vec![Chapter::new(vec![Block::paragraph("keep me")])]);
        let stats = client.translate_document(&mut doc, |_| {}).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(doc.chapters[0].blocks[0].text, "keep me");
    }

    #[test]
    fn test_backoff_delay_doubles_and_saturates() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1000, 80), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(u64::MAX / 2, 5), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_excessive_retries_rejected() {
        let mut cfg = config("http://localhost".to_string());
        cfg.max_retries = 100;
        assert!(TranslationClient::new(cfg).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut cfg = config("http://localhost".to_string());
        cfg.max_concurrent = 0;
        assert!(TranslationClient::new(cfg).is_err());
    }
}
