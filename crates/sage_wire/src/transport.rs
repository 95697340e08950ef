//! Pluggable request/response carriers.
//!
//! The core is transport-agnostic: `send(signed request) → response`.
//! Adapters MUST carry headers in order and MUST NOT touch the body
//! after signing. No adapter retries — a signed request is nonce-bound,
//! and replaying it would only trip the peer's replay guard.
//!
//! Two reference bindings:
//!   - `HttpTransport` — reqwest client against a base URL
//!   - `LoopbackTransport` — in-process duplex over a tokio channel,
//!     the shape a streaming RPC binding takes

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::WireError;
use crate::http::{SignedRequest, SignedResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: SignedRequest,
        cancel: &CancellationToken,
    ) -> Result<SignedResponse, WireError>;
}

// ── HTTP binding ─────────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, WireError> {
        let client = reqwest::Client::builder()
            .user_agent("sage-agent/0.1")
            .build()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn dispatch(&self, request: SignedRequest) -> Result<SignedResponse, WireError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| WireError::Transport(format!("bad method: {e}")))?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| WireError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(n, v)| {
                (
                    n.as_str().to_owned(),
                    v.to_str().unwrap_or_default().to_owned(),
                )
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| WireError::Transport(e.to_string()))?
            .to_vec();

        Ok(SignedResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: SignedRequest,
        cancel: &CancellationToken,
    ) -> Result<SignedResponse, WireError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WireError::Cancelled),
            res = self.dispatch(request) => res,
        }
    }
}

// ── Loopback binding ─────────────────────────────────────────────────────────

/// The server side of a binding: consume a signed request, produce a
/// signed response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: SignedRequest) -> SignedResponse;
}

type LoopbackFrame = (SignedRequest, oneshot::Sender<SignedResponse>);

/// In-process duplex carrier. Frames flow through a bounded channel to
/// a serving task, mirroring a bidirectional stream.
#[derive(Clone)]
pub struct LoopbackTransport {
    tx: mpsc::Sender<LoopbackFrame>,
}

impl LoopbackTransport {
    /// Spawn a serving task around `handler` and return the client end.
    pub fn spawn(handler: Arc<dyn RequestHandler>) -> Self {
        let (tx, mut rx) = mpsc::channel::<LoopbackFrame>(32);
        tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let response = handler.handle(request).await;
                // Receiver gone means the caller was cancelled; drop.
                let _ = reply.send(response);
            }
        });
        Self { tx }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(
        &self,
        request: SignedRequest,
        cancel: &CancellationToken,
    ) -> Result<SignedResponse, WireError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| WireError::Transport("loopback peer gone".into()))?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WireError::Cancelled),
            res = reply_rx => res.map_err(|_| WireError::Transport("loopback peer dropped reply".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: SignedRequest) -> SignedResponse {
            SignedResponse::new(200).with_body(request.body)
        }
    }

    #[tokio::test]
    async fn loopback_roundtrip() {
        let transport = LoopbackTransport::spawn(Arc::new(Echo));
        let cancel = CancellationToken::new();
        let req = SignedRequest::new("POST", "/x").with_body(b"ping".to_vec());
        let resp = transport.send(req, &cancel).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"ping");
    }

    #[tokio::test]
    async fn loopback_respects_cancellation() {
        struct Slow;

        #[async_trait]
        impl RequestHandler for Slow {
            async fn handle(&self, _request: SignedRequest) -> SignedResponse {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                SignedResponse::new(200)
            }
        }

        let transport = LoopbackTransport::spawn(Arc::new(Slow));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = transport
            .send(SignedRequest::new("GET", "/"), &cancel)
            .await;
        assert!(matches!(res, Err(WireError::Cancelled)));
    }
}
