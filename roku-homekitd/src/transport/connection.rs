//! Controller connections.
//!
//! Each connection runs one task that reads requests, answers them in order
//! through the router, and writes characteristic events in between. After
//! pair-verify the same task switches both directions to encrypted frames.

use std::sync::Arc;
use anyhow::{bail, Context, Result};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use crate::accessory::model::{iid, AID};
use crate::accessory::Accessory;
use super::hap;
use super::session::{FrameCodec, Session};
use super::wire;

/// Largest response body the router may produce
const MAX_RESPONSE: usize = 1024 * 1024;
/// Plaintext allowed to pile up without forming a complete request
const MAX_PENDING: usize = wire::MAX_BODY + 8 * 1024;

/// Accept controllers until cancelled, then wait for open connections to close.
pub async fn accept(listener: TcpListener, router: Router, accessory: Arc<Accessory>, cancel: CancellationToken) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!("Controller {} connected to {:?}", peer, accessory.info.name);
                connections.retain(|task| !task.is_finished());

                let router = router.clone();
                let accessory = accessory.clone();
                let cancel = cancel.child_token();
                connections.push(tokio::spawn(async move {
                    match serve(stream, router, accessory, cancel).await {
                        Ok(()) => tracing::debug!("Controller {} disconnected", peer),
                        Err(e) => tracing::debug!("Connection from {} closed: {:#}", peer, e),
                    }
                }));
            }
            Err(e) => tracing::warn!("Accept failed on {:?}: {}", accessory.info.name, e),
        }
    }

    futures::future::join_all(connections).await;
}

enum Step {
    Close,
    Read(std::io::Result<usize>),
    Changed(u64),
}

struct Connection<S> {
    stream: S,
    codec: Option<FrameCodec>,
    /// Encrypted bytes not yet forming a whole frame
    raw: Vec<u8>,
    plain: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    fn receive(&mut self, bytes: &[u8], session: &Session) -> Result<()> {
        if self.codec.is_none() {
            if let Some(keys) = session.take_pending_keys() {
                self.codec = Some(FrameCodec::new(&keys));
            }
        }

        match &mut self.codec {
            Some(codec) => {
                self.raw.extend_from_slice(bytes);
                let plain = codec.open(&mut self.raw)?;
                self.plain.extend_from_slice(&plain);
            }
            None => self.plain.extend_from_slice(bytes),
        }

        if self.plain.len() > MAX_PENDING {
            bail!("{} bytes without a complete request", self.plain.len());
        }
        Ok(())
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        let bytes = match &mut self.codec {
            Some(codec) => codec.seal(message)?,
            None => message.to_vec(),
        };
        self.stream.write_all(&bytes).await.context("write failed")?;
        self.stream.flush().await.context("flush failed")?;
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        self.codec.is_some()
    }
}

/// Serve one controller until it disconnects or `cancel` fires.
pub async fn serve<S>(stream: S, router: Router, accessory: Arc<Accessory>, cancel: CancellationToken) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let session = Arc::new(Session::default());
    let mut conn = Connection {
        stream,
        codec: None,
        raw: Vec::new(),
        plain: Vec::new(),
    };
    let mut active = accessory.television.active.subscribe();
    let mut identifier = accessory.television.active_identifier.subscribe();
    let mut buf = vec![0u8; 4096];

    loop {
        while let Some(request) = wire::take_request(&mut conn.plain)? {
            tracing::debug!("{} {}", request.method, request.path);
            let response = dispatch(&router, &session, request).await;
            conn.send(&response).await?;
        }

        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Close,
            read = conn.stream.read(&mut buf) => Step::Read(read),
            changed = active.changed() => match changed {
                Ok(()) => Step::Changed(iid::ACTIVE),
                Err(_) => Step::Close,
            },
            changed = identifier.changed() => match changed {
                Ok(()) => Step::Changed(iid::ACTIVE_IDENTIFIER),
                Err(_) => Step::Close,
            },
        };

        match step {
            Step::Close | Step::Read(Ok(0)) => break,
            Step::Read(Ok(n)) => conn.receive(&buf[..n], &session)?,
            Step::Read(Err(e)) => return Err(e).context("read failed"),
            Step::Changed(changed) => {
                // Events only go to verified sessions that asked for them
                if !conn.is_encrypted() || !session.wants_events(AID, changed) {
                    continue;
                }

                let value = if changed == iid::ACTIVE {
                    json!(*active.borrow() as u8)
                } else {
                    json!(*identifier.borrow())
                };
                let body = hap::event_body(AID, changed, value).to_string();
                conn.send(&wire::event(body.as_bytes())).await?;
            }
        }
    }

    Ok(())
}

async fn dispatch(router: &Router, session: &Arc<Session>, request: wire::Request) -> Vec<u8> {
    let mut builder = Request::builder()
        .method(request.method.as_str())
        .uri(request.path.as_str());
    if let Some(content_type) = &request.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
    }

    let mut http_request = match builder.body(Body::from(request.body)) {
        Ok(http_request) => http_request,
        Err(e) => {
            tracing::debug!("Rejecting request: {}", e);
            return wire::response(StatusCode::BAD_REQUEST, None, b"");
        }
    };
    http_request.extensions_mut().insert(session.clone());

    let response = match router.clone().oneshot(http_request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, MAX_RESPONSE).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to collect response body: {}", e);
            return wire::response(StatusCode::INTERNAL_SERVER_ERROR, None, b"");
        }
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    wire::response(parts.status, content_type, &body)
}
