//! WebSocket transport: one connection per `eth_subscribe` subscription.
//!
//! Reconnecting is not done here. A dropped socket is reported once on the
//! subscription's error channel and the head tracker decides when to
//! subscribe again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainhead_core::error::TrackerError;
use chainhead_core::job::Job;
use chainhead_core::transport::{HeadTransport, LogSubscriber, Subscription};
use chainhead_core::types::{BlockHeader, BlockMarker};

use crate::subscriptions::{
    log_filter, parse_inbound, subscribe_request, unsubscribe_request, Inbound, SubscriptionId,
    SubscriptionKind,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// How long to wait for the node to answer `eth_subscribe`.
    pub subscribe_timeout: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

/// A raw log delivered for a job's log subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLog {
    pub job_id: String,
    pub log: Value,
}

/// `eth_subscribe` transport for new heads and job logs.
pub struct WsTransport {
    url: String,
    config: WsClientConfig,
    logs: mpsc::UnboundedSender<JobLog>,
    req_id: AtomicU64,
}

impl WsTransport {
    /// Create a transport for `url`. Logs from every job subscription arrive
    /// on the returned receiver.
    pub fn new(
        url: impl Into<String>,
        config: WsClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<JobLog>) {
        let (logs, rx) = mpsc::unbounded_channel();
        let transport = Self {
            url: url.into(),
            config,
            logs,
            req_id: AtomicU64::new(1),
        };
        (transport, rx)
    }

    fn next_id(&self) -> u64 {
        self.req_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Connect and complete the `eth_subscribe` handshake.
    async fn open(
        &self,
        kind: &SubscriptionKind,
    ) -> Result<(WsStream, SubscriptionId), TrackerError> {
        debug!(url = %self.url, kind = kind.name(), "connecting via WebSocket");
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TrackerError::Subscription(format!("connect to {}: {e}", self.url)))?;

        let id = self.next_id();
        let req = subscribe_request(id, kind);
        ws.send(Message::Text(req.to_string().into()))
            .await
            .map_err(|e| TrackerError::Subscription(e.to_string()))?;

        let sub_id = time::timeout(self.config.subscribe_timeout, await_subscription_id(&mut ws, id))
            .await
            .map_err(|_| {
                TrackerError::Subscription(format!(
                    "no eth_subscribe response within {:?}",
                    self.config.subscribe_timeout
                ))
            })??;
        Ok((ws, sub_id))
    }

    /// Spawn the read loop that forwards notifications for `sub_id`.
    ///
    /// `forward` returns `false` once its receiver is gone, which ends the
    /// subscription without reporting an error.
    fn spawn_reader<F>(
        &self,
        ws: WsStream,
        sub_id: SubscriptionId,
        subscription: &Subscription,
        errors: oneshot::Sender<TrackerError>,
        mut forward: F,
    ) where
        F: FnMut(Value) -> bool + Send + 'static,
    {
        let url = self.url.clone();
        let cancel: CancellationToken = subscription.token();
        let unsubscribe_id = self.next_id();

        tokio::spawn(async move {
            let (mut sink, mut stream) = ws.split();

            let failure = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let req = unsubscribe_request(unsubscribe_id, &sub_id);
                        let _ = sink.send(Message::Text(req.to_string().into())).await;
                        let _ = sink.close().await;
                        debug!(url = %url, subscription = %sub_id, "unsubscribed");
                        return;
                    }
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(Inbound::Notification { subscription, result }) = parse_inbound(&text) {
                                if subscription == sub_id && !forward(result) {
                                    debug!(url = %url, subscription = %sub_id, "receiver dropped, closing");
                                    let _ = sink.close().await;
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break format!("connection closed by node: {frame:?}");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("websocket error: {e}"),
                        None => break "websocket stream ended".to_string(),
                    },
                }
            };

            warn!(url = %url, subscription = %sub_id, reason = %failure, "subscription lost");
            let _ = errors.send(TrackerError::Subscription(failure));
        });
    }
}

async fn await_subscription_id(ws: &mut WsStream, id: u64) -> Result<SubscriptionId, TrackerError> {
    loop {
        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(TrackerError::Subscription(
                    "connection closed during eth_subscribe".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TrackerError::Subscription(e.to_string())),
        };
        match parse_inbound(&text) {
            Some(Inbound::Response { id: got, result }) if got == id => {
                let result = result.map_err(|msg| {
                    TrackerError::Subscription(format!("eth_subscribe rejected: {msg}"))
                })?;
                return result
                    .as_str()
                    .map(|s| SubscriptionId(s.to_string()))
                    .ok_or_else(|| {
                        TrackerError::Subscription(format!("unexpected subscription id: {result}"))
                    });
            }
            _ => continue,
        }
    }
}

#[async_trait]
impl HeadTransport for WsTransport {
    async fn subscribe_new_heads(
        &self,
        sink: mpsc::UnboundedSender<BlockHeader>,
    ) -> Result<Subscription, TrackerError> {
        let (ws, sub_id) = self.open(&SubscriptionKind::NewHeads).await?;
        info!(url = %self.url, subscription = %sub_id, "subscribed to new heads");

        let (subscription, errors) = Subscription::channel();
        let url = self.url.clone();
        self.spawn_reader(ws, sub_id, &subscription, errors, move |result| {
            match BlockHeader::from_json(&result) {
                Ok(header) => sink.send(header).is_ok(),
                Err(err) => {
                    warn!(url = %url, error = %err, "dropping malformed header");
                    true
                }
            }
        });
        Ok(subscription)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LogSubscriber for WsTransport {
    async fn subscribe_logs(
        &self,
        job: &Job,
        from: Option<&BlockMarker>,
    ) -> Result<Subscription, TrackerError> {
        let filter = log_filter(job, from);
        let (ws, sub_id) = self.open(&SubscriptionKind::Logs(filter)).await?;
        info!(url = %self.url, job = %job.id, subscription = %sub_id, "subscribed to job logs");

        let (subscription, errors) = Subscription::channel();
        let logs = self.logs.clone();
        let job_id = job.id.clone();
        self.spawn_reader(ws, sub_id, &subscription, errors, move |log| {
            logs.send(JobLog {
                job_id: job_id.clone(),
                log,
            })
            .is_ok()
        });
        Ok(subscription)
    }
}
