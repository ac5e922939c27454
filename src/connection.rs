use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result, ScalarError};
use crate::protocol::Request;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Performs single logical calls against a device
///
/// Unary calls are HTTP POSTs; duplex calls open a WebSocket, send one request and
/// either read one response or keep reading pushed frames until told to stop.
/// No call is ever retried here.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    connect_timeout: Duration,
    request_timeout: Duration,
    heartbeat_interval: Duration,
}

impl Transport {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            heartbeat_interval: config.heartbeat_interval,
        })
    }

    /// POST one request and return the decoded response body
    pub async fn unary(&self, url: &Url, request: &Request) -> Result<Value> {
        tracing::debug!("POST {} {}", url, serde_json::to_string(request)?);

        let response = self
            .http
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(classify_http)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify_http)?;

        if !status.is_success() {
            let error = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(DeviceError::from_value));
            tracing::error!("Got !200 response ({}) from {}", status, url);
            return Err(ScalarError::Status {
                status: status.as_u16(),
                error,
            });
        }

        let value: Value = serde_json::from_slice(&body)?;
        tracing::debug!("Received: {}", value);
        Ok(value)
    }

    /// Open a WebSocket, send one request, read exactly one frame and close
    pub async fn duplex(&self, url: &Url, request: &Request) -> Result<Value> {
        let mut ws = self.open(url).await?;
        send_request(&mut ws, request).await?;

        let frame = match timeout(self.request_timeout, next_frame(&mut ws)).await {
            Ok(frame) => frame,
            Err(_) => Err(ScalarError::Timeout),
        };

        if let Err(e) = ws.close(None).await {
            tracing::debug!("Closing {} failed: {}", url, e);
        }
        frame
    }

    /// Open a WebSocket, send one request and forward every frame to `consumer`
    ///
    /// Runs until `stop` flips to true (or its sender goes away), returning `Ok(())`,
    /// or until the connection fails. Silence for a whole heartbeat interval counts
    /// as connection loss; a ping goes out every half interval to keep a live
    /// device talking.
    pub async fn duplex_listen(
        &self,
        url: &Url,
        request: &Request,
        stop: &mut watch::Receiver<bool>,
        consumer: &mut (dyn FnMut(Value) -> Result<()> + Send),
    ) -> Result<()> {
        let mut ws = self.open(url).await?;
        send_request(&mut ws, request).await?;

        let period = (self.heartbeat_interval / 2).max(Duration::from_millis(10));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if last_seen.elapsed() >= self.heartbeat_interval {
                        tracing::warn!("No frame from {} within {:?}", url, self.heartbeat_interval);
                        return Err(ScalarError::Timeout);
                    }
                    ws.send(Message::Ping(Vec::new())).await?;
                }
                msg = ws.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!("Received push from {}: {}", url, text);
                            consumer(serde_json::from_str(&text)?)?;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            consumer(serde_json::from_slice(&bytes)?)?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("WebSocket connection to {} closed", url);
                            return Err(ScalarError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error on {}: {}", url, e);
                            return Err(e.into());
                        }
                    }
                }
            }
        }

        tracing::debug!("Stopped listening on {}", url);
        if let Err(e) = ws.close(None).await {
            tracing::debug!("Closing {} failed: {}", url, e);
        }
        Ok(())
    }

    async fn open(&self, url: &Url) -> Result<WsStream> {
        tracing::info!("Connecting to {}", url);
        match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ScalarError::Timeout),
        }
    }
}

async fn send_request(ws: &mut WsStream, request: &Request) -> Result<()> {
    let json = serde_json::to_string(request)?;
    tracing::debug!("Sending: {}", json);
    ws.send(Message::Text(json)).await?;
    Ok(())
}

/// Next JSON frame, skipping control frames
async fn next_frame(ws: &mut WsStream) -> Result<Value> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                tracing::debug!("Received: {}", text);
                return Ok(serde_json::from_str(&text)?);
            }
            Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
            Message::Close(_) => return Err(ScalarError::ConnectionClosed),
            _ => {}
        }
    }
    Err(ScalarError::ConnectionClosed)
}

fn classify_http(e: reqwest::Error) -> ScalarError {
    if e.is_timeout() {
        ScalarError::Timeout
    } else {
        ScalarError::Http(e)
    }
}
