use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pawlink_types::api::{
    ConversationSummary, ErrorBody, HistoryResponse, MarkReadRequest, MarkReadResponse,
    SendMessageRequest,
};
use pawlink_types::events::{GatewayCommand, GatewayEvent};
use pawlink_types::models::Message;

use crate::error::ClientError;

/// REST calls the session makes.
#[allow(async_fn_in_trait)]
pub trait ChatApi {
    async fn list_conversations(&self, email: &str) -> Result<Vec<ConversationSummary>, ClientError>;

    async fn history(&self, conversation_id: Uuid, email: &str) -> Result<HistoryResponse, ClientError>;

    async fn send_message(&self, req: SendMessageRequest) -> Result<Message, ClientError>;

    async fn mark_read(&self, conversation_id: Uuid, email: &str) -> Result<u64, ClientError>;
}

/// Room membership commands over the live channel.
pub trait RoomLink {
    fn join(&self, conversation_id: Uuid) -> Result<(), ClientError>;

    fn join_all(&self, conversation_ids: Vec<Uuid>) -> Result<(), ClientError>;

    fn leave(&self, conversation_id: Uuid) -> Result<(), ClientError>;
}

// -- REST --

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Resolve (and, for approved requests, create) the conversation for an
    /// adoption. `None` while the adoption is not approved.
    pub async fn conversation_for_adoption(
        &self,
        adoption_id: Uuid,
        email: &str,
    ) -> Result<Option<ConversationSummary>, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/by-adoption/{}", adoption_id)))
            .query(&[("userEmail", email)])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn a non-2xx response into `ClientError::Api`.
async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let (code, message) = match resp.json::<ErrorBody>().await {
        Ok(body) => (body.error, body.message),
        Err(_) => ("http_error".to_string(), status.to_string()),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, email: &str) -> Result<Vec<ConversationSummary>, ClientError> {
        let resp = self
            .client
            .get(self.url("/conversations"))
            .query(&[("email", email)])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn history(&self, conversation_id: Uuid, email: &str) -> Result<HistoryResponse, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{}/messages", conversation_id)))
            .query(&[("userEmail", email)])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn send_message(&self, req: SendMessageRequest) -> Result<Message, ClientError> {
        let resp = self.client.post(self.url("/messages")).json(&req).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn mark_read(&self, conversation_id: Uuid, email: &str) -> Result<u64, ClientError> {
        let resp = self
            .client
            .put(self.url(&format!("/conversations/{}/read", conversation_id)))
            .json(&MarkReadRequest {
                user_email: email.to_string(),
            })
            .send()
            .await?;
        let ack: MarkReadResponse = check(resp).await?.json().await?;
        Ok(ack.updated)
    }
}

// -- Live channel --

/// Write half of a live connection. Commands are queued to a writer task so
/// sending never blocks the caller.
#[derive(Debug, Clone)]
pub struct GatewayLink {
    commands: mpsc::UnboundedSender<GatewayCommand>,
}

impl GatewayLink {
    /// Open the live channel. Returns the link and the stream of server
    /// events; the stream ends when the socket closes.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayEvent>), ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Gateway(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<GatewayCommand>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode command: {}", e);
                        continue;
                    }
                };
                if sink.send(WsMessage::text(text)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                match frame {
                    WsMessage::Text(text) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unrecognised gateway event: {}", e),
                    },
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            debug!("Gateway stream ended");
        });

        info!("Connected to gateway {}", url);
        Ok((Self { commands: cmd_tx }, event_rx))
    }

    /// Connect with exponential backoff, doubling from `initial_delay` and
    /// giving up after `attempts` tries.
    pub async fn connect_with_retry(
        url: &str,
        attempts: u32,
        initial_delay: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayEvent>), ClientError> {
        let mut delay = initial_delay;
        let mut last_err = ClientError::Gateway("no connection attempts made".into());

        for attempt in 1..=attempts {
            match Self::connect(url).await {
                Ok(connected) => return Ok(connected),
                Err(e) => {
                    warn!("Gateway connect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(last_err)
    }

    fn send(&self, cmd: GatewayCommand) -> Result<(), ClientError> {
        self.commands
            .send(cmd)
            .map_err(|_| ClientError::Gateway("connection closed".into()))
    }
}

impl RoomLink for GatewayLink {
    fn join(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        self.send(GatewayCommand::Join { conversation_id })
    }

    fn join_all(&self, conversation_ids: Vec<Uuid>) -> Result<(), ClientError> {
        self.send(GatewayCommand::JoinAll { conversation_ids })
    }

    fn leave(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        self.send(GatewayCommand::Leave { conversation_id })
    }
}
