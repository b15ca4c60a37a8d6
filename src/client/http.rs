//! [`Backend`] over the service's HTTP surface, plus the SSE change feed

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{
    header::ACCEPT,
    multipart::{Form, Part},
    Client, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Deserialize};
use uuid::Uuid;

use super::{Backend, ClientError, ClientResult};
use crate::feed::{ChangeEvent, FeedCursor, FeedFilter};
use crate::models::{
    Attachment, AuthorInfo, Board, CommentResponse, CreateCommentRequest, CreatePostRequest,
    DeleteAttachmentsRequest, MyReactions, NewAttachment, ParentType, PostResponse, RegisterRequest,
    RegisterResponse, SubscriptionStatus, ToggleOutcome, ToggleRequest, UploadResponse, User,
};
use crate::notify::{SendEmailRequest, SendEmailResponse};

/// What a feed subscription yields
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    /// Events were missed; refetch
    Resync,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

async fn check(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => ("http_error".to_string(), body),
    };
    Err(ClientError::Api { status: status.as_u16(), code, message })
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let body = check(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Create an account and return a backend signed in as it
    pub async fn register(base_url: impl Into<String>, req: &RegisterRequest) -> ClientResult<(Self, User)> {
        let backend = Self::new(base_url);
        let response = backend.client.post(backend.api("/users")).json(req).send().await?;
        let RegisterResponse { user, token } = decode(response).await?;
        Ok((backend.with_token(token), user))
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> ClientResult<T> {
        decode(self.authed(self.client.get(url)).send().await?).await
    }

    pub async fn get_board(&self, board_path: &str) -> ClientResult<Board> {
        self.get_json(self.api(&format!("/boards/{}", urlencoding::encode(board_path)))).await
    }

    pub async fn get_post(&self, post_id: Uuid) -> ClientResult<PostResponse> {
        self.get_json(self.api(&format!("/posts/{}", post_id))).await
    }

    /// Open the change feed. Pass the cursor of the last event seen to resume
    /// after a disconnect. The stream ends when the connection drops.
    pub async fn subscribe(
        &self,
        filter: &FeedFilter,
        last_event_id: Option<FeedCursor>,
    ) -> ClientResult<impl Stream<Item = ClientResult<FeedMessage>>> {
        let mut request = self
            .client
            .get(self.api("/realtime"))
            .query(&filter.to_query())
            .header(ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id.to_string());
        }
        let response = check(request.send().await?).await?;
        let bytes = response.bytes_stream();

        Ok(async_stream::stream! {
            let mut bytes = std::pin::pin!(bytes);
            let mut parser = SseParser::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in parser.push(&chunk) {
                            if let Some(message) = frame.into_message().transpose() {
                                yield message;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ClientError::Http(e));
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get_author(&self, user_id: Uuid) -> ClientResult<AuthorInfo> {
        self.get_json(self.api(&format!("/users/{}", user_id))).await
    }

    async fn list_posts(&self, board_path: &str) -> ClientResult<Vec<PostResponse>> {
        self.get_json(self.api(&format!("/boards/{}/posts", urlencoding::encode(board_path)))).await
    }

    async fn create_post(&self, board_path: &str, req: &CreatePostRequest) -> ClientResult<PostResponse> {
        let url = self.api(&format!("/boards/{}/posts", urlencoding::encode(board_path)));
        decode(self.authed(self.client.post(url)).json(req).send().await?).await
    }

    async fn delete_post(&self, post_id: Uuid) -> ClientResult<()> {
        let url = self.api(&format!("/posts/{}", post_id));
        check(self.authed(self.client.delete(url)).send().await?).await?;
        Ok(())
    }

    async fn list_comments(&self, post_id: Uuid) -> ClientResult<Vec<CommentResponse>> {
        self.get_json(self.api(&format!("/posts/{}/comments", post_id))).await
    }

    async fn create_comment(&self, post_id: Uuid, req: &CreateCommentRequest) -> ClientResult<CommentResponse> {
        let url = self.api(&format!("/posts/{}/comments", post_id));
        decode(self.authed(self.client.post(url)).json(req).send().await?).await
    }

    async fn delete_comment(&self, comment_id: Uuid) -> ClientResult<()> {
        let url = self.api(&format!("/comments/{}", comment_id));
        check(self.authed(self.client.delete(url)).send().await?).await?;
        Ok(())
    }

    async fn toggle_post_reaction(&self, post_id: Uuid, kind: &str) -> ClientResult<ToggleOutcome> {
        let url = self.api(&format!("/posts/{}/reactions/toggle", post_id));
        let body = ToggleRequest { reaction_type: Some(kind.to_string()) };
        decode(self.authed(self.client.post(url)).json(&body).send().await?).await
    }

    async fn toggle_comment_reaction(&self, comment_id: Uuid, kind: &str) -> ClientResult<ToggleOutcome> {
        let url = self.api(&format!("/comments/{}/reactions/toggle", comment_id));
        let body = ToggleRequest { reaction_type: Some(kind.to_string()) };
        decode(self.authed(self.client.post(url)).json(&body).send().await?).await
    }

    async fn my_board_reactions(&self, board_path: &str) -> ClientResult<MyReactions> {
        self.get_json(self.api(&format!("/boards/{}/reactions/mine", urlencoding::encode(board_path))))
            .await
    }

    async fn my_comment_reactions(&self, post_id: Uuid) -> ClientResult<MyReactions> {
        self.get_json(self.api(&format!("/posts/{}/comment-reactions/mine", post_id))).await
    }

    async fn list_attachments(&self, parent_type: ParentType, parent_id: Uuid) -> ClientResult<Vec<Attachment>> {
        let request = self
            .client
            .get(self.api("/attachments"))
            .query(&[("parent_type", parent_type.to_string()), ("parent_id", parent_id.to_string())]);
        decode(self.authed(request).send().await?).await
    }

    async fn insert_attachment(&self, new: &NewAttachment) -> ClientResult<Attachment> {
        decode(self.authed(self.client.post(self.api("/attachments"))).json(new).send().await?).await
    }

    async fn delete_attachments(&self, ids: &[Uuid]) -> ClientResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = DeleteAttachmentsRequest { ids: ids.to_vec() };
        check(self.authed(self.client.delete(self.api("/attachments"))).json(&body).send().await?).await?;
        Ok(())
    }

    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse> {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("fileName", file_name.to_string());
        let url = format!("{}/upload", self.base_url);
        decode(self.authed(self.client.post(url)).multipart(form).send().await?).await
    }

    async fn delete_file(&self, storage_path: &str) -> ClientResult<()> {
        let url = format!("{}/file/{}", self.base_url, urlencoding::encode(storage_path));
        check(self.authed(self.client.delete(url)).send().await?).await?;
        Ok(())
    }

    async fn is_subscribed(&self, post_id: Uuid) -> ClientResult<bool> {
        let status: SubscriptionStatus = self.get_json(self.api(&format!("/posts/{}/subscription", post_id))).await?;
        Ok(status.subscribed)
    }

    async fn set_subscribed(&self, post_id: Uuid, subscribed: bool) -> ClientResult<bool> {
        let url = self.api(&format!("/posts/{}/subscription", post_id));
        let request = if subscribed { self.client.put(url) } else { self.client.delete(url) };
        let status: SubscriptionStatus = decode(self.authed(request).send().await?).await?;
        Ok(status.subscribed)
    }

    async fn send_notification(&self, req: &SendEmailRequest) -> ClientResult<SendEmailResponse> {
        let url = format!("{}/functions/v1/send-email", self.base_url);
        decode(self.authed(self.client.post(url)).json(req).send().await?).await
    }
}

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    /// `Ok(None)` for events this client does not understand
    pub fn into_message(self) -> ClientResult<Option<FeedMessage>> {
        match self.event.as_str() {
            "change" => Ok(Some(FeedMessage::Change(serde_json::from_str(&self.data)?))),
            "resync" => Ok(Some(FeedMessage::Resync)),
            _ => Ok(None),
        }
    }
}

/// Incremental `text/event-stream` parser. Accepts LF and CRLF line endings.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Feed a chunk, returning every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            let line = String::from_utf8_lossy(&raw);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (&*line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event: event.unwrap_or_else(|| "message".to_string()), data, id })
    }
}
