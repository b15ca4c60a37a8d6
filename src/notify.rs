//! Email notifications
//!
//! `POST /functions/v1/send-email` renders one templated email per recipient
//! and hands it to the transactional email provider. All emails about a post
//! share a deterministic Message-ID so mail clients thread them together.

use anyhow::Result;
use axum::{extract::State, Json};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    config::EmailConfig,
    error::{self, AppError},
    AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewPost,
    NewComment,
    NewReply,
    NewReaction,
}

/// What happened, as reported by the client that caused it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    /// Comment or post body excerpt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub post_id: Uuid,
    pub post_title: String,
    pub board_path: String,
    #[serde(default)]
    pub activity_data: ActivityData,
    /// Set when the board creator should be notified as well
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_creator_email: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEmailResponse {
    pub sent: usize,
    pub failed: usize,
}

/// A rendered email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// `<post-{id}@{domain}>`
pub fn thread_message_id(post_id: Uuid, mail_domain: &str) -> String {
    format!("<post-{}@{}>", post_id, mail_domain)
}

/// Threading headers: the new-post email opens the thread, the rest reply to it
pub fn threading_headers(kind: NotificationType, post_id: Uuid, mail_domain: &str) -> BTreeMap<String, String> {
    let id = thread_message_id(post_id, mail_domain);
    let mut headers = BTreeMap::new();
    if kind == NotificationType::NewPost {
        headers.insert("Message-ID".to_string(), id);
    } else {
        headers.insert("In-Reply-To".to_string(), id.clone());
        headers.insert("References".to_string(), id);
    }
    headers
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const EXCERPT_CHARS: usize = 280;

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

/// Render the email for one notification
pub fn render(req: &SendEmailRequest, site_url: &str) -> EmailContent {
    let actor = req
        .activity_data
        .actor_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("Someone");
    let board = req.board_path.trim_matches('/');
    let link = format!("{}/{}?post={}", site_url.trim_end_matches('/'), board, req.post_id);

    let (subject, headline) = match req.kind {
        NotificationType::NewPost => (
            format!("New request on /{}: {}", board, req.post_title),
            format!("{} posted a new request", actor),
        ),
        NotificationType::NewComment => (
            format!("New comment on \"{}\"", req.post_title),
            format!("{} commented on \"{}\"", actor, req.post_title),
        ),
        NotificationType::NewReply => (
            format!("New reply on \"{}\"", req.post_title),
            format!("{} replied to a comment on \"{}\"", actor, req.post_title),
        ),
        NotificationType::NewReaction => {
            let kind = req.activity_data.reaction_type.as_deref().unwrap_or("like");
            (
                format!("Someone reacted to \"{}\"", req.post_title),
                format!("{} left a {} on \"{}\"", actor, kind, req.post_title),
            )
        }
    };

    let body = req.activity_data.content.as_deref().map(excerpt).filter(|b| !b.is_empty());

    let mut text = format!("{}\n\n", headline);
    if let Some(body) = &body {
        text.push_str(body);
        text.push_str("\n\n");
    }
    text.push_str(&format!("View it: {}\n", link));

    let mut html = format!("<p>{}</p>", escape_html(&headline));
    if let Some(body) = &body {
        html.push_str(&format!("<blockquote>{}</blockquote>", escape_html(body)));
    }
    html.push_str(&format!(
        "<p><a href=\"{}\">View on the board</a></p>",
        escape_html(&link)
    ));

    EmailContent { subject, html, text }
}

/// Client for the email provider's HTTP API
#[derive(Clone)]
pub struct Mailer {
    client: Client,
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { client: Client::new(), config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Send one email
    pub async fn send(
        &self,
        to: &str,
        content: &EmailContent,
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let url = format!("{}/emails", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": [to],
                "subject": content.subject,
                "html": content.html,
                "text": content.text,
                "headers": headers,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            anyhow::bail!("Email provider returned {}: {}", status, error);
        }
        Ok(())
    }

    /// Send the same notification to every recipient; failures are counted
    /// and logged, never retried
    pub async fn dispatch(
        &self,
        req: &SendEmailRequest,
        site_url: &str,
        recipients: &[String],
    ) -> SendEmailResponse {
        let content = render(req, site_url);
        let headers = threading_headers(req.kind, req.post_id, &self.config.mail_domain);

        let results = futures::future::join_all(
            recipients.iter().map(|to| self.send(to, &content, &headers)),
        )
        .await;

        let mut outcome = SendEmailResponse::default();
        for (to, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => outcome.sent += 1,
                Err(e) => {
                    tracing::warn!("Failed to send {:?} email to {}: {}", req.kind, to, e);
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

/// Subscriber addresses minus the actor, plus the board creator when asked.
/// Duplicates (case-insensitive) are dropped.
pub fn collect_recipients(
    subscribers: impl IntoIterator<Item = (Uuid, String)>,
    actor_id: Uuid,
    creator_email: Option<&str>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut recipients = Vec::new();

    let subscribers = subscribers
        .into_iter()
        .filter(|(user_id, _)| *user_id != actor_id)
        .map(|(_, email)| email);

    for email in subscribers.chain(creator_email.map(str::to_string)) {
        let email = email.trim().to_string();
        if email.is_empty() {
            continue;
        }
        if seen.insert(email.to_lowercase()) {
            recipients.push(email);
        }
    }
    recipients
}

/// `POST /functions/v1/send-email`
///
/// The caller is the actor and never receives their own notification.
/// The board creator's address is resolved from the board itself; the
/// request field only asks for the creator to be included.
pub async fn send_email_handler(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(req): Json<SendEmailRequest>,
) -> error::Result<Json<SendEmailResponse>> {
    if req.post_title.trim().is_empty() {
        return Err(AppError::BadRequest("postTitle is required".to_string()));
    }

    let post = state.db.get_post_row(req.post_id).await?;
    let board = state.db.get_board(post.board_id).await?;

    let subscribers = state.db.subscriber_emails(post.id).await?;
    let creator = match (&req.board_creator_email, board.owner_email.as_deref()) {
        (Some(_), Some(owner)) if board.owner_id != auth.id => Some(owner),
        _ => None,
    };
    let recipients = collect_recipients(
        subscribers.into_iter().map(|s| (s.user_id, s.email)),
        auth.id,
        creator,
    );

    if recipients.is_empty() {
        return Ok(Json(SendEmailResponse::default()));
    }
    if !state.mailer.is_configured() {
        tracing::warn!(
            "Email provider not configured, dropping {:?} notification for {} recipients",
            req.kind,
            recipients.len()
        );
        return Ok(Json(SendEmailResponse { sent: 0, failed: recipients.len() }));
    }

    let outcome = state.mailer.dispatch(&req, &state.config.server.site_url, &recipients).await;
    tracing::info!(
        "{:?} notification for post {}: {} sent, {} failed",
        req.kind,
        req.post_id,
        outcome.sent,
        outcome.failed
    );

    Ok(Json(outcome))
}
