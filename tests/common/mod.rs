#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use fanboard::client::{Backend, ClientError, ClientResult};
use fanboard::models::{
    Attachment, AuthorInfo, Board, CommentResponse, CreateCommentRequest, CreatePostRequest, MyReactions,
    NewAttachment, ParentType, PostResponse, ReactionCounts, ToggleOutcome, UploadResponse,
};
use fanboard::notify::{SendEmailRequest, SendEmailResponse};

// ---------------- In-memory Backend (tests only) ----------------
#[derive(Default)]
struct MockState {
    posts: Vec<PostResponse>,
    comments: Vec<CommentResponse>,
    liked: HashSet<Uuid>,
    attachments: Vec<Attachment>,
    blobs: HashSet<String>,
    subscribed: HashSet<Uuid>,
    calls: Vec<String>,
    notifications: Vec<SendEmailRequest>,
    toggle_failures: VecDeque<bool>,
    blob_failures: HashSet<String>,
}

pub struct MockBackend {
    pub viewer: AuthorInfo,
    state: Mutex<MockState>,
}

fn not_found(what: &str) -> ClientError {
    ClientError::Api { status: 404, code: "not_found".into(), message: format!("{what} not found") }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            viewer: AuthorInfo { id: Uuid::new_v4(), display_name: "viewer".into(), avatar_url: None },
            state: Mutex::new(MockState::default()),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Queue outcomes for the next toggles: `true` makes that toggle fail
    pub fn queue_toggle_failures(&self, failures: impl IntoIterator<Item = bool>) {
        self.state.lock().unwrap().toggle_failures.extend(failures);
    }

    /// The next delete of each named blob fails
    pub fn queue_blob_failures<'a>(&self, paths: impl IntoIterator<Item = &'a str>) {
        self.state.lock().unwrap().blob_failures.extend(paths.into_iter().map(str::to_string));
    }

    pub fn seed_post(&self, post: PostResponse) {
        self.state.lock().unwrap().posts.push(post);
    }

    pub fn seed_comment(&self, comment: CommentResponse) {
        self.state.lock().unwrap().comments.push(comment);
    }

    pub fn seed_attachment(&self, parent_type: ParentType, parent_id: Uuid, storage_path: &str) -> Attachment {
        let attachment = Attachment {
            id: Uuid::new_v4(),
            parent_type,
            parent_id,
            storage_path: storage_path.to_string(),
            file_name: storage_path.to_string(),
            file_type: "image/png".into(),
            file_size: 3,
            author_id: self.viewer.id,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.blobs.insert(storage_path.to_string());
        state.attachments.push(attachment.clone());
        attachment
    }

    pub fn has_blob(&self, storage_path: &str) -> bool {
        self.state.lock().unwrap().blobs.contains(storage_path)
    }

    pub fn attachment_count(&self) -> usize {
        self.state.lock().unwrap().attachments.len()
    }

    pub fn has_post(&self, post_id: Uuid) -> bool {
        self.state.lock().unwrap().posts.iter().any(|p| p.id == post_id)
    }

    pub fn server_likes(&self, target: Uuid) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .posts
            .iter()
            .find(|p| p.id == target)
            .map(|p| p.likes_count)
            .or_else(|| state.comments.iter().find(|c| c.id == target).map(|c| c.likes_count))
    }

    pub fn notifications(&self) -> Vec<SendEmailRequest> {
        self.state.lock().unwrap().notifications.clone()
    }

    fn toggle(&self, target: Uuid) -> ClientResult<ToggleOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.toggle_failures.pop_front().unwrap_or(false) {
            return Err(ClientError::Api { status: 503, code: "unavailable".into(), message: "try later".into() });
        }
        let liked = if state.liked.remove(&target) {
            false
        } else {
            state.liked.insert(target);
            true
        };
        let delta = if liked { 1 } else { -1 };

        let count = if let Some(post) = state.posts.iter_mut().find(|p| p.id == target) {
            let count = (post.likes_count + delta).max(0);
            post.set_reaction_count("like", count);
            count
        } else if let Some(comment) = state.comments.iter_mut().find(|c| c.id == target) {
            let count = (comment.likes_count + delta).max(0);
            comment.set_reaction_count("like", count);
            count
        } else {
            return Err(not_found("target"));
        };
        Ok(ToggleOutcome { liked, count })
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn get_author(&self, user_id: Uuid) -> ClientResult<AuthorInfo> {
        self.record("get_author");
        Ok(AuthorInfo { id: user_id, display_name: format!("user-{}", &user_id.to_string()[..4]), avatar_url: None })
    }

    async fn list_posts(&self, _board_path: &str) -> ClientResult<Vec<PostResponse>> {
        self.record("list_posts");
        Ok(self.state.lock().unwrap().posts.clone())
    }

    async fn create_post(&self, _board_path: &str, req: &CreatePostRequest) -> ClientResult<PostResponse> {
        self.record("create_post");
        let post = PostResponse {
            id: Uuid::new_v4(),
            board_id: Uuid::nil(),
            title: req.title.clone(),
            content: req.content.clone(),
            color: req.color.clone(),
            is_anonymous: req.is_anonymous,
            author_id: (!req.is_anonymous).then_some(self.viewer.id),
            author: (!req.is_anonymous).then(|| self.viewer.clone()),
            reaction_counts: ReactionCounts::default(),
            likes_count: 0,
            comment_count: 0,
            attachments: Vec::new(),
            created_at: Utc::now(),
            client_token: req.client_token,
        };
        self.state.lock().unwrap().posts.push(post.clone());
        Ok(post)
    }

    async fn delete_post(&self, post_id: Uuid) -> ClientResult<()> {
        self.record("delete_post");
        let mut state = self.state.lock().unwrap();
        state.posts.retain(|p| p.id != post_id);
        state.comments.retain(|c| c.post_id != post_id);
        Ok(())
    }

    async fn list_comments(&self, post_id: Uuid) -> ClientResult<Vec<CommentResponse>> {
        self.record("list_comments");
        let state = self.state.lock().unwrap();
        Ok(state.comments.iter().filter(|c| c.post_id == post_id).cloned().collect())
    }

    async fn create_comment(&self, post_id: Uuid, req: &CreateCommentRequest) -> ClientResult<CommentResponse> {
        self.record("create_comment");
        let comment = CommentResponse {
            id: Uuid::new_v4(),
            post_id,
            parent_comment_id: req.parent_comment_id,
            content: req.content.clone(),
            author_id: (!req.is_anonymous).then_some(self.viewer.id),
            author: (!req.is_anonymous).then(|| self.viewer.clone()),
            is_anonymous: req.is_anonymous,
            is_deleted: false,
            reaction_counts: ReactionCounts::default(),
            likes_count: 0,
            attachments: Vec::new(),
            created_at: Utc::now(),
            client_token: req.client_token,
            is_mine: true,
        };
        self.state.lock().unwrap().comments.push(comment.clone());
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: Uuid) -> ClientResult<()> {
        self.record("delete_comment");
        let mut state = self.state.lock().unwrap();
        let comment = state.comments.iter_mut().find(|c| c.id == comment_id).ok_or_else(|| not_found("comment"))?;
        comment.redact();
        Ok(())
    }

    async fn toggle_post_reaction(&self, post_id: Uuid, _kind: &str) -> ClientResult<ToggleOutcome> {
        self.record("toggle_post_reaction");
        self.toggle(post_id)
    }

    async fn toggle_comment_reaction(&self, comment_id: Uuid, _kind: &str) -> ClientResult<ToggleOutcome> {
        self.record("toggle_comment_reaction");
        self.toggle(comment_id)
    }

    async fn my_board_reactions(&self, _board_path: &str) -> ClientResult<MyReactions> {
        self.record("my_board_reactions");
        let state = self.state.lock().unwrap();
        let mut mine = MyReactions::default();
        for post in state.posts.iter().filter(|p| state.liked.contains(&p.id)) {
            mine.targets.insert(post.id, vec!["like".into()]);
        }
        Ok(mine)
    }

    async fn my_comment_reactions(&self, post_id: Uuid) -> ClientResult<MyReactions> {
        self.record("my_comment_reactions");
        let state = self.state.lock().unwrap();
        let mut mine = MyReactions::default();
        for comment in state.comments.iter().filter(|c| c.post_id == post_id && state.liked.contains(&c.id)) {
            mine.targets.insert(comment.id, vec!["like".into()]);
        }
        Ok(mine)
    }

    async fn list_attachments(&self, parent_type: ParentType, parent_id: Uuid) -> ClientResult<Vec<Attachment>> {
        self.record("list_attachments");
        let state = self.state.lock().unwrap();
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.parent_type == parent_type && a.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn insert_attachment(&self, new: &NewAttachment) -> ClientResult<Attachment> {
        self.record("insert_attachment");
        let attachment = Attachment {
            id: Uuid::new_v4(),
            parent_type: new.parent_type,
            parent_id: new.parent_id,
            storage_path: new.storage_path.clone(),
            file_name: new.file_name.clone(),
            file_type: new.file_type.clone(),
            file_size: new.file_size,
            author_id: self.viewer.id,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachments(&self, ids: &[Uuid]) -> ClientResult<()> {
        self.record(format!("delete_attachments:{}", ids.len()));
        self.state.lock().unwrap().attachments.retain(|a| !ids.contains(&a.id));
        Ok(())
    }

    async fn upload_file(&self, file_name: &str, _bytes: Vec<u8>) -> ClientResult<UploadResponse> {
        self.record("upload_file");
        let storage_path = format!("{}-{}", Uuid::new_v4(), file_name);
        self.state.lock().unwrap().blobs.insert(storage_path.clone());
        Ok(UploadResponse { storage_path })
    }

    async fn delete_file(&self, storage_path: &str) -> ClientResult<()> {
        self.record(format!("delete_file:{storage_path}"));
        let mut state = self.state.lock().unwrap();
        if state.blob_failures.remove(storage_path) {
            return Err(ClientError::Api { status: 500, code: "storage_error".into(), message: "Storage error".into() });
        }
        state.blobs.remove(storage_path);
        Ok(())
    }

    async fn is_subscribed(&self, post_id: Uuid) -> ClientResult<bool> {
        self.record("is_subscribed");
        Ok(self.state.lock().unwrap().subscribed.contains(&post_id))
    }

    async fn set_subscribed(&self, post_id: Uuid, subscribed: bool) -> ClientResult<bool> {
        self.record("set_subscribed");
        let mut state = self.state.lock().unwrap();
        if subscribed {
            state.subscribed.insert(post_id);
        } else {
            state.subscribed.remove(&post_id);
        }
        Ok(subscribed)
    }

    async fn send_notification(&self, req: &SendEmailRequest) -> ClientResult<SendEmailResponse> {
        self.record("send_notification");
        self.state.lock().unwrap().notifications.push(req.clone());
        Ok(SendEmailResponse { sent: 1, failed: 0 })
    }
}

// ---------------- Fixtures ----------------
pub fn board() -> Board {
    Board {
        id: Uuid::new_v4(),
        url_path: "lofi-requests".into(),
        title: "Lofi requests".into(),
        description: String::new(),
        bio: String::new(),
        creator_name: "dj".into(),
        color: "#6366f1".into(),
        owner_id: Uuid::new_v4(),
        owner_email: Some("dj@example.com".into()),
        post_colors: Vec::new(),
        created_at: Utc::now(),
    }
}

pub fn post(board_id: Uuid, likes: i64) -> PostResponse {
    let mut counts = ReactionCounts::default();
    counts.set("like", likes);
    PostResponse {
        id: Uuid::new_v4(),
        board_id,
        title: "Play the intro song".into(),
        content: "please".into(),
        color: None,
        is_anonymous: false,
        author_id: Some(Uuid::new_v4()),
        author: None,
        reaction_counts: counts,
        likes_count: likes,
        comment_count: 0,
        attachments: Vec::new(),
        created_at: Utc::now(),
        client_token: None,
    }
}

/// A comment by someone other than the viewer, `age_mins` old
pub fn comment(post_id: Uuid, parent: Option<Uuid>, likes: i64, age_mins: i64) -> CommentResponse {
    let mut counts = ReactionCounts::default();
    counts.set("like", likes);
    CommentResponse {
        id: Uuid::new_v4(),
        post_id,
        parent_comment_id: parent,
        content: format!("comment {age_mins}"),
        author_id: Some(Uuid::new_v4()),
        author: None,
        is_anonymous: false,
        is_deleted: false,
        reaction_counts: counts,
        likes_count: likes,
        attachments: Vec::new(),
        created_at: Utc::now() - Duration::minutes(age_mins),
        client_token: None,
        is_mine: false,
    }
}
