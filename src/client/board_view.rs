//! A board's post list

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::attachments::{self, PendingFile, SubmissionLimits};
use super::toggle::{self, ReactionState, Reactable};
use super::{notify_best_effort, Backend, ClientError, ClientResult, FeedMessage};
use crate::feed::{ChangeEvent, ChangeKind, FeedCursor, FeedFilter, Record, Table};
use crate::models::{
    Attachment, AuthorInfo, Board, CreatePostRequest, ParentType, PostResponse, ToggleOutcome, LIKE,
};
use crate::notify::{ActivityData, NotificationType, SendEmailRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostSort {
    #[default]
    Newest,
    Oldest,
    MostLiked,
}

/// A request being written
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub is_anonymous: bool,
    pub files: Vec<PendingFile>,
}

pub struct BoardView {
    board_id: Uuid,
    board_path: String,
    owner_email: Option<String>,
    viewer: Option<AuthorInfo>,
    posts: Vec<PostResponse>,
    liked: HashSet<Uuid>,
    sort: PostSort,
    exit_delay: Duration,
    exiting: HashMap<Uuid, Instant>,
    cursor: Option<FeedCursor>,
    needs_refetch: bool,
    limits: SubmissionLimits,
}

impl BoardView {
    pub fn new(board: &Board, viewer: Option<AuthorInfo>) -> Self {
        Self {
            board_id: board.id,
            board_path: board.url_path.clone(),
            owner_email: board.owner_email.clone(),
            viewer,
            posts: Vec::new(),
            liked: HashSet::new(),
            sort: PostSort::default(),
            exit_delay: Duration::ZERO,
            exiting: HashMap::new(),
            cursor: None,
            needs_refetch: false,
            limits: SubmissionLimits::default(),
        }
    }

    /// Keep deleted posts around this long so they can animate out
    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    pub fn with_submission_limit(mut self, limit: u64) -> Self {
        self.limits.total = limit;
        self
    }

    /// Per-file limit, normally the server's `MAX_FILE_SIZE`
    pub fn with_file_limit(mut self, limit: u64) -> Self {
        self.limits.per_file = limit;
        self
    }

    /// Feed scope for this view
    pub fn filter(&self) -> FeedFilter {
        FeedFilter::board(self.board_id).with_tables(&[Table::Posts, Table::Reactions, Table::Attachments])
    }

    /// (Re)load posts and the viewer's likes
    pub async fn load(&mut self, backend: &dyn Backend) -> ClientResult<()> {
        self.posts = backend.list_posts(&self.board_path).await?;
        self.liked.clear();
        if self.viewer.is_some() {
            let mine = backend.my_board_reactions(&self.board_path).await?;
            self.liked = mine
                .targets
                .into_iter()
                .filter(|(_, kinds)| kinds.iter().any(|k| k == LIKE))
                .map(|(id, _)| id)
                .collect();
        }
        self.exiting.clear();
        self.needs_refetch = false;
        self.cursor = None;
        self.resort();
        Ok(())
    }

    pub fn posts(&self) -> &[PostResponse] {
        &self.posts
    }

    pub fn post(&self, id: Uuid) -> Option<&PostResponse> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn is_liked(&self, id: Uuid) -> bool {
        self.liked.contains(&id)
    }

    /// Deleted, waiting for [`tick`](Self::tick) to drop it
    pub fn is_exiting(&self, id: Uuid) -> bool {
        self.exiting.contains_key(&id)
    }

    pub fn needs_refetch(&self) -> bool {
        self.needs_refetch
    }

    /// Last event applied, for resuming the feed after a disconnect
    pub fn cursor(&self) -> Option<FeedCursor> {
        self.cursor
    }

    pub fn sort(&self) -> PostSort {
        self.sort
    }

    pub fn set_sort(&mut self, sort: PostSort) {
        self.sort = sort;
        self.resort();
    }

    fn resort(&mut self) {
        match self.sort {
            PostSort::Newest => self.posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            PostSort::Oldest => self.posts.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            PostSort::MostLiked => self.posts.sort_by(|a, b| {
                b.likes_count.cmp(&a.likes_count).then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }
    }

    /// Insert or replace, matching on id or on the writer's client token.
    /// Attachments already shown are kept; removals arrive as their own events.
    fn merge_post(&mut self, mut post: PostResponse) {
        let existing = self.posts.iter_mut().find(|p| {
            p.id == post.id || (post.client_token.is_some() && p.client_token == post.client_token)
        });
        match existing {
            Some(slot) => {
                for attachment in slot.attachments.drain(..) {
                    if !post.attachments.iter().any(|a| a.id == attachment.id) {
                        post.attachments.push(attachment);
                    }
                }
                *slot = post;
            }
            None => self.posts.push(post),
        }
    }

    fn remove_post(&mut self, id: Uuid, now: Instant) {
        if self.exit_delay.is_zero() {
            self.posts.retain(|p| p.id != id);
            self.liked.remove(&id);
        } else if self.posts.iter().any(|p| p.id == id) {
            self.exiting.insert(id, now + self.exit_delay);
        }
    }

    /// Drop posts whose exit delay has passed
    pub fn tick(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .exiting
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.exiting.remove(&id);
            self.posts.retain(|p| p.id != id);
            self.liked.remove(&id);
        }
    }

    pub fn apply_message(&mut self, message: FeedMessage, now: Instant) {
        match message {
            FeedMessage::Change(event) => {
                self.apply_event(&event, now);
            }
            FeedMessage::Resync => {
                self.cursor = None;
                self.needs_refetch = true;
            }
        }
    }

    /// Merge one change. Returns false when the event was ignored.
    pub fn apply_event(&mut self, event: &ChangeEvent, now: Instant) -> bool {
        if self.cursor.is_some_and(|c| !c.precedes(event)) || event.board_id != self.board_id {
            return false;
        }
        self.cursor = Some(event.cursor());

        match (&event.record, event.kind) {
            (Record::Posts(post), ChangeKind::Insert | ChangeKind::Update) => {
                if event.kind == ChangeKind::Update && self.post(post.id).is_none() {
                    return false;
                }
                self.merge_post(post.clone());
            }
            (Record::Posts(post), ChangeKind::Delete) => self.remove_post(post.id, now),
            (Record::Reactions(reaction), kind) => {
                let mine = self.viewer.as_ref().map(|v| v.id) == Some(reaction.user_id);
                if !mine || reaction.reaction_type != LIKE {
                    return false;
                }
                match kind {
                    ChangeKind::Delete => self.liked.remove(&reaction.post_id),
                    _ => self.liked.insert(reaction.post_id),
                };
            }
            (Record::Attachments(attachment), kind) if attachment.parent_type == ParentType::Post => {
                self.apply_attachment(attachment, kind);
            }
            _ => return false,
        }

        self.resort();
        true
    }

    fn apply_attachment(&mut self, attachment: &Attachment, kind: ChangeKind) {
        let Some(post) = self.posts.iter_mut().find(|p| p.id == attachment.parent_id) else {
            return;
        };
        match kind {
            ChangeKind::Delete => post.attachments.retain(|a| a.id != attachment.id),
            _ => {
                if !post.attachments.iter().any(|a| a.id == attachment.id) {
                    post.attachments.push(attachment.clone());
                }
            }
        }
    }

    /// Create a request with its files. Files are checked against the
    /// submission limit before anything is sent.
    pub async fn create_post(&mut self, backend: &dyn Backend, draft: PostDraft) -> ClientResult<PostResponse> {
        attachments::validate_submission(&draft.files, self.limits)?;
        let req = CreatePostRequest {
            title: draft.title,
            content: draft.content,
            color: draft.color,
            is_anonymous: draft.is_anonymous,
            client_token: Some(Uuid::new_v4()),
        };
        req.validate().map_err(ClientError::Validation)?;

        let mut post = backend.create_post(&self.board_path, &req).await?;
        if !draft.files.is_empty() {
            let rows = attachments::upload_all(backend, ParentType::Post, post.id, draft.files).await?;
            for row in rows {
                if !post.attachments.iter().any(|a| a.id == row.id) {
                    post.attachments.push(row);
                }
            }
        }
        self.merge_post(post.clone());
        self.resort();

        notify_best_effort(
            backend,
            SendEmailRequest {
                kind: NotificationType::NewPost,
                post_id: post.id,
                post_title: post.title.clone(),
                board_path: self.board_path.clone(),
                activity_data: ActivityData {
                    actor_name: self.actor_name(req.is_anonymous),
                    content: Some(post.content.clone()),
                    reaction_type: None,
                },
                board_creator_email: self.owner_email.clone(),
            },
        )
        .await;

        Ok(post)
    }

    /// Delete a post: its files and its comments' files first, then the post
    pub async fn delete_post(&mut self, backend: &dyn Backend, post_id: Uuid) -> ClientResult<()> {
        attachments::delete_post_cascade(backend, post_id).await?;
        self.posts.retain(|p| p.id != post_id);
        self.liked.remove(&post_id);
        self.exiting.remove(&post_id);
        Ok(())
    }

    /// Optimistic like toggle
    pub async fn toggle_like(&mut self, backend: &dyn Backend, post_id: Uuid) -> ClientResult<ToggleOutcome> {
        let pending = toggle::begin(self, post_id)
            .ok_or_else(|| ClientError::Validation(format!("Unknown post {}", post_id)))?;
        let result = backend.toggle_post_reaction(post_id, LIKE).await;
        let outcome = toggle::settle(self, pending, result)?;
        self.resort();

        if outcome.liked {
            if let Some(post) = self.post(post_id) {
                let req = SendEmailRequest {
                    kind: NotificationType::NewReaction,
                    post_id,
                    post_title: post.title.clone(),
                    board_path: self.board_path.clone(),
                    activity_data: ActivityData {
                        actor_name: self.actor_name(false),
                        content: None,
                        reaction_type: Some(LIKE.to_string()),
                    },
                    board_creator_email: None,
                };
                notify_best_effort(backend, req).await;
            }
        }
        Ok(outcome)
    }

    fn actor_name(&self, anonymous: bool) -> Option<String> {
        if anonymous {
            return Some("Anonymous".to_string());
        }
        self.viewer.as_ref().map(|v| v.display_name.clone())
    }
}

impl Reactable for BoardView {
    fn reaction_state(&self, target: Uuid) -> Option<ReactionState> {
        self.post(target).map(|p| ReactionState { liked: self.is_liked(target), count: p.likes_count })
    }

    fn set_reaction_state(&mut self, target: Uuid, state: ReactionState) {
        if state.liked {
            self.liked.insert(target);
        } else {
            self.liked.remove(&target);
        }
        if let Some(post) = self.posts.iter_mut().find(|p| p.id == target) {
            post.set_reaction_count(LIKE, state.count);
        }
    }
}
