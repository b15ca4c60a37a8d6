//! One post's comment thread
//!
//! Top-level comments are ordered in three groups: comments written during
//! this session (newest first), then the viewer's own comments, then
//! everyone else's; the last two by likes, ties newest first. Replies are
//! chronological. Until a thread is expanded it shows every session reply
//! plus the first two others.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

use super::attachments::{self, PendingFile, SubmissionLimits};
use super::toggle::{self, ReactionState, Reactable};
use super::{notify_best_effort, Backend, ClientError, ClientResult, FeedMessage};
use crate::feed::{ChangeEvent, ChangeKind, FeedCursor, FeedFilter, Record, Table};
use crate::models::{
    Attachment, AuthorInfo, CommentResponse, CreateCommentRequest, ParentType, PostResponse,
    ToggleOutcome, LIKE,
};
use crate::notify::{ActivityData, NotificationType, SendEmailRequest};

/// Non-session replies shown before "N more replies"
pub const VISIBLE_REPLIES: usize = 2;

/// A comment or reply being written
#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub is_anonymous: bool,
    pub files: Vec<PendingFile>,
}

/// Replies of one comment as currently displayed
#[derive(Debug)]
pub struct ReplyListing<'a> {
    pub visible: Vec<&'a CommentResponse>,
    pub hidden: usize,
}

impl ReplyListing<'_> {
    pub fn more_label(&self) -> Option<String> {
        match self.hidden {
            0 => None,
            1 => Some("1 more reply".to_string()),
            n => Some(format!("{} more replies", n)),
        }
    }
}

fn group(comment: &CommentResponse, session: &HashSet<Uuid>, viewer: Option<Uuid>) -> u8 {
    if session.contains(&comment.id) {
        0
    } else if comment.is_mine || (viewer.is_some() && comment.author_id == viewer) {
        1
    } else {
        2
    }
}

/// Ordering of top-level comments
pub fn compare_comments(
    a: &CommentResponse,
    b: &CommentResponse,
    session: &HashSet<Uuid>,
    viewer: Option<Uuid>,
) -> Ordering {
    let (ga, gb) = (group(a, session, viewer), group(b, session, viewer));
    ga.cmp(&gb).then_with(|| {
        if ga == 0 {
            b.created_at.cmp(&a.created_at)
        } else {
            b.likes_count
                .cmp(&a.likes_count)
                .then_with(|| b.created_at.cmp(&a.created_at))
        }
    })
}

pub struct PostView {
    post: PostResponse,
    post_deleted: bool,
    board_path: String,
    viewer: Option<AuthorInfo>,
    comments: Vec<CommentResponse>,
    session: HashSet<Uuid>,
    liked: HashSet<Uuid>,
    expanded: HashSet<Uuid>,
    subscribed: bool,
    cursor: Option<FeedCursor>,
    needs_refetch: bool,
    limits: SubmissionLimits,
}

impl PostView {
    pub fn new(post: PostResponse, board_path: impl Into<String>, viewer: Option<AuthorInfo>) -> Self {
        Self {
            post,
            post_deleted: false,
            board_path: board_path.into(),
            viewer,
            comments: Vec::new(),
            session: HashSet::new(),
            liked: HashSet::new(),
            expanded: HashSet::new(),
            subscribed: false,
            cursor: None,
            needs_refetch: false,
            limits: SubmissionLimits::default(),
        }
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

    pub fn filter(&self) -> FeedFilter {
        FeedFilter::post(self.post.id).with_tables(&[
            Table::Posts,
            Table::Comments,
            Table::CommentReactions,
            Table::Attachments,
            Table::Subscriptions,
        ])
    }

    /// (Re)load comments, the viewer's likes and subscription state.
    /// The session set survives reloads.
    pub async fn load(&mut self, backend: &dyn Backend) -> ClientResult<()> {
        self.comments = backend.list_comments(self.post.id).await?;
        self.liked.clear();
        if self.viewer.is_some() {
            let mine = backend.my_comment_reactions(self.post.id).await?;
            self.liked = mine
                .targets
                .into_iter()
                .filter(|(_, kinds)| kinds.iter().any(|k| k == LIKE))
                .map(|(id, _)| id)
                .collect();
            self.subscribed = backend.is_subscribed(self.post.id).await?;
        }
        self.needs_refetch = false;
        self.cursor = None;
        Ok(())
    }

    pub fn post(&self) -> &PostResponse {
        &self.post
    }

    /// The post was deleted while the view was open
    pub fn post_deleted(&self) -> bool {
        self.post_deleted
    }

    pub fn comments(&self) -> &[CommentResponse] {
        &self.comments
    }

    pub fn comment(&self, id: Uuid) -> Option<&CommentResponse> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn is_session(&self, id: Uuid) -> bool {
        self.session.contains(&id)
    }

    pub fn is_liked(&self, id: Uuid) -> bool {
        self.liked.contains(&id)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn needs_refetch(&self) -> bool {
        self.needs_refetch
    }

    /// Last event applied, for resuming the feed after a disconnect
    pub fn cursor(&self) -> Option<FeedCursor> {
        self.cursor
    }

    /// Top-level comments in display order
    pub fn top_level(&self) -> Vec<&CommentResponse> {
        let viewer = self.viewer.as_ref().map(|v| v.id);
        let mut top: Vec<&CommentResponse> = self.comments.iter().filter(|c| !c.is_reply()).collect();
        top.sort_by(|a, b| compare_comments(a, b, &self.session, viewer));
        top
    }

    /// Replies of `parent` as displayed
    pub fn replies(&self, parent: Uuid) -> ReplyListing<'_> {
        let mut all: Vec<&CommentResponse> = self
            .comments
            .iter()
            .filter(|c| c.parent_comment_id == Some(parent))
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        if self.expanded.contains(&parent) {
            return ReplyListing { visible: all, hidden: 0 };
        }

        let mut shown_others = 0;
        let mut hidden = 0;
        let mut visible = Vec::with_capacity(all.len());
        for reply in all {
            if self.session.contains(&reply.id) {
                visible.push(reply);
            } else if shown_others < VISIBLE_REPLIES {
                shown_others += 1;
                visible.push(reply);
            } else {
                hidden += 1;
            }
        }
        ReplyListing { visible, hidden }
    }

    pub fn expand(&mut self, parent: Uuid) {
        self.expanded.insert(parent);
    }

    pub fn collapse(&mut self, parent: Uuid) {
        self.expanded.remove(&parent);
    }

    fn merge_comment(&mut self, mut comment: CommentResponse) {
        if comment.is_deleted {
            comment.redact();
        }
        let existing = self.comments.iter_mut().find(|c| {
            c.id == comment.id || (comment.client_token.is_some() && c.client_token == comment.client_token)
        });
        match existing {
            Some(slot) => {
                comment.is_mine |= slot.is_mine;
                if !comment.is_deleted {
                    for attachment in slot.attachments.drain(..) {
                        if !comment.attachments.iter().any(|a| a.id == attachment.id) {
                            comment.attachments.push(attachment);
                        }
                    }
                }
                *slot = comment;
            }
            None => self.comments.push(comment),
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
    pub fn apply_event(&mut self, event: &ChangeEvent, _now: Instant) -> bool {
        if self.cursor.is_some_and(|c| !c.precedes(event)) || event.post_id != Some(self.post.id) {
            return false;
        }
        self.cursor = Some(event.cursor());
        let viewer = self.viewer.as_ref().map(|v| v.id);

        match (&event.record, event.kind) {
            (Record::Posts(post), ChangeKind::Delete) if post.id == self.post.id => self.post_deleted = true,
            (Record::Posts(post), _) if post.id == self.post.id => self.post = post.clone(),
            (Record::Comments(comment), ChangeKind::Insert) => self.merge_comment(comment.clone()),
            (Record::Comments(comment), ChangeKind::Update) => {
                if self.comment(comment.id).is_none() {
                    return false;
                }
                self.merge_comment(comment.clone());
            }
            (Record::Comments(comment), ChangeKind::Delete) => {
                self.comments.retain(|c| c.id != comment.id);
            }
            (Record::CommentReactions(reaction), kind) => {
                if viewer != Some(reaction.user_id) || reaction.reaction_type != LIKE {
                    return false;
                }
                match kind {
                    ChangeKind::Delete => self.liked.remove(&reaction.comment_id),
                    _ => self.liked.insert(reaction.comment_id),
                };
            }
            (Record::Attachments(attachment), kind) => self.apply_attachment(attachment, kind),
            (Record::Subscriptions(sub), kind) if viewer == Some(sub.user_id) => {
                self.subscribed = kind != ChangeKind::Delete;
            }
            _ => return false,
        }
        true
    }

    fn apply_attachment(&mut self, attachment: &Attachment, kind: ChangeKind) {
        let list = match attachment.parent_type {
            ParentType::Post if attachment.parent_id == self.post.id => &mut self.post.attachments,
            ParentType::Comment => match self.comments.iter_mut().find(|c| c.id == attachment.parent_id) {
                Some(comment) if !comment.is_deleted => &mut comment.attachments,
                _ => return,
            },
            _ => return,
        };
        match kind {
            ChangeKind::Delete => list.retain(|a| a.id != attachment.id),
            _ => {
                if !list.iter().any(|a| a.id == attachment.id) {
                    list.push(attachment.clone());
                }
            }
        }
    }

    /// Post a comment or reply with its files. It joins the session set, so
    /// it is shown first (or stays visible inside a collapsed thread).
    pub async fn add_comment(&mut self, backend: &dyn Backend, draft: CommentDraft) -> ClientResult<CommentResponse> {
        attachments::validate_submission(&draft.files, self.limits)?;
        let req = CreateCommentRequest {
            content: draft.content,
            parent_comment_id: draft.parent_comment_id,
            is_anonymous: draft.is_anonymous,
            client_token: Some(Uuid::new_v4()),
        };
        req.validate().map_err(ClientError::Validation)?;
        if let Some(parent) = req.parent_comment_id.and_then(|id| self.comment(id)) {
            if parent.is_reply() {
                return Err(ClientError::Validation("Replies can only go one level deep".to_string()));
            }
        }

        let mut comment = backend.create_comment(self.post.id, &req).await?;
        self.session.insert(comment.id);
        if !draft.files.is_empty() {
            let rows = attachments::upload_all(backend, ParentType::Comment, comment.id, draft.files).await?;
            for row in rows {
                if !comment.attachments.iter().any(|a| a.id == row.id) {
                    comment.attachments.push(row);
                }
            }
        }
        self.merge_comment(comment.clone());

        let kind = if comment.is_reply() { NotificationType::NewReply } else { NotificationType::NewComment };
        let actor_name = if req.is_anonymous {
            Some("Anonymous".to_string())
        } else {
            self.viewer.as_ref().map(|v| v.display_name.clone())
        };
        notify_best_effort(
            backend,
            SendEmailRequest {
                kind,
                post_id: self.post.id,
                post_title: self.post.title.clone(),
                board_path: self.board_path.clone(),
                activity_data: ActivityData { actor_name, content: Some(comment.content.clone()), reaction_type: None },
                board_creator_email: None,
            },
        )
        .await;

        Ok(comment)
    }

    /// Remove the comment's files, then soft-delete it. Replies stay.
    pub async fn delete_comment(&mut self, backend: &dyn Backend, comment_id: Uuid) -> ClientResult<()> {
        attachments::delete_comment_cascade(backend, comment_id).await?;
        if let Some(comment) = self.comments.iter_mut().find(|c| c.id == comment_id) {
            comment.redact();
        }
        Ok(())
    }

    /// Optimistic like toggle on a comment or reply
    pub async fn toggle_like(&mut self, backend: &dyn Backend, comment_id: Uuid) -> ClientResult<ToggleOutcome> {
        if self.comment(comment_id).map(|c| c.is_deleted).unwrap_or(false) {
            return Err(ClientError::Validation("Cannot react to a deleted comment".to_string()));
        }
        let pending = toggle::begin(self, comment_id)
            .ok_or_else(|| ClientError::Validation(format!("Unknown comment {}", comment_id)))?;
        let result = backend.toggle_comment_reaction(comment_id, LIKE).await;
        toggle::settle(self, pending, result)
    }

    pub async fn set_subscribed(&mut self, backend: &dyn Backend, subscribed: bool) -> ClientResult<bool> {
        self.subscribed = backend.set_subscribed(self.post.id, subscribed).await?;
        Ok(self.subscribed)
    }
}

impl Reactable for PostView {
    fn reaction_state(&self, target: Uuid) -> Option<ReactionState> {
        self.comment(target).map(|c| ReactionState { liked: self.is_liked(target), count: c.likes_count })
    }

    fn set_reaction_state(&mut self, target: Uuid, state: ReactionState) {
        if state.liked {
            self.liked.insert(target);
        } else {
            self.liked.remove(&target);
        }
        if let Some(comment) = self.comments.iter_mut().find(|c| c.id == target) {
            comment.set_reaction_count(LIKE, state.count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReactionCounts;
    use chrono::{Duration, Utc};

    fn comment(post_id: Uuid, parent: Option<Uuid>, likes: i64, age_mins: i64) -> CommentResponse {
        let mut counts = ReactionCounts::default();
        counts.set(LIKE, likes);
        CommentResponse {
            id: Uuid::new_v4(),
            post_id,
            parent_comment_id: parent,
            content: "hi".into(),
            author_id: Some(Uuid::new_v4()),
            author: None,
            is_anonymous: false,
            is_deleted: false,
            likes_count: likes,
            reaction_counts: counts,
            attachments: Vec::new(),
            created_at: Utc::now() - Duration::minutes(age_mins),
            client_token: None,
            is_mine: false,
        }
    }

    fn sample_post(id: Uuid) -> PostResponse {
        PostResponse {
            id,
            board_id: Uuid::new_v4(),
            title: "Play the intro".into(),
            content: String::new(),
            color: None,
            is_anonymous: false,
            author_id: None,
            author: None,
            likes_count: 0,
            reaction_counts: ReactionCounts::default(),
            comment_count: 0,
            attachments: Vec::new(),
            created_at: Utc::now(),
            client_token: None,
        }
    }

    #[test]
    fn test_three_sort_groups() {
        let post_id = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut session = HashSet::new();

        let popular = comment(post_id, None, 50, 30);
        let mut mine = comment(post_id, None, 1, 20);
        mine.author_id = Some(me);
        let fresh = comment(post_id, None, 0, 0);
        session.insert(fresh.id);

        let mut list = vec![&popular, &mine, &fresh];
        list.sort_by(|a, b| compare_comments(a, b, &session, Some(me)));
        let order: Vec<Uuid> = list.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![fresh.id, mine.id, popular.id]);
    }

    #[test]
    fn test_own_anonymous_comment_sorts_with_mine() {
        let post_id = Uuid::new_v4();
        let me = Uuid::new_v4();
        let session = HashSet::new();

        let mut anonymous = comment(post_id, None, 0, 5);
        anonymous.author_id = None;
        anonymous.is_anonymous = true;
        anonymous.is_mine = true;
        let popular = comment(post_id, None, 10, 5);

        assert_eq!(compare_comments(&anonymous, &popular, &session, Some(me)), Ordering::Less);
    }

    #[test]
    fn test_merge_keeps_ownership_from_listing() {
        let post_id = Uuid::new_v4();
        let mut view = PostView::new(sample_post(post_id), "lofi", None);
        let mut listed = comment(post_id, None, 0, 5);
        listed.is_mine = true;
        view.merge_comment(listed.clone());

        // feed events never carry ownership
        let mut echoed = listed.clone();
        echoed.is_mine = false;
        echoed.set_reaction_count(LIKE, 4);
        view.merge_comment(echoed);

        let merged = view.comment(listed.id).unwrap();
        assert!(merged.is_mine);
        assert_eq!(merged.likes_count, 4);
    }

    #[test]
    fn test_likes_tie_breaks_newest_first() {
        let post_id = Uuid::new_v4();
        let older = comment(post_id, None, 2, 10);
        let newer = comment(post_id, None, 2, 1);
        let session = HashSet::new();
        assert_eq!(compare_comments(&newer, &older, &session, None), Ordering::Less);
    }

    #[test]
    fn test_more_label() {
        assert_eq!(ReplyListing { visible: vec![], hidden: 0 }.more_label(), None);
        assert_eq!(ReplyListing { visible: vec![], hidden: 1 }.more_label().as_deref(), Some("1 more reply"));
        assert_eq!(ReplyListing { visible: vec![], hidden: 4 }.more_label().as_deref(), Some("4 more replies"));
    }
}
