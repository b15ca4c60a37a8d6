//! Board activity list
//!
//! Built from insert events on posts, comments and post reactions. Authors
//! are cached by id; reaction rows carry no profile, so the first reaction
//! by a user costs one lookup.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::{Backend, ClientResult};
use crate::feed::{ChangeEvent, ChangeKind, FeedCursor, FeedFilter, Record, Table};
use crate::models::AuthorInfo;

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 50;
const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Post,
    Comment,
    Reply,
    Reaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub post_id: Uuid,
    /// The post, comment or reacted-to post
    pub target_id: Uuid,
    /// Unset for anonymous activity
    pub actor_id: Option<Uuid>,
    pub actor: Option<AuthorInfo>,
    pub excerpt: String,
    pub at: DateTime<Utc>,
}

fn shorten(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(EXCERPT_CHARS).collect();
    short.push('…');
    short
}

pub struct ActivityStream {
    board_id: Uuid,
    capacity: usize,
    entries: VecDeque<ActivityEntry>,
    authors: HashMap<Uuid, AuthorInfo>,
    cursor: Option<FeedCursor>,
}

impl ActivityStream {
    pub fn new(board_id: Uuid) -> Self {
        Self::with_capacity(board_id, DEFAULT_ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(board_id: Uuid, capacity: usize) -> Self {
        Self {
            board_id,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            authors: HashMap::new(),
            cursor: None,
        }
    }

    pub fn filter(&self) -> FeedFilter {
        FeedFilter::board(self.board_id).with_tables(&[Table::Posts, Table::Comments, Table::Reactions])
    }

    /// Most recent first
    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remember(&mut self, author: Option<&AuthorInfo>) {
        if let Some(author) = author {
            self.authors.insert(author.id, author.clone());
        }
    }

    /// Record an insert event. Returns the actor id when its profile is not
    /// known yet.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Option<Uuid> {
        if self.cursor.is_some_and(|c| !c.precedes(event)) || event.board_id != self.board_id {
            return None;
        }
        self.cursor = Some(event.cursor());
        if event.kind != ChangeKind::Insert {
            return None;
        }

        let entry = match &event.record {
            Record::Posts(post) => {
                self.remember(post.author.as_ref());
                ActivityEntry {
                    kind: ActivityKind::Post,
                    post_id: post.id,
                    target_id: post.id,
                    actor_id: post.author_id,
                    actor: None,
                    excerpt: shorten(&post.title),
                    at: post.created_at,
                }
            }
            Record::Comments(comment) => {
                self.remember(comment.author.as_ref());
                ActivityEntry {
                    kind: if comment.is_reply() { ActivityKind::Reply } else { ActivityKind::Comment },
                    post_id: comment.post_id,
                    target_id: comment.id,
                    actor_id: comment.author_id,
                    actor: None,
                    excerpt: shorten(&comment.content),
                    at: comment.created_at,
                }
            }
            Record::Reactions(reaction) => ActivityEntry {
                kind: ActivityKind::Reaction,
                post_id: reaction.post_id,
                target_id: reaction.post_id,
                actor_id: Some(reaction.user_id),
                actor: None,
                excerpt: reaction.reaction_type.clone(),
                at: reaction.created_at,
            },
            _ => return None,
        };

        let mut entry = entry;
        let missing = match entry.actor_id {
            Some(id) => match self.authors.get(&id) {
                Some(author) => {
                    entry.actor = Some(author.clone());
                    None
                }
                None => Some(id),
            },
            None => None,
        };

        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        missing
    }

    /// Attach a fetched profile to every entry by that actor
    pub fn fill_author(&mut self, author: AuthorInfo) {
        for entry in self.entries.iter_mut().filter(|e| e.actor_id == Some(author.id)) {
            entry.actor = Some(author.clone());
        }
        self.authors.insert(author.id, author);
    }

    /// Apply an event and fetch the actor's profile if needed
    pub async fn ingest(&mut self, backend: &dyn Backend, event: &ChangeEvent) -> ClientResult<()> {
        if let Some(user_id) = self.apply_event(event) {
            let author = backend.get_author(user_id).await?;
            self.fill_author(author);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeFeed;
    use crate::models::Reaction;

    fn reaction(feed: &ChangeFeed, board_id: Uuid, user_id: Uuid) -> ChangeEvent {
        let post_id = Uuid::new_v4();
        feed.publish(
            ChangeKind::Insert,
            board_id,
            Some(post_id),
            None,
            Record::Reactions(Reaction { post_id, user_id, reaction_type: "like".into(), created_at: Utc::now() }),
        )
    }

    #[test]
    fn test_capped_most_recent_first() {
        let feed = ChangeFeed::new(16, 16);
        let board_id = Uuid::new_v4();
        let mut stream = ActivityStream::with_capacity(board_id, 2);

        let events: Vec<ChangeEvent> = (0..3).map(|_| reaction(&feed, board_id, Uuid::new_v4())).collect();
        for event in &events {
            stream.apply_event(event);
        }

        assert_eq!(stream.len(), 2);
        let actors: Vec<Option<Uuid>> = stream.entries().map(|e| e.actor_id).collect();
        let expected: Vec<Option<Uuid>> = events[1..]
            .iter()
            .rev()
            .map(|e| match &e.record {
                Record::Reactions(r) => Some(r.user_id),
                _ => None,
            })
            .collect();
        assert_eq!(actors, expected);
    }

    #[test]
    fn test_unknown_actor_is_reported_once_filled() {
        let feed = ChangeFeed::new(16, 16);
        let board_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut stream = ActivityStream::new(board_id);

        assert_eq!(stream.apply_event(&reaction(&feed, board_id, user_id)), Some(user_id));
        stream.fill_author(AuthorInfo { id: user_id, display_name: "fan".into(), avatar_url: None });
        assert_eq!(stream.apply_event(&reaction(&feed, board_id, user_id)), None);
        assert!(stream.entries().all(|e| e.actor.as_ref().map(|a| a.display_name.as_str()) == Some("fan")));
    }

    #[test]
    fn test_other_boards_and_replays_are_ignored() {
        let feed = ChangeFeed::new(16, 16);
        let board_id = Uuid::new_v4();
        let mut stream = ActivityStream::new(board_id);

        let event = reaction(&feed, board_id, Uuid::new_v4());
        stream.apply_event(&event);
        stream.apply_event(&event);
        stream.apply_event(&reaction(&feed, Uuid::new_v4(), Uuid::new_v4()));
        assert_eq!(stream.len(), 1);
    }
}
