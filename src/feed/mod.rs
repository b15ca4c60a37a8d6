//! Realtime change feed
//!
//! Every write publishes a [`ChangeEvent`] with a monotonically increasing
//! `seq`. Seqs restart with the process, so each feed also picks a random
//! `epoch` and the SSE id is `<epoch>:<seq>`. Clients subscribe over SSE with
//! a board/post/table filter. The feed keeps a bounded replay buffer so a
//! reconnecting client that sends `Last-Event-ID` gets the events it missed.
//! When the buffer no longer reaches back that far, the id belongs to another
//! epoch, or the client lagged, a `resync` event tells it to refetch.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    convert::Infallible,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{Attachment, CommentReaction, CommentResponse, PostResponse, Reaction, Subscription},
    AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    Comments,
    Reactions,
    CommentReactions,
    Attachments,
    Subscriptions,
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "posts" => Ok(Table::Posts),
            "comments" => Ok(Table::Comments),
            "reactions" => Ok(Table::Reactions),
            "comment_reactions" => Ok(Table::CommentReactions),
            "attachments" => Ok(Table::Attachments),
            "subscriptions" => Ok(Table::Subscriptions),
            other => Err(format!("unknown table '{}'", other)),
        }
    }
}

/// The changed row, tagged by table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Record {
    Posts(PostResponse),
    Comments(CommentResponse),
    Reactions(Reaction),
    CommentReactions(CommentReaction),
    Attachments(Attachment),
    Subscriptions(Subscription),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Posts(_) => Table::Posts,
            Record::Comments(_) => Table::Comments,
            Record::Reactions(_) => Table::Reactions,
            Record::CommentReactions(_) => Table::CommentReactions,
            Record::Attachments(_) => Table::Attachments,
            Record::Subscriptions(_) => Table::Subscriptions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Identifies the feed instance that assigned `seq`
    #[serde(default)]
    pub epoch: u64,
    pub seq: u64,
    pub kind: ChangeKind,
    /// Board the row belongs to
    pub board_id: Uuid,
    /// Post the row belongs to (the post itself for post rows)
    pub post_id: Option<Uuid>,
    /// Idempotency key supplied by the writer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<Uuid>,
    pub record: Record,
}

impl ChangeEvent {
    pub fn cursor(&self) -> FeedCursor {
        FeedCursor { epoch: self.epoch, seq: self.seq }
    }
}

/// Position in a feed, sent as the SSE id `<epoch>:<seq>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    pub epoch: u64,
    pub seq: u64,
}

impl FeedCursor {
    /// Whether `event` comes after this position. Events from another epoch
    /// always do.
    pub fn precedes(&self, event: &ChangeEvent) -> bool {
        event.epoch != self.epoch || event.seq > self.seq
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.seq)
    }
}

impl FromStr for FeedCursor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (epoch, seq) = s.trim().split_once(':').ok_or_else(|| format!("malformed event id '{}'", s))?;
        let epoch = epoch.parse().map_err(|_| format!("malformed event id '{}'", s))?;
        let seq = seq.parse().map_err(|_| format!("malformed event id '{}'", s))?;
        Ok(FeedCursor { epoch, seq })
    }
}

/// Scope of a subscription. Empty `tables` means all tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub board_id: Option<Uuid>,
    pub post_id: Option<Uuid>,
    pub tables: Vec<Table>,
}

impl FeedFilter {
    pub fn board(board_id: Uuid) -> Self {
        Self { board_id: Some(board_id), ..Default::default() }
    }

    pub fn post(post_id: Uuid) -> Self {
        Self { post_id: Some(post_id), ..Default::default() }
    }

    pub fn with_tables(mut self, tables: &[Table]) -> Self {
        self.tables = tables.to_vec();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(board_id) = self.board_id {
            if event.board_id != board_id {
                return false;
            }
        }
        if let Some(post_id) = self.post_id {
            if event.post_id != Some(post_id) {
                return false;
            }
        }
        self.tables.is_empty() || self.tables.contains(&event.record.table())
    }

    /// Query-string form understood by [`stream_handler`]
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(board_id) = self.board_id {
            query.push(("board_id", board_id.to_string()));
        }
        if let Some(post_id) = self.post_id {
            query.push(("post_id", post_id.to_string()));
        }
        if !self.tables.is_empty() {
            let tables: Vec<String> = self
                .tables
                .iter()
                .filter_map(|t| serde_json::to_value(t).ok())
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            query.push(("tables", tables.join(",")));
        }
        query
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    board_id: Option<Uuid>,
    post_id: Option<Uuid>,
    /// Comma-separated table names
    tables: Option<String>,
}

impl TryFrom<FeedQuery> for FeedFilter {
    type Error = AppError;

    fn try_from(q: FeedQuery) -> Result<Self> {
        let tables = match q.tables.as_deref() {
            Some(list) if !list.trim().is_empty() => list
                .split(',')
                .map(Table::from_str)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(AppError::BadRequest)?,
            _ => Vec::new(),
        };
        Ok(FeedFilter { board_id: q.board_id, post_id: q.post_id, tables })
    }
}

struct Shared {
    next_seq: u64,
    replay: VecDeque<ChangeEvent>,
}

/// What a new subscriber starts from
pub struct FeedSubscription {
    /// Buffered events newer than the client's Last-Event-ID
    pub backlog: Vec<ChangeEvent>,
    /// The client missed events that are no longer buffered
    pub resync: bool,
    pub receiver: broadcast::Receiver<ChangeEvent>,
}

/// Shared change feed state
#[derive(Clone)]
pub struct ChangeFeed {
    epoch: u64,
    sender: broadcast::Sender<ChangeEvent>,
    shared: Arc<Mutex<Shared>>,
    replay_capacity: usize,
}

impl ChangeFeed {
    pub fn new(channel_capacity: usize, replay_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            epoch: rand::random(),
            sender,
            shared: Arc::new(Mutex::new(Shared { next_seq: 1, replay: VecDeque::new() })),
            replay_capacity,
        }
    }

    /// Assign a seq, buffer and broadcast. Returns the published event.
    pub fn publish(
        &self,
        kind: ChangeKind,
        board_id: Uuid,
        post_id: Option<Uuid>,
        client_token: Option<Uuid>,
        record: Record,
    ) -> ChangeEvent {
        // seq assignment, buffering and send happen under one lock so the
        // replay buffer and the live channel never disagree on order
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let event = ChangeEvent {
            epoch: self.epoch,
            seq: shared.next_seq,
            kind,
            board_id,
            post_id,
            client_token,
            record,
        };
        shared.next_seq += 1;

        if self.replay_capacity > 0 {
            if shared.replay.len() == self.replay_capacity {
                shared.replay.pop_front();
            }
            shared.replay.push_back(event.clone());
        }

        // No receivers is fine
        let _ = self.sender.send(event.clone());
        tracing::trace!(seq = event.seq, table = ?event.record.table(), kind = ?event.kind, "change published");
        event
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Seq of the most recently published event (0 before any)
    pub fn latest_seq(&self) -> u64 {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.next_seq - 1
    }

    /// Subscribe, replaying anything after `last_seen` that is still buffered.
    /// A cursor from another epoch, or one ahead of this feed, asks for a resync.
    pub fn subscribe_from(&self, last_seen: Option<FeedCursor>) -> FeedSubscription {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let receiver = self.sender.subscribe();
        let latest = shared.next_seq - 1;

        let Some(cursor) = last_seen else {
            return FeedSubscription { backlog: Vec::new(), resync: false, receiver };
        };
        if cursor.epoch != self.epoch || cursor.seq > latest {
            return FeedSubscription { backlog: Vec::new(), resync: true, receiver };
        }
        let last_seen = cursor.seq;
        if last_seen == latest {
            return FeedSubscription { backlog: Vec::new(), resync: false, receiver };
        }

        let oldest_buffered = shared.replay.front().map(|e| e.seq);
        match oldest_buffered {
            Some(oldest) if oldest <= last_seen + 1 => FeedSubscription {
                backlog: shared.replay.iter().filter(|e| e.seq > last_seen).cloned().collect(),
                resync: false,
                receiver,
            },
            _ => FeedSubscription { backlog: Vec::new(), resync: true, receiver },
        }
    }
}

fn change_event(event: &ChangeEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().id(event.cursor().to_string()).event("change").data(json)),
        Err(e) => {
            tracing::error!("Failed to serialize change event {}: {}", event.seq, e);
            None
        }
    }
}

fn resync_event() -> Event {
    Event::default().event("resync").data("{}")
}

/// SSE stream handler: `GET /api/v1/realtime?board_id=&post_id=&tables=`
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let filter = FeedFilter::try_from(query)?;
    // An id this feed cannot parse is treated as one from another epoch
    let last_seen = headers.get("last-event-id").map(|v| {
        v.to_str()
            .ok()
            .and_then(|v| v.parse::<FeedCursor>().ok())
            .unwrap_or(FeedCursor { epoch: !state.feed.epoch(), seq: 0 })
    });

    let FeedSubscription { backlog, resync, mut receiver } = state.feed.subscribe_from(last_seen);
    let mut last_sent = match last_seen {
        Some(cursor) if !resync => cursor.seq,
        _ => 0,
    };

    let stream = async_stream::stream! {
        if resync {
            yield Ok(resync_event());
        }
        for event in backlog {
            last_sent = event.seq;
            if filter.matches(&event) {
                if let Some(sse) = change_event(&event) {
                    yield Ok(sse);
                }
            }
        }
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    // Already delivered from the backlog
                    if event.seq <= last_sent {
                        continue;
                    }
                    last_sent = event.seq;
                    if filter.matches(&event) {
                        if let Some(sse) = change_event(&event) {
                            yield Ok(sse);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Realtime client lagged, missed {} events", n);
                    yield Ok(resync_event());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reaction_record(post_id: Uuid) -> Record {
        Record::Reactions(Reaction {
            post_id,
            user_id: Uuid::new_v4(),
            reaction_type: "like".into(),
            created_at: Utc::now(),
        })
    }

    fn at(feed: &ChangeFeed, seq: u64) -> FeedCursor {
        FeedCursor { epoch: feed.epoch(), seq }
    }

    #[test]
    fn test_filter_scopes() {
        let feed = ChangeFeed::new(16, 16);
        let board = Uuid::new_v4();
        let post = Uuid::new_v4();
        let event = feed.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post));

        assert!(FeedFilter::board(board).matches(&event));
        assert!(!FeedFilter::board(Uuid::new_v4()).matches(&event));
        assert!(FeedFilter::post(post).matches(&event));
        assert!(!FeedFilter::post(Uuid::new_v4()).matches(&event));
        assert!(FeedFilter::board(board).with_tables(&[Table::Reactions]).matches(&event));
        assert!(!FeedFilter::board(board).with_tables(&[Table::Comments]).matches(&event));
    }

    #[test]
    fn test_query_parsing() {
        let filter = FeedFilter::try_from(FeedQuery {
            board_id: None,
            post_id: None,
            tables: Some("posts, comment_reactions".into()),
        })
        .unwrap();
        assert_eq!(filter.tables, vec![Table::Posts, Table::CommentReactions]);

        let bad = FeedFilter::try_from(FeedQuery { board_id: None, post_id: None, tables: Some("users".into()) });
        assert!(bad.is_err());
    }

    #[test]
    fn test_to_query_roundtrips_tables() {
        let filter = FeedFilter::board(Uuid::new_v4()).with_tables(&[Table::Posts, Table::CommentReactions]);
        let query = filter.to_query();
        assert!(query.contains(&("tables", "posts,comment_reactions".to_string())));
    }

    #[tokio::test]
    async fn test_seq_is_monotonic_and_broadcast() {
        let feed = ChangeFeed::new(16, 16);
        let mut sub = feed.subscribe_from(None);
        let board = Uuid::new_v4();
        let post = Uuid::new_v4();

        let a = feed.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post));
        let b = feed.publish(ChangeKind::Delete, board, Some(post), None, reaction_record(post));
        assert_eq!(a.seq + 1, b.seq);
        assert_eq!(feed.latest_seq(), b.seq);

        assert_eq!(sub.receiver.recv().await.unwrap().seq, a.seq);
        assert_eq!(sub.receiver.recv().await.unwrap().seq, b.seq);
    }

    #[test]
    fn test_replay_after_reconnect() {
        let feed = ChangeFeed::new(16, 4);
        let board = Uuid::new_v4();
        let post = Uuid::new_v4();
        for _ in 0..3 {
            feed.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post));
        }

        let sub = feed.subscribe_from(Some(at(&feed, 1)));
        assert!(!sub.resync);
        assert_eq!(sub.backlog.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);

        let sub = feed.subscribe_from(Some(at(&feed, 3)));
        assert!(!sub.resync);
        assert!(sub.backlog.is_empty());
    }

    #[test]
    fn test_resync_when_buffer_exhausted() {
        let feed = ChangeFeed::new(16, 2);
        let board = Uuid::new_v4();
        let post = Uuid::new_v4();
        for _ in 0..5 {
            feed.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post));
        }
        // Buffer holds 4 and 5; the client last saw 1
        let sub = feed.subscribe_from(Some(at(&feed, 1)));
        assert!(sub.resync);
        assert!(sub.backlog.is_empty());

        let sub = feed.subscribe_from(Some(at(&feed, 3)));
        assert!(!sub.resync);
        assert_eq!(sub.backlog.len(), 2);
    }

    #[test]
    fn test_restarted_feed_asks_for_resync() {
        let before = ChangeFeed::new(16, 16);
        let board = Uuid::new_v4();
        let post = Uuid::new_v4();
        let mut seen = None;
        for _ in 0..5 {
            seen = Some(before.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post)).cursor());
        }

        // a fresh process starts counting from 1 again
        let after = ChangeFeed::new(16, 16);
        let sub = after.subscribe_from(seen);
        assert!(sub.resync);
        assert!(sub.backlog.is_empty());

        let fresh = after.publish(ChangeKind::Insert, board, Some(post), None, reaction_record(post));
        assert_eq!(fresh.seq, 1);
        assert!(seen.unwrap().precedes(&fresh));
    }

    #[test]
    fn test_cursor_ahead_of_feed_asks_for_resync() {
        let feed = ChangeFeed::new(16, 16);
        let post = Uuid::new_v4();
        feed.publish(ChangeKind::Insert, Uuid::new_v4(), Some(post), None, reaction_record(post));
        let sub = feed.subscribe_from(Some(at(&feed, 500)));
        assert!(sub.resync);
    }

    #[test]
    fn test_cursor_text_form() {
        let cursor = FeedCursor { epoch: 42, seq: 7 };
        assert_eq!(cursor.to_string(), "42:7");
        assert_eq!("42:7".parse::<FeedCursor>().unwrap(), cursor);
        assert!("7".parse::<FeedCursor>().is_err());
        assert!("a:7".parse::<FeedCursor>().is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let feed = ChangeFeed::new(4, 4);
        let post = Uuid::new_v4();
        let event = feed.publish(ChangeKind::Insert, Uuid::new_v4(), Some(post), None, reaction_record(post));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["record"]["table"], "reactions");
        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
