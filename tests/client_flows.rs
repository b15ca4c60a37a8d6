mod common;

use common::{board, comment, post, MockBackend};
use fanboard::client::{
    BoardView, ClientError, CommentDraft, PendingFile, PostDraft, PostView, DEFAULT_SUBMISSION_LIMIT,
};
use fanboard::feed::{ChangeFeed, ChangeKind, Record};
use fanboard::models::ParentType;
use fanboard::notify::NotificationType;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;
use tokio_test::assert_ok;

#[tokio::test]
async fn toggle_parity_survives_failures() {
    let backend = MockBackend::new();
    let b = board();
    let target = post(b.id, 0);
    backend.seed_post(target.clone());

    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);

    let mut rng = StdRng::seed_from_u64(7);
    let mut successes = 0;
    for _ in 0..40 {
        let fail = rng.gen_bool(0.3);
        backend.queue_toggle_failures([fail]);
        let result = view.toggle_like(&backend, target.id).await;
        assert_eq!(result.is_err(), fail);
        if !fail {
            successes += 1;
        }

        let shown = view.post(target.id).unwrap();
        assert_eq!(view.is_liked(target.id), successes % 2 == 1);
        assert!(shown.likes_count >= 0);
        assert_eq!(Some(shown.likes_count), backend.server_likes(target.id));
    }
}

#[tokio::test]
async fn oversized_submission_makes_no_calls() {
    let backend = MockBackend::new();
    let b = board();
    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));

    let draft = PostDraft {
        title: "Two long videos".into(),
        files: vec![
            PendingFile::new("a.mp4", vec![0; 15 * 1024 * 1024]),
            PendingFile::new("b.mp4", vec![0; 15 * 1024 * 1024]),
        ],
        ..Default::default()
    };
    let err = view.create_post(&backend, draft).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref msg) if msg.contains("30.0 MB")));
    assert!(backend.calls().is_empty());
    assert!(view.posts().is_empty());
    assert_eq!(DEFAULT_SUBMISSION_LIMIT, 25 * 1024 * 1024);
}

#[tokio::test]
async fn oversized_single_file_makes_no_calls() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    let mut view = PostView::new(target, "lofi-requests", Some(backend.viewer.clone())).with_file_limit(1024);

    let draft = CommentDraft {
        content: "stems attached".into(),
        files: vec![PendingFile::new("notes.txt", vec![1; 100]), PendingFile::new("stems.zip", vec![1; 4096])],
        ..Default::default()
    };
    let err = view.add_comment(&backend, draft).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref msg) if msg.contains("stems.zip")));
    assert!(backend.calls().is_empty());
    assert!(view.top_level().is_empty());
}

#[tokio::test]
async fn created_post_uploads_then_records_and_dedupes_echo() {
    let backend = MockBackend::new();
    let b = board();
    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));

    let draft = PostDraft {
        title: "Cover art please".into(),
        content: "see sketch".into(),
        files: vec![PendingFile::new("sketch.png", vec![1, 2, 3])],
        ..Default::default()
    };
    let created = view.create_post(&backend, draft).await.unwrap();
    assert_eq!(created.attachments.len(), 1);
    assert!(backend.has_blob(&created.attachments[0].storage_path));

    let calls = backend.calls();
    let upload = calls.iter().position(|c| c == "upload_file").unwrap();
    let insert = calls.iter().position(|c| c == "insert_attachment").unwrap();
    assert!(upload < insert);

    let notices = backend.notifications();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NotificationType::NewPost);
    assert_eq!(notices[0].board_creator_email.as_deref(), Some("dj@example.com"));

    // the feed echo of our own insert must not duplicate the post
    let feed = ChangeFeed::new(8, 8);
    let mut echoed = created.clone();
    echoed.board_id = b.id;
    echoed.attachments.clear();
    let event = feed.publish(ChangeKind::Insert, b.id, Some(created.id), created.client_token, Record::Posts(echoed));
    view.apply_event(&event, Instant::now());
    assert_eq!(view.posts().len(), 1);
    assert_eq!(view.posts()[0].attachments.len(), 1);
}

#[tokio::test]
async fn board_without_owner_email_sends_no_creator_address() {
    let backend = MockBackend::new();
    let mut b = board();
    b.owner_email = None;
    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));

    let draft = PostDraft { title: "Any b-sides?".into(), ..Default::default() };
    assert_ok!(view.create_post(&backend, draft).await);

    let notices = backend.notifications();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].board_creator_email, None);
}

#[tokio::test]
async fn post_delete_removes_files_before_post() {
    let backend = MockBackend::new();
    let b = board();
    let target = post(b.id, 2);
    let reply_to = comment(target.id, None, 0, 5);
    backend.seed_post(target.clone());
    backend.seed_comment(reply_to.clone());
    backend.seed_attachment(ParentType::Post, target.id, "p-cover.png");
    backend.seed_attachment(ParentType::Comment, reply_to.id, "c-clip.mp3");

    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);
    backend.clear_calls();

    assert_ok!(view.delete_post(&backend, target.id).await);

    let calls = backend.calls();
    let post_delete = calls.iter().position(|c| c == "delete_post").unwrap();
    let blob_deletes: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("delete_file:"))
        .map(|(i, _)| i)
        .collect();
    let rows_delete = calls.iter().position(|c| c == "delete_attachments:2").unwrap();

    assert_eq!(blob_deletes.len(), 2);
    assert!(blob_deletes.iter().all(|&i| i < rows_delete));
    assert!(rows_delete < post_delete);
    assert!(!backend.has_blob("p-cover.png"));
    assert!(!backend.has_blob("c-clip.mp3"));
    assert_eq!(backend.attachment_count(), 0);
    assert!(!backend.has_post(target.id));
    assert!(view.post(target.id).is_none());
}

#[tokio::test]
async fn failed_blob_delete_does_not_block_post_delete() {
    let backend = MockBackend::new();
    let b = board();
    let target = post(b.id, 0);
    let reply_to = comment(target.id, None, 0, 5);
    backend.seed_post(target.clone());
    backend.seed_comment(reply_to.clone());
    backend.seed_attachment(ParentType::Post, target.id, "p-cover.png");
    backend.seed_attachment(ParentType::Comment, reply_to.id, "c-clip.mp3");
    backend.queue_blob_failures(["p-cover.png"]);

    let mut view = BoardView::new(&b, Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);
    backend.clear_calls();

    assert_ok!(view.delete_post(&backend, target.id).await);

    let calls = backend.calls();
    assert!(calls.iter().any(|c| c == "delete_file:p-cover.png"));
    assert!(calls.iter().any(|c| c == "delete_file:c-clip.mp3"));
    let rows_delete = calls.iter().position(|c| c == "delete_attachments:2").unwrap();
    let post_delete = calls.iter().position(|c| c == "delete_post").unwrap();
    assert!(rows_delete < post_delete);

    // the leftover blob is for the orphan sweep
    assert!(backend.has_blob("p-cover.png"));
    assert!(!backend.has_blob("c-clip.mp3"));
    assert_eq!(backend.attachment_count(), 0);
    assert!(!backend.has_post(target.id));
    assert!(view.post(target.id).is_none());
}

#[tokio::test]
async fn own_anonymous_comment_ranks_above_popular_ones() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    let popular = comment(target.id, None, 25, 60);
    let mut mine = comment(target.id, None, 0, 30);
    mine.author_id = None;
    mine.is_anonymous = true;
    mine.is_mine = true;
    backend.seed_comment(popular.clone());
    backend.seed_comment(mine.clone());

    let mut view = PostView::new(target, "lofi-requests", Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);

    let order: Vec<_> = view.top_level().iter().map(|c| c.id).collect();
    assert_eq!(order, vec![mine.id, popular.id]);
}

#[tokio::test]
async fn session_comment_outranks_popular_ones() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    backend.seed_comment(comment(target.id, None, 100, 60));
    backend.seed_comment(comment(target.id, None, 40, 30));

    let mut view = PostView::new(target.clone(), "lofi-requests", Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);

    let draft = CommentDraft { content: "first!".into(), ..Default::default() };
    let mine = view.add_comment(&backend, draft).await.unwrap();

    let order: Vec<_> = view.top_level().iter().map(|c| c.id).collect();
    assert_eq!(order.len(), 3);
    assert_eq!(order[0], mine.id);
    assert_eq!(view.top_level()[1].likes_count, 100);

    let notices = backend.notifications();
    assert_eq!(notices.last().map(|n| n.kind), Some(NotificationType::NewComment));
}

#[tokio::test]
async fn long_thread_collapses_to_two_replies() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    let parent = comment(target.id, None, 0, 120);
    backend.seed_comment(parent.clone());
    let replies: Vec<_> = [50, 40, 30, 20, 10].iter().map(|&age| comment(target.id, Some(parent.id), 0, age)).collect();
    for reply in &replies {
        backend.seed_comment(reply.clone());
    }

    let mut view = PostView::new(target, "lofi-requests", Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);

    let listing = view.replies(parent.id);
    let shown: Vec<_> = listing.visible.iter().map(|c| c.id).collect();
    assert_eq!(shown, vec![replies[0].id, replies[1].id]);
    assert_eq!(listing.more_label().as_deref(), Some("3 more replies"));

    view.expand(parent.id);
    let listing = view.replies(parent.id);
    let shown: Vec<_> = listing.visible.iter().map(|c| c.id).collect();
    let expected: Vec<_> = replies.iter().map(|c| c.id).collect();
    assert_eq!(shown, expected);
    assert_eq!(listing.more_label(), None);

    // a reply written now stays visible after collapsing
    view.collapse(parent.id);
    let draft = CommentDraft { content: "same".into(), parent_comment_id: Some(parent.id), ..Default::default() };
    let mine = view.add_comment(&backend, draft).await.unwrap();
    let listing = view.replies(parent.id);
    assert_eq!(listing.visible.len(), 3);
    assert_eq!(listing.visible.last().map(|c| c.id), Some(mine.id));
    assert_eq!(listing.hidden, 3);
    assert_eq!(backend.notifications().last().map(|n| n.kind), Some(NotificationType::NewReply));
}

#[tokio::test]
async fn deleted_comment_keeps_replies_reachable() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    let parent = comment(target.id, None, 3, 60);
    let reply = comment(target.id, Some(parent.id), 0, 10);
    backend.seed_comment(parent.clone());
    backend.seed_comment(reply.clone());
    backend.seed_attachment(ParentType::Comment, parent.id, "old-photo.jpg");

    let mut view = PostView::new(target, "lofi-requests", Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);
    assert_ok!(view.delete_comment(&backend, parent.id).await);

    let shown = view.comment(parent.id).unwrap();
    assert!(shown.is_deleted);
    assert!(shown.content.is_empty());
    assert!(shown.author.is_none());
    assert!(!backend.has_blob("old-photo.jpg"));

    assert_eq!(view.replies(parent.id).visible.len(), 1);
    let outcome = view.toggle_like(&backend, reply.id).await.unwrap();
    assert!(outcome.liked);
    assert!(view.is_liked(reply.id));

    assert!(matches!(view.toggle_like(&backend, parent.id).await, Err(ClientError::Validation(_))));
}

#[tokio::test]
async fn subscription_follows_backend() {
    let backend = MockBackend::new();
    let target = post(board().id, 0);
    let mut view = PostView::new(target, "lofi-requests", Some(backend.viewer.clone()));
    assert_ok!(view.load(&backend).await);
    assert!(!view.is_subscribed());

    assert!(view.set_subscribed(&backend, true).await.unwrap());
    assert!(view.is_subscribed());
    assert!(!view.set_subscribed(&backend, false).await.unwrap());
    assert!(!view.is_subscribed());
}
