mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{content, done, ScriptedProducer, Step};
use waypoint_session::{ConversationService, SessionConfig, SessionError, Turn};
use waypoint_store::{MemoryStore, StoreError};
use waypoint_types::{Role, StreamFrame};

fn service_with(scripts: Vec<Vec<Step>>) -> ConversationService {
    service_with_config(scripts, SessionConfig::default())
}

fn service_with_config(scripts: Vec<Vec<Step>>, config: SessionConfig) -> ConversationService {
    ConversationService::builder()
        .store(Arc::new(MemoryStore::new()))
        .producer(Arc::new(ScriptedProducer::new(scripts)))
        .config(config)
        .build()
        .unwrap()
}

async fn drain(turn: &mut Turn) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), turn.frames.recv()).await {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(_) => panic!("frame stream did not close"),
        }
    }
    frames
}

async fn wait_until_idle(service: &ConversationService, thread_id: &str) {
    for _ in 0..100 {
        if !service.is_generating(thread_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never deregistered");
}

#[tokio::test]
async fn start_turn_creates_thread_with_derived_title() {
    let service = service_with(vec![vec![content("Hello!"), done()]]);

    let mut turn = service
        .start_turn("alice", None, "what's the weather like?")
        .await
        .unwrap();
    let frames = drain(&mut turn).await;
    assert!(matches!(frames.last(), Some(StreamFrame::Done)));

    let threads = service.list("alice", 10, 0).await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "what's the weather like?");
    assert_eq!(threads[0].thread_id, turn.thread_id);

    let transcript = service.transcript("alice", &turn.thread_id).await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content, "Hello!");
}

#[tokio::test]
async fn turns_chain_across_requests() {
    let service = service_with(vec![
        vec![content("Hello!"), done()],
        vec![content("4"), done()],
    ]);

    let mut first = service.start_turn("alice", None, "hi").await.unwrap();
    drain(&mut first).await;
    wait_until_idle(&service, &first.thread_id).await;

    let mut second = service
        .start_turn("alice", Some(&first.thread_id), "what's 2+2?")
        .await
        .unwrap();
    drain(&mut second).await;
    wait_until_idle(&service, &second.thread_id).await;

    let history = service
        .history("alice", &first.thread_id, 10, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0].parent_checkpoint_id.as_deref(),
        Some(history[1].checkpoint_id.as_str())
    );

    let transcript = service.transcript("alice", &first.thread_id).await.unwrap();
    let turns: Vec<(Role, &str)> = transcript
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        turns,
        vec![
            (Role::User, "hi"),
            (Role::Assistant, "Hello!"),
            (Role::User, "what's 2+2?"),
            (Role::Assistant, "4"),
        ]
    );

    // Time travel: the first checkpoint still shows the shorter transcript.
    let at_root = service
        .transcript_at("alice", &first.thread_id, &history[1].checkpoint_id)
        .await
        .unwrap();
    assert_eq!(at_root.len(), 2);
}

#[tokio::test]
async fn stop_yields_stopped_frame_and_truncated_checkpoint() {
    let service = service_with(vec![vec![content("Para"), Step::Hang]]);

    let mut turn = service
        .start_turn("alice", None, "write me a novel")
        .await
        .unwrap();

    let first = turn.frames.recv().await.unwrap();
    assert!(matches!(&first, StreamFrame::Content { text } if text == "Para"));

    assert!(service.stop(&turn.thread_id));

    let terminal = tokio::time::timeout(Duration::from_secs(2), turn.frames.recv())
        .await
        .expect("stopped frame should arrive promptly")
        .unwrap();
    assert!(matches!(terminal, StreamFrame::Stopped));

    wait_until_idle(&service, &turn.thread_id).await;
    let history = service
        .history("alice", &turn.thread_id, 10, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].meta.truncated);

    let transcript = service.transcript("alice", &turn.thread_id).await.unwrap();
    assert_eq!(transcript[1].content, "Para");

    // Stop with nothing running reports false.
    assert!(!service.stop(&turn.thread_id));
}

#[tokio::test]
async fn concurrent_turns_on_one_thread_conflict() {
    let service = service_with(vec![
        vec![
            content("x"),
            Step::Sleep(Duration::from_millis(300)),
            done(),
        ],
        vec![content("y"), done()],
    ]);

    let mut first = service.start_turn("alice", None, "one").await.unwrap();

    let err = service
        .start_turn("alice", Some(&first.thread_id), "two")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ThreadBusy(_)), "{err}");

    let frames = drain(&mut first).await;
    assert!(matches!(frames.last(), Some(StreamFrame::Done)));
    wait_until_idle(&service, &first.thread_id).await;

    // The slot is free again.
    let mut retry = service
        .start_turn("alice", Some(&first.thread_id), "two")
        .await
        .unwrap();
    let frames = drain(&mut retry).await;
    assert!(matches!(frames.last(), Some(StreamFrame::Done)));
}

#[tokio::test]
async fn reset_wipes_checkpoints_but_keeps_thread() {
    let service = service_with(vec![
        vec![content("first"), done()],
        vec![content("fresh"), done()],
    ]);

    let mut turn = service.start_turn("alice", None, "hello").await.unwrap();
    drain(&mut turn).await;
    wait_until_idle(&service, &turn.thread_id).await;

    service.reset("alice", &turn.thread_id).await.unwrap();

    assert!(service
        .transcript("alice", &turn.thread_id)
        .await
        .unwrap()
        .is_empty());
    assert!(service
        .history("alice", &turn.thread_id, 10, None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(service.list("alice", 10, 0).await.unwrap().len(), 1);

    // The thread accepts a fresh root turn after the reset.
    let mut again = service
        .start_turn("alice", Some(&turn.thread_id), "restart")
        .await
        .unwrap();
    drain(&mut again).await;
    wait_until_idle(&service, &turn.thread_id).await;
    let history = service
        .history("alice", &turn.thread_id, 10, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].parent_checkpoint_id, None);
}

#[tokio::test]
async fn soft_delete_hides_hard_delete_removes() {
    let service = service_with(vec![
        vec![content("a"), done()],
        vec![content("b"), done()],
    ]);

    let mut first = service.start_turn("alice", None, "one").await.unwrap();
    drain(&mut first).await;
    let mut second = service.start_turn("alice", None, "two").await.unwrap();
    drain(&mut second).await;

    service
        .delete("alice", &first.thread_id, false)
        .await
        .unwrap();
    let listed = service.list("alice", 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].thread_id, second.thread_id);

    // A soft-deleted thread refuses new turns.
    let err = service
        .start_turn("alice", Some(&first.thread_id), "more")
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Store(StoreError::NotFound(_))),
        "{err}"
    );

    service
        .delete("alice", &second.thread_id, true)
        .await
        .unwrap();
    let err = service
        .history("alice", &second.thread_id, 10, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Store(StoreError::NotFound(_))),
        "{err}"
    );
}

#[tokio::test]
async fn export_import_preserves_the_transcript() {
    let service = service_with(vec![
        vec![content("Hello!"), done()],
        vec![content("4"), done()],
    ]);

    let mut first = service.start_turn("alice", None, "hi").await.unwrap();
    drain(&mut first).await;
    wait_until_idle(&service, &first.thread_id).await;
    let mut second = service
        .start_turn("alice", Some(&first.thread_id), "what's 2+2?")
        .await
        .unwrap();
    drain(&mut second).await;
    wait_until_idle(&service, &first.thread_id).await;

    let bundle = service.export("alice", &first.thread_id).await.unwrap();
    let imported_id = service.import("bob", &bundle).await.unwrap();

    let original = service.transcript("alice", &first.thread_id).await.unwrap();
    let imported = service.transcript("bob", &imported_id).await.unwrap();
    assert_eq!(original.len(), imported.len());
    for (a, b) in original.iter().zip(imported.iter()) {
        assert_eq!(a.role, b.role);
        assert_eq!(a.content, b.content);
    }

    // Ownership: alice cannot read bob's import.
    let err = service
        .transcript("alice", &imported_id)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SessionError::Store(StoreError::NotFound(_))),
        "{err}"
    );
}

#[tokio::test]
async fn watchdog_timeout_is_reported_as_stopped() {
    let config = SessionConfig::default().with_idle_timeout(Duration::from_millis(150));
    let service = service_with_config(vec![vec![content("slow"), Step::Hang]], config);

    let mut turn = service.start_turn("alice", None, "hello").await.unwrap();
    let frames = drain(&mut turn).await;
    assert!(matches!(frames.last(), Some(StreamFrame::Stopped)));

    wait_until_idle(&service, &turn.thread_id).await;
    let history = service
        .history("alice", &turn.thread_id, 10, None)
        .await
        .unwrap();
    assert!(history[0].meta.truncated);
    assert_eq!(
        history[0].meta.tags.get("stop_reason"),
        Some(&serde_json::json!("timeout"))
    );
}

#[tokio::test]
async fn search_finds_messages_across_threads() {
    let service = service_with(vec![
        vec![content("Ferrets are mustelids."), done()],
        vec![content("Rust is a language."), done()],
    ]);

    let mut first = service
        .start_turn("alice", None, "tell me about ferrets")
        .await
        .unwrap();
    drain(&mut first).await;
    let mut second = service
        .start_turn("alice", None, "tell me about rust")
        .await
        .unwrap();
    drain(&mut second).await;
    wait_until_idle(&service, &first.thread_id).await;
    wait_until_idle(&service, &second.thread_id).await;

    let hits = service.search("alice", "mustelid", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].thread_id, first.thread_id);
    assert_eq!(hits[0].role, Role::Assistant);
}
