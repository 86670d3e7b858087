//! Integration tests for the move pipeline, including the end-to-end
//! create → join → play scenarios.

mod common;

use std::sync::Arc;

use common::{
    MeddlingStore, TestOracle, active_session, alice, bob, carol,
    memory_service,
};
use gambit_protocol::{
    Color, EndReason, ErrorKind, ServerEvent, SessionStatus,
};
use gambit_session::{
    MatchConfig, MatchError, MovePipeline, Outcome, SessionService,
};
use gambit_store::MemoryStore;

fn pipeline(oracle: TestOracle) -> MovePipeline<MemoryStore, TestOracle> {
    MovePipeline::new(Arc::new(memory_service()), oracle)
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn test_apply_move_white_opening_flips_turn() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;

    let outcome = pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap();

    assert_eq!(outcome.record.active_color, Color::Black);
    assert_eq!(outcome.record.status, SessionStatus::Active);
    assert_eq!(outcome.record.version, record.version + 1);
    assert_eq!(outcome.record.position, format!("{} e2e4", record.position));
    assert_eq!(outcome.applied.notation, "e2e4");
    assert_eq!(outcome.applied.color, Color::White);
    assert_eq!(outcome.applied.ply, 1);

    let stored = pipeline.sessions().load(&record.session_id).await.unwrap();
    assert_eq!(stored, outcome.record);
}

#[tokio::test]
async fn test_apply_move_event_describes_the_move() {
    let pipeline = pipeline(TestOracle::new().checking("d1h5"));
    let record = active_session(pipeline.sessions()).await;

    let outcome = pipeline
        .apply_move(&record.session_id, alice().id, "d1h5")
        .await
        .unwrap();

    match outcome.event() {
        ServerEvent::MoveApplied {
            version,
            notation,
            color,
            next_turn,
            check,
            terminal,
            winner,
            ..
        } => {
            assert_eq!(version, record.version + 1);
            assert_eq!(notation, "d1h5");
            assert_eq!(color, Color::White);
            assert_eq!(next_turn, Color::Black);
            assert!(check);
            assert!(!terminal);
            assert_eq!(winner, None);
        }
        other => panic!("expected MoveApplied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_apply_move_alternation_matches_move_count() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;
    let moves = ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"];

    for (n, mv) in moves.iter().enumerate() {
        let mover = if n % 2 == 0 { alice().id } else { bob().id };
        let outcome = pipeline
            .apply_move(&record.session_id, mover, mv)
            .await
            .unwrap();
        let played = n + 1;
        assert_eq!(
            outcome.record.active_color == Color::White,
            played % 2 == 0
        );
        assert_eq!(outcome.record.version, record.version + played as u64);
    }
}

// =========================================================================
// Rejections
// =========================================================================

#[tokio::test]
async fn test_apply_move_same_color_twice_is_not_your_turn() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;
    pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap();
    let before = pipeline.sessions().load(&record.session_id).await.unwrap();

    let err = pipeline
        .apply_move(&record.session_id, alice().id, "d2d4")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MatchError::NotYourTurn {
            to_move: Color::Black,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::NotYourTurn);
    let after = pipeline.sessions().load(&record.session_id).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_apply_move_black_first_is_not_your_turn() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;

    let err = pipeline
        .apply_move(&record.session_id, bob().id, "e7e5")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotYourTurn);
}

#[tokio::test]
async fn test_apply_move_outsider_is_unauthorized() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;

    let err = pipeline
        .apply_move(&record.session_id, carol().id, "e2e4")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.kind().code(), 403);
}

#[tokio::test]
async fn test_apply_move_before_join_is_not_active() {
    let pipeline = pipeline(TestOracle::new());
    let (record, _) = pipeline.sessions().create_session(alice()).await.unwrap();

    let err = pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MatchError::SessionNotActive {
            status: SessionStatus::Waiting,
            ..
        }
    ));
}

#[tokio::test]
async fn test_apply_move_illegal_leaves_record_untouched() {
    let pipeline = pipeline(TestOracle::new().illegal("e2e5"));
    let record = active_session(pipeline.sessions()).await;

    let err = pipeline
        .apply_move(&record.session_id, alice().id, "e2e5")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IllegalMove);
    assert_eq!(err.kind().code(), 422);
    let stored = pipeline.sessions().load(&record.session_id).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_apply_move_garbage_notation_is_bad_format() {
    let pipeline = pipeline(TestOracle::new());
    let record = active_session(pipeline.sessions()).await;

    let err = pipeline
        .apply_move(&record.session_id, alice().id, "pawn to e4")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadMoveFormat);
}

#[tokio::test]
async fn test_apply_move_unknown_session_is_gone() {
    let pipeline = pipeline(TestOracle::new());

    let err = pipeline
        .apply_move(
            &gambit_protocol::SessionId::new("missing"),
            alice().id,
            "e2e4",
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SessionGone);
}

// =========================================================================
// Completion
// =========================================================================

#[tokio::test]
async fn test_apply_move_checkmate_completes_with_mover_winning() {
    let oracle = TestOracle::new().ending("d8h4", Outcome::Checkmate);
    let pipeline = pipeline(oracle);
    let record = active_session(pipeline.sessions()).await;
    let id = &record.session_id;

    pipeline.apply_move(id, alice().id, "f2f3").await.unwrap();
    pipeline.apply_move(id, bob().id, "e7e5").await.unwrap();
    pipeline.apply_move(id, alice().id, "g2g4").await.unwrap();
    let outcome = pipeline.apply_move(id, bob().id, "d8h4").await.unwrap();

    assert_eq!(outcome.record.status, SessionStatus::Completed);
    let result = outcome.record.result.unwrap();
    assert_eq!(result.winner, Some(Color::Black));
    assert_eq!(result.reason, EndReason::Checkmate);
    match outcome.event() {
        ServerEvent::MoveApplied {
            terminal,
            end_reason,
            winner,
            ..
        } => {
            assert!(terminal);
            assert_eq!(end_reason, Some(EndReason::Checkmate));
            assert_eq!(winner, Some(Color::Black));
        }
        other => panic!("expected MoveApplied, got {other:?}"),
    }

    let err = pipeline.apply_move(id, alice().id, "a2a3").await.unwrap_err();
    assert!(matches!(
        err,
        MatchError::SessionNotActive {
            status: SessionStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_apply_move_stalemate_completes_without_winner() {
    let oracle = TestOracle::new().ending("e2e4", Outcome::Stalemate);
    let pipeline = pipeline(oracle);
    let record = active_session(pipeline.sessions()).await;

    let outcome = pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap();

    let result = outcome.record.result.unwrap();
    assert_eq!(result.winner, None);
    assert_eq!(result.reason, EndReason::Stalemate);
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test]
async fn test_apply_move_lost_race_is_conflict_without_write() {
    let service = Arc::new(SessionService::new(
        MeddlingStore::new(0),
        MatchConfig::default(),
    ));
    let record = active_session(&service).await;
    let pipeline = MovePipeline::new(Arc::clone(&service), TestOracle::new());
    service.store().arm(1);

    let err = pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::Conflict(_)));
    assert!(err.kind().is_retryable());
    let stored = service.load(&record.session_id).await.unwrap();
    assert_eq!(stored.version, record.version + 1);
    assert!(stored.moves.is_empty(), "the losing move must not be stored");

    // Re-submitting against the fresh version goes through.
    let outcome = pipeline
        .apply_move(&record.session_id, alice().id, "e2e4")
        .await
        .unwrap();
    assert_eq!(outcome.record.version, record.version + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_apply_move_race_at_most_one_success_per_version() {
    let pipeline = Arc::new(pipeline(TestOracle::new()));
    let record = active_session(pipeline.sessions()).await;

    let mut handles = Vec::new();
    for mv in ["a2a3", "b2b3", "c2c3", "d2d3", "e2e3", "f2f3", "g2g3", "h2h3"] {
        let pipeline = Arc::clone(&pipeline);
        let session_id = record.session_id.clone();
        handles.push(tokio::spawn(async move {
            pipeline.apply_move(&session_id, alice().id, mv).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert!(
                matches!(err, MatchError::Conflict(_) | MatchError::NotYourTurn { .. }),
                "unexpected {err:?}"
            ),
        }
    }

    assert_eq!(successes, 1);
    let stored = pipeline.sessions().load(&record.session_id).await.unwrap();
    assert_eq!(stored.version, record.version + 1);
    assert_eq!(stored.moves.len(), 1);
    assert_eq!(stored.active_color, Color::Black);
}
