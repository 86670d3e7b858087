//! Integration tests for creating, joining, fetching, and cancelling
//! sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DownStore, MeddlingStore, alice, bob, carol, memory_service};
use gambit_protocol::{
    Color, ErrorKind, INITIAL_POSITION, PlayerId, SessionId, SessionStatus,
    TicketId,
};
use gambit_session::{ErrorClass, MatchConfig, MatchError, SessionService};
use gambit_store::{MemoryStore, SessionStore};

// =========================================================================
// create_session()
// =========================================================================

#[tokio::test]
async fn test_create_session_persists_waiting_record() {
    let service = memory_service();

    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let loaded = service.load(&record.session_id).await.unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.status, SessionStatus::Waiting);
    assert_eq!(loaded.position, INITIAL_POSITION);
    assert_eq!(loaded.color_of(alice().id), Some(Color::White));
    assert_eq!(ticket.session_id, record.session_id);
}

#[tokio::test]
async fn test_create_session_store_down_is_retryable_failure() {
    let service = SessionService::new(DownStore, MatchConfig::default());

    let err = service.create_session(alice()).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Infrastructure);
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(err.kind().is_retryable());
}

// =========================================================================
// join_session()
// =========================================================================

#[tokio::test]
async fn test_join_session_activates_and_consumes_ticket() {
    let service = memory_service();
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let joined = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap();

    assert_eq!(joined.status, SessionStatus::Active);
    assert_eq!(joined.opponent, Some(bob()));
    assert_eq!(joined.version, 1);

    let loaded = service.load(&record.session_id).await.unwrap();
    assert_eq!(loaded, joined);
    assert!(
        service
            .store()
            .get(&format!("ticket:{}", ticket.ticket_id.as_str()))
            .await
            .unwrap()
            .is_none(),
        "ticket must be gone after a successful join"
    );
}

#[tokio::test]
async fn test_join_session_second_use_of_ticket_is_invalid() {
    let service = memory_service();
    let (record, ticket) = service.create_session(alice()).await.unwrap();
    service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap();

    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, carol())
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::TicketInvalid(_)));
    assert_eq!(
        service.load(&record.session_id).await.unwrap().opponent,
        Some(bob())
    );
}

#[tokio::test]
async fn test_join_session_unknown_ticket_is_invalid() {
    let service = memory_service();
    let (record, _) = service.create_session(alice()).await.unwrap();

    let err = service
        .join_session(&record.session_id, &TicketId::new("0000"), bob())
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::TicketInvalid(_)));
    assert_eq!(err.kind().code(), 400);
}

#[tokio::test]
async fn test_join_session_ticket_for_other_session_is_not_burned() {
    let service = memory_service();
    let (first, first_ticket) = service.create_session(alice()).await.unwrap();
    let (second, _) = service.create_session(carol()).await.unwrap();

    let err = service
        .join_session(&second.session_id, &first_ticket.ticket_id, bob())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::TicketInvalid(_)));

    // Still usable for the session it was issued for.
    let joined = service
        .join_session(&first.session_id, &first_ticket.ticket_id, bob())
        .await
        .unwrap();
    assert_eq!(joined.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_join_session_creator_cannot_join_own_session() {
    let service = memory_service();
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, alice())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::Unauthorized { .. }));

    // The ticket survived the rejected attempt.
    service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_join_session_unknown_session_is_ticket_invalid() {
    let service = memory_service();

    let err = service
        .join_session(&SessionId::new("nope"), &TicketId::new("abcd"), bob())
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::TicketInvalid(_)));
    assert_eq!(err.session_id(), Some(&SessionId::new("nope")));
}

#[tokio::test(start_paused = true)]
async fn test_join_session_after_ticket_expiry_is_invalid() {
    let config = MatchConfig {
        ticket_ttl: Duration::from_secs(60),
        ..MatchConfig::default()
    };
    let service = SessionService::new(MemoryStore::new(), config);
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::TicketInvalid(_)));
    assert_eq!(
        service.load(&record.session_id).await.unwrap().status,
        SessionStatus::Waiting
    );
}

#[tokio::test(start_paused = true)]
async fn test_join_session_after_session_expiry_is_gone() {
    let config = MatchConfig {
        session_ttl: Duration::from_secs(120),
        ticket_ttl: Duration::from_secs(600),
        ..MatchConfig::default()
    };
    let service = SessionService::new(MemoryStore::new(), config);
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    tokio::time::advance(Duration::from_secs(121)).await;

    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::SessionGone(_)));
    assert_eq!(err.kind().code(), 404);
}

#[tokio::test]
async fn test_join_session_retries_after_conflict() {
    let service = SessionService::new(MeddlingStore::new(1), MatchConfig::default());
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let joined = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap();

    assert_eq!(joined.opponent, Some(bob()));
    // One foreign write plus ours.
    assert_eq!(joined.version, 2);
}

#[tokio::test]
async fn test_join_session_gives_up_after_retry_limit() {
    let config = MatchConfig {
        join_retry_limit: 2,
        ..MatchConfig::default()
    };
    let service = SessionService::new(MeddlingStore::new(u32::MAX), config);
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap_err();

    match err {
        MatchError::JoinFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected JoinFailed, got {other:?}"),
    }
    let loaded = service.load(&record.session_id).await.unwrap();
    assert!(loaded.opponent.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_session_race_exactly_one_opponent_wins() {
    let service = Arc::new(memory_service());
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    let mut handles = Vec::new();
    for id in 10..20 {
        let service = Arc::clone(&service);
        let session_id = record.session_id.clone();
        let ticket_id = ticket.ticket_id.clone();
        handles.push(tokio::spawn(async move {
            let who = gambit_protocol::Participant::new(PlayerId(id), "racer");
            (id, service.join_session(&session_id, &ticket_id, who).await)
        }));
    }

    let mut winner = None;
    for handle in handles {
        let (id, result) = handle.await.unwrap();
        match result {
            Ok(_) => {
                assert!(winner.is_none(), "two joins succeeded");
                winner = Some(id);
            }
            Err(err) => assert!(
                matches!(err, MatchError::TicketInvalid(_)),
                "unexpected {err:?}"
            ),
        }
    }

    let winner = winner.expect("one join must succeed");
    let loaded = service.load(&record.session_id).await.unwrap();
    assert_eq!(loaded.opponent.map(|o| o.id), Some(PlayerId(winner)));
    assert_eq!(loaded.version, 1);
}

// =========================================================================
// fetch()
// =========================================================================

#[tokio::test]
async fn test_fetch_participant_gets_record() {
    let service = memory_service();
    let record = common::active_session(&service).await;

    let fetched = service.fetch(&record.session_id, bob().id).await.unwrap();
    assert_eq!(fetched, record);
}

#[tokio::test]
async fn test_fetch_outsider_is_unauthorized() {
    let service = memory_service();
    let record = common::active_session(&service).await;

    let err = service
        .fetch(&record.session_id, carol().id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

// =========================================================================
// cancel_session()
// =========================================================================

#[tokio::test]
async fn test_cancel_session_removes_record_and_ticket() {
    let service = memory_service();
    let (record, ticket) = service.create_session(alice()).await.unwrap();

    service
        .cancel_session(&record.session_id, alice().id)
        .await
        .unwrap();

    assert!(matches!(
        service.load(&record.session_id).await,
        Err(MatchError::SessionGone(_))
    ));
    let err = service
        .join_session(&record.session_id, &ticket.ticket_id, bob())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::SessionGone(_)));
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn test_cancel_session_by_non_creator_is_unauthorized() {
    let service = memory_service();
    let (record, _) = service.create_session(alice()).await.unwrap();

    let err = service
        .cancel_session(&record.session_id, bob().id)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::Unauthorized { .. }));
    assert!(service.load(&record.session_id).await.is_ok());
}

#[tokio::test]
async fn test_cancel_session_after_join_is_not_joinable() {
    let service = memory_service();
    let record = common::active_session(&service).await;

    let err = service
        .cancel_session(&record.session_id, alice().id)
        .await
        .unwrap_err();

    assert!(matches!(err, MatchError::SessionNotJoinable(_)));
    assert_eq!(
        service.load(&record.session_id).await.unwrap().status,
        SessionStatus::Active
    );
}
