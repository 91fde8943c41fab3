//! Session Lifecycle Scenarios
//!
//! Drives the pairing flow end to end on tokio's paused clock:
//! - QR refresh on schedule and the hand-over to `connected`
//! - Conversation polling while connected
//! - Stop confirmation and the page-exit policy
//! - Session expiry

mod common;

use common::{connected_service, service, ScriptedGateway};
use std::time::Duration;
use tokio::time::sleep;
use wacrm_sync_core::{
    Conversation, ConversationPatch, SessionState, StatusResponse, StopOutcome, SyncError,
    SyncEvent, TimerKind,
};

/// QR shown, refreshed after 30 s, then scanned from the phone
#[tokio::test(start_paused = true)]
async fn test_qr_refresh_then_external_scan() {
    let gateway = ScriptedGateway::new();
    *gateway.start_response.lock().await = Some(StatusResponse::qr("AAA"));
    gateway.qr_queue.lock().await.push_back("BBB".to_string());

    let service = service(&gateway);
    let mut events = service.subscribe();
    let session = service.session();

    assert_eq!(session.start().await.unwrap(), SessionState::QrReady);
    assert_eq!(session.qr_payload().await.as_deref(), Some("AAA"));

    sleep(Duration::from_secs(31)).await;
    assert_eq!(session.qr_payload().await.as_deref(), Some("BBB"));
    assert_eq!(ScriptedGateway::count(&gateway.refresh_calls).await, 1);

    // The phone scans the code; the next status probe notices
    gateway
        .set_status(StatusResponse::connected("+15550100"))
        .await;
    sleep(Duration::from_secs(5)).await;

    let info = session.info().await;
    assert_eq!(info.state, SessionState::Connected);
    assert_eq!(info.qr_payload, None);
    assert_eq!(info.phone_number.as_deref(), Some("+15550100"));
    assert!(info.authenticated_at.is_some());

    assert_eq!(session.active_timers().await, vec![TimerKind::ConversationPoll]);
    sleep(Duration::from_secs(300)).await;
    assert_eq!(ScriptedGateway::count(&gateway.refresh_calls).await, 1);

    let mut payloads = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::QrUpdated { payload } = event {
            payloads.push(payload);
        }
    }
    assert_eq!(payloads, vec!["AAA", "BBB"]);
}

#[tokio::test(start_paused = true)]
async fn test_status_poll_stops_once_connected() {
    let gateway = ScriptedGateway::new();
    *gateway.start_response.lock().await = Some(StatusResponse::qr("AAA"));
    let service = service(&gateway);
    service.session().start().await.unwrap();

    sleep(Duration::from_secs(12)).await;
    assert_eq!(ScriptedGateway::count(&gateway.status_calls).await, 2);

    gateway
        .set_status(StatusResponse::connected("+15550100"))
        .await;
    sleep(Duration::from_secs(4)).await;
    assert_eq!(service.session().state(), SessionState::Connected);

    let probes = ScriptedGateway::count(&gateway.status_calls).await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(ScriptedGateway::count(&gateway.status_calls).await, probes);
}

#[tokio::test(start_paused = true)]
async fn test_conversation_poll_keeps_local_changes() {
    let gateway = ScriptedGateway::new();
    *gateway.conversations.lock().await = vec![
        Conversation::new("c1", "Ana"),
        Conversation::new("c2", "Bruno"),
    ];
    let service = connected_service(&gateway).await;
    assert_eq!(service.conversations().await.len(), 2);

    service
        .apply_update("c2", &ConversationPatch::pinned(true))
        .await
        .unwrap();

    let mut renamed = Conversation::new("c2", "Bruno Costa");
    renamed.last_activity_at = 10;
    *gateway.conversations.lock().await = vec![Conversation::new("c1", "Ana"), renamed];
    sleep(Duration::from_secs(16)).await;

    let conversations = service.conversations().await;
    assert_eq!(conversations[0].id, "c2");
    assert!(conversations[0].pinned);
    assert_eq!(conversations[0].display_name, "Bruno Costa");
    assert_eq!(ScriptedGateway::count(&gateway.list_calls).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_halts_polling() {
    let gateway = ScriptedGateway::new();
    *gateway.conversations.lock().await = vec![Conversation::new("c1", "Ana")];
    let service = connected_service(&gateway).await;
    gateway
        .list_failures
        .lock()
        .await
        .push_back(SyncError::AuthExpired("401 unauthorized".to_string()));

    sleep(Duration::from_secs(16)).await;

    assert_eq!(service.session().state(), SessionState::Disconnected);
    assert!(service.conversations().await.is_empty());
    assert!(service.session().active_timers().await.is_empty());

    let calls = ScriptedGateway::count(&gateway.list_calls).await;
    sleep(Duration::from_secs(120)).await;
    assert_eq!(ScriptedGateway::count(&gateway.list_calls).await, calls);
}

/// A 401 on a message call ends the session just like one on the poll
#[tokio::test(start_paused = true)]
async fn test_expired_session_on_message_calls() {
    let gateway = ScriptedGateway::new();
    gateway
        .fetch_failures
        .lock()
        .await
        .push_back(SyncError::AuthExpired("401 unauthorized".to_string()));
    let service = connected_service(&gateway).await;
    let mut events = service.subscribe();

    assert_eq!(service.open_conversation("c1").await, None);
    assert_eq!(service.session().state(), SessionState::Disconnected);
    assert!(service.session().active_timers().await.is_empty());

    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        expired |= matches!(event, SyncEvent::Error { conversation_id: None, .. });
    }
    assert!(expired);

    let calls = ScriptedGateway::count(&gateway.list_calls).await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(ScriptedGateway::count(&gateway.list_calls).await, calls);

    // Pair again, then lose the session on a send
    service.session().start().await.unwrap();
    gateway
        .send_failures
        .lock()
        .await
        .push_back(SyncError::AuthExpired("401 unauthorized".to_string()));

    let result = service.send("c1", "hi").await;
    assert!(matches!(result, Err(SyncError::AuthExpired(_))));
    assert_eq!(service.session().state(), SessionState::Disconnected);
    assert!(service.session().active_timers().await.is_empty());
    assert!(service.messages("c1").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_authenticated_needs_confirmation() {
    let gateway = ScriptedGateway::new();
    let service = connected_service(&gateway).await;

    assert_eq!(
        service.session().stop(false).await.unwrap(),
        StopOutcome::ConfirmationRequired
    );
    assert_eq!(service.session().state(), SessionState::Connected);
    assert_eq!(ScriptedGateway::count(&gateway.stop_calls).await, 0);

    assert_eq!(
        service.session().stop(true).await.unwrap(),
        StopOutcome::Stopped
    );
    assert_eq!(service.session().state(), SessionState::Disconnected);
    assert_eq!(ScriptedGateway::count(&gateway.stop_calls).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_page_exit_stops_pending_pairing() {
    let gateway = ScriptedGateway::new();
    *gateway.start_response.lock().await = Some(StatusResponse::qr("AAA"));
    let service = service(&gateway);
    service.session().start().await.unwrap();

    let cleanup = service
        .session()
        .on_page_exit()
        .await
        .expect("cleanup task");
    cleanup.await.unwrap();

    assert_eq!(service.session().state(), SessionState::Disconnected);
    assert_eq!(ScriptedGateway::count(&gateway.stop_calls).await, 1);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(ScriptedGateway::count(&gateway.refresh_calls).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_page_exit_keeps_authenticated_session() {
    let gateway = ScriptedGateway::new();
    let service = connected_service(&gateway).await;

    assert!(service.session().on_page_exit().await.is_none());
    assert_eq!(service.session().state(), SessionState::Connected);
}
