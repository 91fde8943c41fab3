//! Conversation and Message Sync Scenarios
//!
//! Exercises the messaging side through `SyncService`:
//! - Optimistic send reconciled with the gateway id
//! - Push ingestion, de-duplication and unread accounting
//! - History pagination down to the first message
//! - Stale loads after switching conversations

mod common;

use common::{connected_service, service, ScriptedGateway};
use std::time::Duration;
use tokio::time::sleep;
use wacrm_sync_core::{
    Conversation, ConversationPatch, DeliveryState, LoadOutcome, Message, PageOutcome, PushEvent,
    ScrollMetrics, ScrollSignal, SendOutcome, SyncEvent,
};

fn unread(id: &str, list: &[Conversation]) -> u32 {
    list.iter()
        .find(|c| c.id == id)
        .map(|c| c.unread_count)
        .unwrap_or_default()
}

fn push(conversation_id: &str, message: Message) -> PushEvent {
    PushEvent::Message {
        conversation_id: conversation_id.to_string(),
        message,
    }
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_send_confirmed() {
    let gateway = ScriptedGateway::new();
    gateway.send_ids.lock().await.push_back("m42".to_string());
    *gateway.send_delay.lock().await = Some(Duration::from_millis(500));
    let service = connected_service(&gateway).await;
    service.open_conversation("c1").await;

    let send = {
        let service = service.clone();
        tokio::spawn(async move { service.send("c1", "hi").await })
    };
    sleep(Duration::from_millis(100)).await;

    let messages = service.messages("c1").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "hi");
    assert_eq!(messages[0].delivery_state, DeliveryState::Pending);
    let temp_id = messages[0].id.clone();

    let receipt = send.await.unwrap().unwrap();
    assert_eq!(receipt.client_temp_id, temp_id);
    assert_eq!(
        receipt.outcome,
        SendOutcome::Confirmed {
            message_id: "m42".to_string()
        }
    );

    let messages = service.messages("c1").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m42");
    assert_eq!(messages[0].delivery_state, DeliveryState::Sent);

    // The push echo of the same message changes nothing
    let mut echo = Message::outbound("m42", "c1", "hi", messages[0].timestamp_ms);
    echo.client_temp_id = Some(temp_id);
    service.handle_push(push("c1", echo)).await;
    assert_eq!(service.messages("c1").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_is_retryable() {
    let gateway = ScriptedGateway::new();
    let service = connected_service(&gateway).await;
    let mut events = service.subscribe();

    // No id scripted: the gateway rejects the send
    let receipt = service.send("c1", "price list").await.unwrap();
    assert!(matches!(receipt.outcome, SendOutcome::Failed { .. }));

    let failed = service.messages("c1").await;
    assert_eq!(failed[0].delivery_state, DeliveryState::Failed);
    assert_eq!(failed[0].body, "price list");

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::SendFailed { client_temp_id, .. } = event {
            assert_eq!(client_temp_id, receipt.client_temp_id);
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    gateway.send_ids.lock().await.push_back("m7".to_string());
    let retried = service
        .retry_send("c1", &receipt.client_temp_id)
        .await
        .unwrap();
    assert!(retried.is_confirmed());

    let messages = service.messages("c1").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m7");
}

#[tokio::test(start_paused = true)]
async fn test_push_ingestion_is_idempotent_and_ordered() {
    let gateway = ScriptedGateway::new();
    let service = connected_service(&gateway).await;

    let first = Message::inbound("a", "c1", "first", 1_000);
    let tie = Message::inbound("b", "c1", "same instant", 2_000);
    let other_tie = Message::inbound("c", "c1", "same instant too", 2_000);

    service.handle_push(push("c1", tie.clone())).await;
    service.handle_push(push("c1", first.clone())).await;
    service.handle_push(push("c1", other_tie)).await;
    service.handle_push(push("c1", tie)).await;
    service.handle_push(push("c1", first)).await;

    let ids: Vec<String> = service
        .messages("c1")
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_unread_accounting() {
    let gateway = ScriptedGateway::new();
    let service = connected_service(&gateway).await;
    service.open_conversation("c2").await;

    for n in 0..5 {
        service
            .handle_push(push(
                "c1",
                Message::inbound(format!("m{}", n), "c1", "ping", n * 100),
            ))
            .await;
    }
    // Messages for the conversation on screen are not unread
    service
        .handle_push(push("c2", Message::inbound("x", "c2", "hello", 10)))
        .await;

    let conversations = service.conversations().await;
    assert_eq!(unread("c1", &conversations), 5);
    assert_eq!(unread("c2", &conversations), 0);

    service
        .apply_update(
            "c1",
            &ConversationPatch {
                unread_count: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(unread("c1", &service.conversations().await), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pagination_runs_out_of_history() {
    let gateway = ScriptedGateway::new();
    gateway.seed("c1", 60).await;
    let service = connected_service(&gateway).await;
    let mut events = service.subscribe();

    assert_eq!(
        service.open_conversation("c1").await,
        Some(LoadOutcome::Loaded(50))
    );
    assert_eq!(
        service.load_earlier("c1").await,
        Some(PageOutcome::Loaded { count: 10 })
    );
    assert_eq!(service.load_earlier("c1").await, Some(PageOutcome::Exhausted));
    assert!(!service.has_more_history("c1").await);

    let fetches = ScriptedGateway::count(&gateway.fetch_calls).await;
    assert_eq!(
        service.load_earlier("c1").await,
        Some(PageOutcome::NoMoreHistory)
    );
    assert_eq!(ScriptedGateway::count(&gateway.fetch_calls).await, fetches);

    let messages = service.messages("c1").await;
    assert_eq!(messages.len(), 60);
    assert_eq!(messages[0].id, "c1-0");

    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        exhausted |= matches!(event, SyncEvent::HistoryExhausted { .. });
    }
    assert!(exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_switching_conversations_discards_stale_load() {
    let gateway = ScriptedGateway::new();
    gateway.seed("c1", 10).await;
    gateway.seed("c2", 3).await;
    let service = connected_service(&gateway).await;
    *gateway.fetch_delay.lock().await = Some(Duration::from_secs(2));

    let slow = {
        let service = service.clone();
        tokio::spawn(async move { service.open_conversation("c1").await })
    };
    sleep(Duration::from_millis(500)).await;

    let fast = service.open_conversation("c2").await;

    assert_eq!(slow.await.unwrap(), Some(LoadOutcome::Stale));
    assert_eq!(fast, Some(LoadOutcome::Loaded(3)));
    assert!(service.messages("c1").await.is_empty());
    assert_eq!(service.messages("c2").await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_scroll_to_top_loads_history() {
    let gateway = ScriptedGateway::new();
    gateway.seed("c1", 80).await;
    let service = connected_service(&gateway).await;

    let mut signals = service.take_scroll_signals().await.expect("signals available");
    service.open_conversation("c1").await;
    assert!(service.initial_page_rendered("c1").await);

    service
        .update_scroll(ScrollMetrics {
            scroll_top: 4_500.0,
            scroll_height: 5_000.0,
            client_height: 500.0,
        })
        .await;
    service
        .update_scroll(ScrollMetrics {
            scroll_top: 30.0,
            scroll_height: 5_000.0,
            client_height: 500.0,
        })
        .await;

    let mut loaded = None;
    while let Ok(signal) = signals.try_recv() {
        if matches!(signal, ScrollSignal::NearTop { .. }) {
            loaded = service.handle_scroll_signal(signal).await;
        }
    }
    assert_eq!(loaded, Some(PageOutcome::Loaded { count: 30 }));
    assert_eq!(service.messages("c1").await.len(), 80);
}

#[tokio::test(start_paused = true)]
async fn test_components_inert_until_connected() {
    let gateway = ScriptedGateway::new();
    let service = service(&gateway);

    assert!(service.send("c1", "hi").await.is_err());
    assert_eq!(service.open_conversation("c1").await, None);
    assert_eq!(ScriptedGateway::count(&gateway.fetch_calls).await, 0);
}
