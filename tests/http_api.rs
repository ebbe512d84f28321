mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use unimarket_chat::api::StartConversation;
use unimarket_chat::config::RestConfig;
use unimarket_chat::model::{ConversationId, NewMessage, ProductId, UserId};
use unimarket_chat::{ChatApi, ChatError, CredentialProvider, HttpChatApi, StaticCredentials};

use common::http_stub::{HttpStub, StubResponse};
use common::*;

fn api(stub: &HttpStub, credentials: Arc<dyn CredentialProvider>, timeout_ms: u64) -> HttpChatApi {
    let config = RestConfig {
        // 缺少结尾斜杠时自动补齐
        base_url: stub.url("/api"),
        timeout_ms,
        ..RestConfig::default()
    };
    HttpChatApi::new(reqwest::Client::new(), &config, credentials).unwrap()
}

fn static_api(stub: &HttpStub) -> HttpChatApi {
    api(stub, Arc::new(StaticCredentials::new("token")), 2_000)
}

#[tokio::test]
async fn lists_paginated_conversations_with_bearer_token() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(
        200,
        json!({
            "count": 1,
            "next": null,
            "previous": null,
            "results": [serde_json::to_value(conversation(42)).unwrap()],
        }),
    ));

    let conversations = static_api(&stub).list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, ConversationId(42));

    let requests = stub.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/chat/conversations/");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer token"));
}

#[tokio::test]
async fn history_page_is_requested_and_ordered_by_time() {
    let stub = HttpStub::start().await;
    let later = message(2, 42, &seller(), "second");
    let mut earlier = message(1, 42, &me(), "first");
    earlier.timestamp = later.timestamp - chrono::Duration::seconds(60);
    stub.respond(StubResponse::json(200, json!([later, earlier])));

    let messages = static_api(&stub)
        .list_messages(ConversationId(42), Some(2))
        .await
        .unwrap();
    let ids: Vec<i64> = messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(stub.requests()[0].path, "/api/chat/conversations/42/messages/?page=2");
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_retried_once() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::status(401));
    stub.respond(StubResponse::json(200, json!({"unread_count": 4})));
    let credentials = ScriptedCredentials::new("stale", Some("fresh"));

    let count = api(&stub, credentials.clone(), 2_000)
        .unread_count()
        .await
        .unwrap();
    assert_eq!(count, 4);
    assert_eq!(credentials.refreshes(), 1);

    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer stale"));
    assert_eq!(requests[1].authorization.as_deref(), Some("Bearer fresh"));
    assert_eq!(requests[1].path, "/api/chat/messages/unread-count/");
}

#[tokio::test]
async fn second_rejection_after_refresh_expires_session() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::status(401));
    stub.respond(StubResponse::status(401));
    let credentials = ScriptedCredentials::new("stale", Some("fresh"));

    let err = api(&stub, credentials.clone(), 2_000)
        .list_conversations()
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(credentials.refreshes(), 1);
    assert_eq!(stub.requests().len(), 2);
}

#[tokio::test]
async fn failed_refresh_expires_session_without_retry() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::status(401));

    let err = static_api(&stub).unread_count().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(stub.requests().len(), 1);
}

#[tokio::test]
async fn forbidden_is_a_non_fatal_authorization_error() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::status(403));

    let err = static_api(&stub)
        .list_messages(ConversationId(42), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Authorization { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn slow_response_times_out() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(200, json!([])).delayed(Duration::from_secs(2)));

    let err = api(&stub, Arc::new(StaticCredentials::new("token")), 100)
        .list_messages(ConversationId(42), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Timeout(timeout) if timeout == Duration::from_millis(100)));
}

#[tokio::test]
async fn started_conversation_is_returned_when_created() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(201, serde_json::to_value(conversation(800)).unwrap()));

    let conversation = static_api(&stub)
        .start_conversation(StartConversation {
            seller_id: UserId(8),
            product_id: Some(ProductId(5)),
        })
        .await
        .unwrap();
    assert_eq!(conversation.id, ConversationId(800));

    let request = &stub.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/chat/conversations/start/");
    assert_eq!(request.json(), json!({"seller_id": 8, "product_id": 5}));
}

#[tokio::test]
async fn existing_conversation_is_reported_as_duplicate() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(200, serde_json::to_value(conversation(42)).unwrap()));

    let err = static_api(&stub)
        .start_conversation(StartConversation {
            seller_id: UserId(8),
            product_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChatError::DuplicateConversation { existing_id } if existing_id == ConversationId(42)
    ));
}

#[tokio::test]
async fn created_message_is_posted_and_decoded() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(
        201,
        serde_json::to_value(message(99, 42, &me(), "hello")).unwrap(),
    ));

    let confirmed = static_api(&stub)
        .create_message(NewMessage {
            conversation: ConversationId(42),
            content: "hello".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(confirmed.id.0, 99);

    let request = &stub.requests()[0];
    assert_eq!(request.path, "/api/chat/messages/create/");
    assert_eq!(request.json(), json!({"conversation": 42, "content": "hello"}));
}

#[tokio::test]
async fn mark_read_surfaces_server_errors() {
    let stub = HttpStub::start().await;
    stub.respond(StubResponse::json(200, json!({})));
    stub.respond(StubResponse::status(500));
    let api = static_api(&stub);

    api.mark_read(ConversationId(42)).await.unwrap();
    let err = api.mark_read(ConversationId(42)).await.unwrap_err();
    assert!(matches!(err, ChatError::Http { status: 500, .. }));
    assert!(err.is_transient());
    assert_eq!(stub.requests()[0].path, "/api/chat/conversations/42/mark-read/");
}
