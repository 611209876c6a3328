//! End-to-end tests running conversations through the client layer, with
//! every message delivered twice to exercise duplicate suppression.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use common::{
    echo_factory, init_tracing, server_and_client, single_echo_factory, wait_until_gone,
    FnFactory, ProgressOnlyService, CLIENT_TIMEOUT,
};
use service_conversation::{
    ConversationError, ProgressInfo, ServerConfig, Service, ServiceMessenger,
};

#[tokio::test]
async fn test_single_echo_happy_case() {
    init_tracing();
    let (_server, client) = server_and_client(vec![single_echo_factory()], ServerConfig::default());
    let conversation = client.start_conversation("singleEcho").await.unwrap();
    conversation.send("Hallo Echo").await.unwrap();
    let echo: String = conversation.receive().await.unwrap();
    assert_eq!(echo, "Hallo Echo");
    conversation.close();
}

#[tokio::test]
async fn test_single_echo_with_try_receive_polling() {
    init_tracing();
    let (_server, client) = server_and_client(vec![single_echo_factory()], ServerConfig::default());
    let conversation = client.start_conversation("singleEcho").await.unwrap();
    conversation.send("Hallo Echo").await.unwrap();

    let mut echo: Option<String> = None;
    for _ in 0..50 {
        echo = conversation.try_receive(Duration::ZERO).await.unwrap();
        if echo.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(echo.as_deref(), Some("Hallo Echo"));
    conversation.close();
}

#[tokio::test]
async fn test_multiple_echo_terminate_happy_case() {
    init_tracing();
    let (server, client) = server_and_client(vec![echo_factory()], ServerConfig::default());
    let conversation = client.start_conversation("echo").await.unwrap();

    for text in ["One", "Two", "Three"] {
        conversation.send(text).await.unwrap();
        let echo: String = conversation.receive().await.unwrap();
        assert_eq!(echo, text);
    }

    let id = conversation.id().to_string();
    conversation.terminate().await.unwrap();
    assert!(wait_until_gone(&server, &id).await);
}

#[tokio::test]
async fn test_two_conversations_interleaved() {
    init_tracing();
    let (server, client) = server_and_client(vec![echo_factory()], ServerConfig::default());
    let first = client.start_conversation("echo").await.unwrap();
    let second = client.start_conversation("echo").await.unwrap();

    for (mine, other) in [("One", "AAA"), ("Two", "BBB")] {
        first.send(mine).await.unwrap();
        let echo: String = first.receive().await.unwrap();
        assert_eq!(echo, mine);

        second.send(other).await.unwrap();
        let echo: String = second.receive().await.unwrap();
        assert_eq!(echo, other);
    }

    let first_id = first.id().to_string();
    first.terminate().await.unwrap();
    assert!(wait_until_gone(&server, &first_id).await);
    assert!(server.has_conversation(second.id()));

    second.send("CCC").await.unwrap();
    let echo: String = second.receive().await.unwrap();
    assert_eq!(echo, "CCC");

    let second_id = second.id().to_string();
    second.terminate().await.unwrap();
    assert!(wait_until_gone(&server, &second_id).await);
}

#[tokio::test]
async fn test_second_conversation_rejected() {
    init_tracing();
    let (_server, client) = server_and_client(
        vec![echo_factory()],
        ServerConfig::new().with_max_concurrent_conversations(1),
    );
    let _first = client.start_conversation("echo").await.unwrap();
    let second = client.start_conversation("echo").await;
    assert!(matches!(second, Err(ConversationError::Rejected(_))));
}

#[tokio::test]
async fn test_second_conversation_queued() {
    init_tracing();
    let (server, client) = server_and_client(
        vec![echo_factory()],
        ServerConfig::new()
            .with_max_concurrent_conversations(1)
            .with_work_queue_size(usize::MAX),
    );
    let first = client.start_conversation("echo").await.unwrap();
    assert_eq!(first.work_queue_size_at_startup(), 0);
    let second = client.start_conversation("echo").await.unwrap();
    assert_eq!(second.work_queue_size_at_startup(), 1);

    first.send("One").await.unwrap();
    let echo: String = first.receive().await.unwrap();
    assert_eq!(echo, "One");

    // The queued conversation takes messages but its body is not running,
    // so nothing comes back yet.
    second.send("AAA").await.unwrap();
    let nothing: Option<String> =
        second.try_receive(Duration::from_millis(10)).await.unwrap();
    assert!(nothing.is_none());

    let first_id = first.id().to_string();
    first.terminate().await.unwrap();
    assert!(wait_until_gone(&server, &first_id).await);
    assert!(server.has_conversation(second.id()));

    // Once the slot frees up, the queued body starts and echoes what
    // waited for it.
    let echo: String = second.receive().await.unwrap();
    assert_eq!(echo, "AAA");

    second.send("CCC").await.unwrap();
    let echo: String = second.receive().await.unwrap();
    assert_eq!(echo, "CCC");

    let second_id = second.id().to_string();
    second.terminate().await.unwrap();
    assert!(wait_until_gone(&server, &second_id).await);
}

/// Fails immediately, without touching the messenger.
struct FailingService;

#[async_trait]
impl Service for FailingService {
    async fn run(&self, _messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        Err(ConversationError::Internal(
            "refusing to cooperate".to_string(),
        ))
    }
}

#[tokio::test]
async fn test_service_failure_surfaces_on_receive() {
    init_tracing();
    let (_server, client) = server_and_client(
        vec![FnFactory::new("failing", CLIENT_TIMEOUT, || {
            Box::new(FailingService)
        })],
        ServerConfig::default(),
    );
    let conversation = client.start_conversation("failing").await.unwrap();
    let received: Result<Value, _> = conversation.receive().await;
    match received {
        Err(ConversationError::ServiceExecution {
            conversation_id,
            description,
        }) => {
            assert_eq!(conversation_id, conversation.id());
            assert!(description.contains("refusing to cooperate"), "{}", description);
        }
        other => panic!("expected a service execution failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_service_failure_surfaces_on_send() {
    init_tracing();
    let (_server, client) = server_and_client(
        vec![FnFactory::new("failing", CLIENT_TIMEOUT, || {
            Box::new(FailingService)
        })],
        ServerConfig::default(),
    );
    let conversation = client.start_conversation("failing").await.unwrap();
    // Give the failure time to arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = conversation.send("Test").await;
    match sent {
        Err(ConversationError::ServiceExecution { description, .. }) => {
            assert!(description.contains("refusing to cooperate"), "{}", description);
        }
        other => panic!("expected a service execution failure, got {:?}", other),
    }
}

/// Sends three regular messages, then fails.
struct EventuallyFailingService;

#[async_trait]
impl Service for EventuallyFailingService {
    async fn run(&self, messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        messenger.send("OK1").await?;
        messenger.send("OK2").await?;
        messenger.send("OK3").await?;
        let unexpected: Option<Value> = messenger.try_receive(Duration::ZERO).await?;
        assert!(unexpected.is_none(), "received an unexpected message");
        Err(ConversationError::Internal(
            "refusing to cooperate".to_string(),
        ))
    }
}

#[tokio::test]
async fn test_service_failure_takes_precedence_over_queued_messages() {
    init_tracing();
    let (_server, client) = server_and_client(
        vec![FnFactory::new("failing", CLIENT_TIMEOUT, || {
            Box::new(EventuallyFailingService)
        })],
        ServerConfig::default(),
    );
    let conversation = client.start_conversation("failing").await.unwrap();
    // Wait until the failure has arrived; the regular messages queued
    // before it must not hide it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let received: Result<Value, _> = conversation.receive().await;
    match received {
        Err(ConversationError::ServiceExecution { description, .. }) => {
            assert!(description.contains("refusing to cooperate"), "{}", description);
        }
        other => panic!("expected a service execution failure, got {:?}", other),
    }
}

/// Works for a while without ever talking to the client.
struct DelayedService;

#[async_trait]
impl Service for DelayedService {
    async fn run(&self, _messenger: &ServiceMessenger) -> Result<(), ConversationError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_client_receive_times_out_on_silent_service() {
    init_tracing();
    let (_server, client) = server_and_client(
        vec![FnFactory::new("delayed", Duration::from_millis(50), || {
            Box::new(DelayedService)
        })],
        ServerConfig::default(),
    );
    let conversation = client.start_conversation("delayed").await.unwrap();
    assert_eq!(conversation.client_timeout(), Duration::from_millis(50));

    let nothing: Option<Value> = conversation.try_receive(Duration::ZERO).await.unwrap();
    assert!(nothing.is_none());
    let received: Result<Value, _> = conversation.receive().await;
    assert!(matches!(received, Err(ConversationError::Timeout { .. })));
}

#[tokio::test]
async fn test_progress_reaches_the_listener_in_order() {
    init_tracing();
    let (server, client) = server_and_client(
        vec![FnFactory::new("progress", CLIENT_TIMEOUT, || {
            Box::new(ProgressOnlyService)
        })],
        ServerConfig::default(),
    );
    let conversation = client.start_conversation("progress").await.unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    conversation.set_progress_listener(move |progress: &ProgressInfo| {
        sink.lock().unwrap().push(progress.label().to_string());
    });

    let id = conversation.id().to_string();
    assert!(wait_until_gone(&server, &id).await);

    let labels = seen.lock().unwrap().clone();
    let expected: Vec<String> = (0..10).map(|step| format!("step-{}", step)).collect();
    assert_eq!(labels, expected);
}
