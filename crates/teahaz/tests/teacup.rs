//! Integration tests for the multi-chatroom client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use teahaz::prelude::*;
use teahaz_testkit::FakeServer;

const INTERVAL: Duration = Duration::from_millis(100);

fn teacup(server: &Arc<FakeServer>) -> Teacup<FakeServer> {
    Teacup::builder(Arc::clone(server))
        .config(ChatroomConfig {
            poll: PollConfig::with_interval(INTERVAL),
            ..Default::default()
        })
        .build()
}

/// Creates `tea` with a `general` channel and returns its id.
async fn seed_chatroom(teacup: &Teacup<FakeServer>) -> ChatroomId {
    let room = teacup
        .create_chatroom(FakeServer::URL, "tea", "alma", "pw")
        .await
        .unwrap()
        .unwrap();
    room.create_channel("general").await.unwrap().unwrap();
    room.chatroom_id().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_create_chatroom_registers_and_activates() {
    let server = Arc::new(FakeServer::new());
    let teacup = teacup(&server);

    let id = seed_chatroom(&teacup).await;

    let registry = teacup.registry();
    assert_eq!(registry.servers(), vec![FakeServer::URL]);
    let active = registry.active().unwrap();
    assert_eq!(active.chatroom_id, id);
    assert_eq!(active.chatroom_name, "tea");
    assert_eq!(active.username, "alma");
    assert_eq!(teacup.active().and_then(|r| r.chatroom_id()), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_login_with_held_credential_skips_login_request() {
    let server = Arc::new(FakeServer::new());
    let teacup = teacup(&server);
    let id = seed_chatroom(&teacup).await;

    teacup.login(FakeServer::URL, &id, "alma", "pw").await.unwrap().unwrap();

    assert!(server.requests_to("/login/").is_empty());
    assert_eq!(teacup.chatrooms().len(), 1);
    assert_eq!(teacup.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_login_unknown_chatroom_sends_login_request() {
    let server = Arc::new(FakeServer::new());
    let id = seed_chatroom(&teacup(&server)).await;

    let fresh = teacup(&server);
    let room = fresh.login(FakeServer::URL, &id, "alma", "pw").await.unwrap().unwrap();

    assert_eq!(server.requests_to("/login/").len(), 1);
    assert_eq!(room.active_channel().map(|c| c.name), Some("general".to_string()));
    assert_eq!(fresh.get_chatroom("tea").and_then(|r| r.chatroom_id()), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_is_not_registered() {
    let server = Arc::new(FakeServer::new());
    let id = seed_chatroom(&teacup(&server)).await;

    let fresh = teacup(&server);
    let err = fresh.login(FakeServer::URL, &id, "alma", "wrong").await.unwrap_err();

    assert_eq!(err.request_failure().map(|f| f.status), Some(401));
    assert!(fresh.registry().is_empty());
    assert!(fresh.chatrooms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_subscriber_sees_join_failures() {
    let server = Arc::new(FakeServer::new());
    let id = seed_chatroom(&teacup(&server)).await;

    let fresh = teacup(&server);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    fresh.subscribe_all(EventKind::Error, move |event| {
        if let Event::Error(failure) = event {
            sink.lock().unwrap().push(failure.status);
        }
    });

    let room = fresh.login(FakeServer::URL, &id, "alma", "wrong").await.unwrap();
    assert!(room.is_none());
    assert_eq!(*statuses.lock().unwrap(), vec![401]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_all_reaches_later_chatrooms() {
    let server = Arc::new(FakeServer::new());
    let teacup = teacup(&server);
    let texts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&texts);
    teacup.subscribe_all(EventKind::NewMessage, move |event| {
        if let Some(text) = event.message().and_then(|m| m.text()) {
            sink.lock().unwrap().push(text.to_string());
        }
    });

    seed_chatroom(&teacup).await;
    let room = teacup.get_chatroom("tea").unwrap();
    assert!(room.is_running());

    room.send("hi all", None).await.unwrap();
    tokio::time::sleep(INTERVAL * 2).await;
    assert_eq!(*texts.lock().unwrap(), vec!["hi all".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_use_invite_joins_second_chatroom_user() {
    let server = Arc::new(FakeServer::new());
    let owner = teacup(&server);
    seed_chatroom(&owner).await;
    let invite = owner
        .get_chatroom("tea")
        .unwrap()
        .create_invite(3, 4_000_000_000.0)
        .await
        .unwrap()
        .unwrap();

    let guest = teacup(&server);
    let room = guest
        .use_invite(FakeServer::URL, &invite.chatroom_id, &invite.id, "bob", "pw2")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(room.context().username(), Some("bob"));
    assert_eq!(guest.registry().active().map(|a| a.username.as_str()), Some("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_every_chatroom() {
    let server = Arc::new(FakeServer::new());
    let teacup = teacup(&server);
    teacup.subscribe_all(EventKind::NewMessage, |_| {});
    seed_chatroom(&teacup).await;
    tokio::time::sleep(INTERVAL * 2).await;

    teacup.stop();
    tokio::time::sleep(INTERVAL).await;
    let polls = server.requests_to("/messages/").len();
    tokio::time::sleep(INTERVAL * 5).await;

    assert_eq!(server.requests_to("/messages/").len(), polls);
    assert!(teacup.chatrooms().iter().all(|r| !r.is_running()));
}
