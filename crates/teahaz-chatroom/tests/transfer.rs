//! Integration tests for chunked file upload and download.

use std::sync::{Arc, Mutex};

use teahaz_chatroom::{Chatroom, ChatroomConfig, ChatroomError, Event, EventKind, TransferConfig};
use teahaz_protocol::{Base64Codec, FileId, PayloadCodec};
use teahaz_testkit::FakeServer;

async fn ready_chatroom(server: &Arc<FakeServer>, upload_cap_bytes: usize) -> Chatroom<FakeServer> {
    let config = ChatroomConfig {
        transfer: TransferConfig { upload_cap_bytes },
        ..Default::default()
    };
    let room = Chatroom::builder(FakeServer::URL, Arc::clone(server))
        .config(config)
        .build();
    room.create("tea", "alma", "pw").await.unwrap().unwrap();
    room.create_channel("general").await.unwrap().unwrap();
    room
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_ten_megabyte_file_round_trips() {
    let server = Arc::new(FakeServer::new());
    let room = ready_chatroom(&server, 1 << 20).await;
    let data = pattern(10 * 1024 * 1024);

    let file_id = room.send_file(&data, None).await.unwrap().unwrap();
    let downloaded = room.get_file(&file_id).await.unwrap().unwrap();

    assert_eq!(downloaded.len(), data.len());
    assert!(downloaded == data);
}

#[tokio::test]
async fn test_partial_last_chunk_upload() {
    let server = Arc::new(FakeServer::new().with_section_size(50));
    let room = ready_chatroom(&server, 64).await;
    let chunk = Base64Codec.raw_chunk_size(64);
    let data = pattern(chunk * 7 / 2);

    let file_id = room.send_file(&data, None).await.unwrap().unwrap();

    let uploads = server.requests_to("/files/");
    assert_eq!(uploads.len(), 4);
    for request in &uploads {
        let encoded = request.body.as_ref().and_then(|b| b["data"].as_str()).unwrap();
        assert!(encoded.len() <= 64);
    }
    let finals: Vec<_> = uploads
        .iter()
        .map(|r| r.body.as_ref().and_then(|b| b["final"].as_bool()))
        .collect();
    assert_eq!(finals, vec![Some(false), Some(false), Some(false), Some(true)]);

    let chatroom_id = room.chatroom_id().unwrap();
    assert_eq!(server.file(&chatroom_id, &file_id), Some(data.clone()));
    assert_eq!(room.get_file(&file_id).await.unwrap().unwrap(), data);
}

#[tokio::test]
async fn test_later_chunks_carry_file_id() {
    let server = Arc::new(FakeServer::new());
    let room = ready_chatroom(&server, 16).await;

    let file_id = room.send_file(&pattern(40), None).await.unwrap().unwrap();

    let ids: Vec<_> = server
        .requests_to("/files/")
        .iter()
        .map(|r| r.body.as_ref().and_then(|b| b["fileId"].as_str()).map(str::to_string))
        .collect();
    assert_eq!(ids[0], None);
    assert!(ids[1..].iter().all(|id| id.as_deref() == Some(file_id.as_str())));
}

#[tokio::test]
async fn test_empty_file_round_trips() {
    let server = Arc::new(FakeServer::new());
    let room = ready_chatroom(&server, 1 << 20).await;

    let file_id = room.send_file(&[], None).await.unwrap().unwrap();
    assert_eq!(server.requests_to("/files/").len(), 1);
    assert_eq!(room.get_file(&file_id).await.unwrap().unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_chunk_over_server_cap_is_rejected() {
    let server = Arc::new(FakeServer::new().with_upload_cap(16));
    let room = ready_chatroom(&server, 1 << 20).await;

    let err = room.send_file(&pattern(100), None).await.unwrap_err();
    assert_eq!(err.request_failure().map(|f| f.status), Some(413));
    assert_eq!(server.requests_to("/files/").len(), 1);
}

#[tokio::test]
async fn test_failed_upload_with_subscriber_returns_none() {
    let server = Arc::new(FakeServer::new().with_upload_cap(16));
    let room = ready_chatroom(&server, 1 << 20).await;
    room.subscribe(EventKind::Error, |_| {});

    assert!(room.send_file(&pattern(100), None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_file_download_fails() {
    let server = Arc::new(FakeServer::new());
    let room = ready_chatroom(&server, 1 << 20).await;

    let err = room.get_file(&FileId::from("file-missing")).await.unwrap_err();
    assert_eq!(err.request_failure().map(|f| f.status), Some(404));
}

#[tokio::test]
async fn test_download_failing_mid_file_discards_received_sections() {
    let server = Arc::new(FakeServer::new().with_section_size(10));
    let room = ready_chatroom(&server, 1 << 20).await;
    let file_id = room.send_file(&pattern(35), None).await.unwrap().unwrap();
    server.fail_section(3, 500);

    let err = room.get_file(&file_id).await.unwrap_err();

    assert_eq!(err.request_failure().map(|f| f.status), Some(500));
    let sections: Vec<_> = server
        .requests_to("/files/")
        .into_iter()
        .filter_map(|r| r.header_value("section").map(str::to_string))
        .collect();
    assert_eq!(sections, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_download_failing_mid_file_with_subscriber_returns_none() {
    let server = Arc::new(FakeServer::new().with_section_size(10));
    let room = ready_chatroom(&server, 1 << 20).await;
    let file_id = room.send_file(&pattern(35), None).await.unwrap().unwrap();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    room.subscribe(EventKind::Error, move |event| {
        if let Event::Error(failure) = event {
            sink.lock().unwrap().push(failure.status);
        }
    });
    server.fail_section(2, 503);

    assert!(room.get_file(&file_id).await.unwrap().is_none());
    assert_eq!(*statuses.lock().unwrap(), vec![503]);
}

#[tokio::test]
async fn test_send_file_without_channel_is_invalid_state() {
    let server = Arc::new(FakeServer::new());
    let room = Chatroom::new(FakeServer::URL, Arc::clone(&server));
    room.create("tea", "alma", "pw").await.unwrap();

    let err = room.send_file(b"data", None).await.unwrap_err();
    assert!(matches!(err, ChatroomError::InvalidState(_)));
}
