//! Integration tests for the WebSocket gateway: handshake, fan-out, receipts,
//! deletion, typing, presence and offline push.

mod common;

use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use common::start_test_server;

/// Connect and return the close code the server answers with.
async fn close_code_for(addr: std::net::SocketAddr, query: &str) -> u16 {
    let url = format!("ws://{}/ws{}", addr, query);
    let (mut stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("upgrade should succeed before the close");
    match tokio::time::timeout(Duration::from_secs(2), stream.next()).await {
        Ok(Some(Ok(Message::Close(Some(frame))))) => u16::from(frame.code),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_valid_token_registers_session() {
    let server = start_test_server().await;
    let (alice, token) = server.create_user("Alice").await;

    let mut client = server.connect(&token).await;
    assert!(server.state.presence.is_online(&alice.id));

    let pong = client.request("test:ping", json!({ "hello": 1 })).await;
    assert_eq!(pong["success"], true);
    assert_eq!(pong["ok"], true);
    assert_eq!(pong["echo"]["hello"], 1);
    assert_eq!(pong["from"], alice.id.as_str());
}

#[tokio::test]
async fn test_ws_rejects_bad_tokens() {
    let server = start_test_server().await;

    assert_eq!(close_code_for(server.addr, "?token=garbage").await, 4002);
    assert_eq!(close_code_for(server.addr, "").await, 4002);

    let now = chrono::Utc::now().timestamp();
    let claims = parley_server::auth::jwt::TokenClaims {
        user: parley_server::auth::Identity {
            id: "u-expired".into(),
            name: "Old".into(),
            email: String::new(),
            avatar: String::new(),
        },
        iat: now - 7200,
        exp: now - 3600,
    };
    let expired = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&server.state.jwt_secret),
    )
    .unwrap();
    assert_eq!(close_code_for(server.addr, &format!("?token={}", expired)).await, 4001);

    assert!(server.state.presence.online_users().is_empty());
    assert_eq!(server.state.rooms.room_count(), 0);
}

#[tokio::test]
async fn test_ws_unknown_event_and_missing_fields_ack_invalid() {
    let server = start_test_server().await;
    let (_alice, token) = server.create_user("Alice").await;
    let mut client = server.connect(&token).await;

    let resp = client.request("message:explode", json!({})).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["reason"], "invalid");

    let resp = client.request("sendMessage", json!({ "content": "no conversation" })).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["reason"], "invalid");

    // The session survives handler errors.
    let resp = client.request("getContacts", json!({})).await;
    assert_eq!(resp["success"], true);
}

#[tokio::test]
async fn test_ws_get_contacts_excludes_caller() {
    let server = start_test_server().await;
    let (alice, token) = server.create_user("Alice").await;
    let (bob, _) = server.create_user("Bob").await;

    let mut client = server.connect(&token).await;
    let resp = client.request("getContacts", json!({})).await;
    let contacts = resp["data"].as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["id"], bob.id.as_str());
    assert!(contacts.iter().all(|c| c["id"] != alice.id.as_str()));
}

#[tokio::test]
async fn test_ws_send_message_fans_out_to_conversation_room() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap().to_string();

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    a.request("joinConversation", json!({ "conversationId": conv_id })).await;
    b.request("joinConversation", json!({ "conversationId": conv_id })).await;

    let ack = a
        .request(
            "sendMessage",
            json!({ "conversationId": conv_id, "content": "hello", "clientId": "tmp-1" }),
        )
        .await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["data"]["content"], "hello");
    assert_eq!(ack["data"]["senderName"], "Alice");
    assert_eq!(ack["data"]["clientId"], "tmp-1");

    let event = b.next_event("message:new").await;
    assert_eq!(event["id"], ack["data"]["id"]);
    assert_eq!(event["clientId"], "tmp-1");
    assert_eq!(event["senderId"], alice.id.as_str());

    // The sender's own session is in the room too.
    let echoed = a.next_event("message:new").await;
    assert_eq!(echoed["id"], ack["data"]["id"]);

    // Bob is online, so nothing is pushed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.pushes.snapshot().is_empty());
}

#[tokio::test]
async fn test_ws_reply_carries_preview() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, _) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let first = a
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "original" }))
        .await;
    let reply = a
        .request(
            "sendMessage",
            json!({ "conversationId": conv_id, "content": "reply", "replyTo": first["data"]["id"] }),
        )
        .await;
    assert_eq!(reply["data"]["replyTo"], first["data"]["id"]);
    assert_eq!(reply["data"]["replyPreview"]["content"], "original");
    assert_eq!(reply["data"]["replyPreview"]["senderName"], "Alice");
}

#[tokio::test]
async fn test_ws_reply_to_other_conversation_is_rejected() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, _) = server.create_user("Bob").await;
    let (mallory, m_token) = server.create_user("Mallory").await;
    let ab = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let am = server
        .create_conversation(&m_token, "direct", &[&alice.id, &mallory.id])
        .await;
    let (ab_id, am_id) = (ab["id"].as_str().unwrap(), am["id"].as_str().unwrap());

    let mut a = server.connect(&a_token).await;
    let private = a
        .request("sendMessage", json!({ "conversationId": ab_id, "content": "between alice and bob" }))
        .await;

    let mut m = server.connect(&m_token).await;
    m.request("joinConversation", json!({ "conversationId": am_id })).await;
    let resp = m
        .request(
            "sendMessage",
            json!({ "conversationId": am_id, "content": "quoting", "replyTo": private["data"]["id"] }),
        )
        .await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["reason"], "invalid");
    assert!(resp.get("data").is_none());

    let resp = m
        .request(
            "sendMessage",
            json!({ "conversationId": am_id, "content": "quoting", "replyTo": "missing" }),
        )
        .await;
    assert_eq!(resp["reason"], "invalid");

    m.assert_no_event("message:new", std::time::Duration::from_millis(200)).await;
    let joined = m.request("joinConversation", json!({ "conversationId": am_id })).await;
    assert!(joined["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_ws_non_participant_cannot_send_or_join() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, _) = server.create_user("Bob").await;
    let (_eve, e_token) = server.create_user("Eve").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut eve = server.connect(&e_token).await;
    let resp = eve
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "hi" }))
        .await;
    assert_eq!(resp["reason"], "forbidden");

    let resp = eve.request("joinConversation", json!({ "conversationId": conv_id })).await;
    assert_eq!(resp["reason"], "forbidden");

    let resp = eve
        .request("joinConversation", json!({ "conversationId": "does-not-exist" }))
        .await;
    assert_eq!(resp["reason"], "not_found");
}

#[tokio::test]
async fn test_ws_typing_excludes_sender() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    a.request("conversation:subscribe", json!({ "conversationId": conv_id })).await;
    b.request("conversation:subscribe", json!({ "conversationId": conv_id })).await;

    a.emit("typing", json!({ "conversationId": conv_id })).await;
    let typing = b.next_event("typing").await;
    assert_eq!(typing["userId"], alice.id.as_str());
    assert_eq!(typing["name"], "Alice");

    a.emit("stop_typing", json!({ "conversationId": conv_id })).await;
    let stopped = b.next_event("stop_typing").await;
    assert_eq!(stopped["userId"], alice.id.as_str());

    a.assert_no_event("typing", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_ws_read_receipts_reach_every_device() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let mut b_phone = server.connect(&b_token).await;
    let mut b_laptop = server.connect(&b_token).await;
    for client in [&mut a, &mut b_phone, &mut b_laptop] {
        client.request("joinConversation", json!({ "conversationId": conv_id })).await;
    }

    let sent = a
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "seen?" }))
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap();

    let ack = b_phone
        .request("message:read", json!({ "conversationId": conv_id, "messageId": message_id }))
        .await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["updated"], 1);

    for client in [&mut a, &mut b_laptop] {
        let read = client.next_event("message:read").await;
        assert_eq!(read["messageId"], message_id);
        assert_eq!(read["userId"], bob.id.as_str());
    }

    // Second read is a no-op.
    let ack = b_laptop
        .request("message:read", json!({ "conversationId": conv_id, "messageId": message_id }))
        .await;
    assert_eq!(ack["updated"], 0);

    // The sender never lands in their own read-by set.
    let ack = a
        .request("message:read", json!({ "conversationId": conv_id, "messageId": message_id }))
        .await;
    assert_eq!(ack["updated"], 0);

    let joined = b_phone.request("joinConversation", json!({ "conversationId": conv_id })).await;
    let read_by = joined["messages"][0]["readBy"].as_array().unwrap();
    assert_eq!(read_by.len(), 1);
    assert_eq!(read_by[0], bob.id.as_str());
}

#[tokio::test]
async fn test_ws_mark_conversation_read_counts_unread() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    for text in ["one", "two", "three"] {
        a.request("sendMessage", json!({ "conversationId": conv_id, "content": text })).await;
    }
    a.request("joinConversation", json!({ "conversationId": conv_id })).await;

    let mut b = server.connect(&b_token).await;
    let ack = b
        .request("conversation:markRead", json!({ "conversationId": conv_id }))
        .await;
    assert_eq!(ack["updated"], 3);

    let event = a.next_event("conversation:read").await;
    assert_eq!(event["userId"], bob.id.as_str());

    let ack = b
        .request("conversation:markRead", json!({ "conversationId": conv_id }))
        .await;
    assert_eq!(ack["updated"], 0);
}

#[tokio::test]
async fn test_ws_delete_for_everyone_only_own_messages() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    b.request("joinConversation", json!({ "conversationId": conv_id })).await;

    let sent = a
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "oops" }))
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap();

    let denied = b
        .request(
            "message:delete",
            json!({ "conversationId": conv_id, "messageIds": [message_id], "scope": "everyone" }),
        )
        .await;
    assert_eq!(denied["success"], false);
    assert_eq!(denied["reason"], "forbidden");
    assert_eq!(denied["msg"], "Not allowed or time limit exceeded");

    let ok = a
        .request(
            "message:delete",
            json!({ "conversationId": conv_id, "messageIds": [message_id, "missing"], "scope": "everyone" }),
        )
        .await;
    assert_eq!(ok["success"], true);
    assert_eq!(ok["updated"], 1);

    let event = b.next_event("message:deleted").await;
    assert_eq!(event["scope"], "everyone");
    assert_eq!(event["messageIds"], json!([message_id]));

    let joined = b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    let message = &joined["messages"][0];
    assert_eq!(message["isDeleted"], true);
    assert!(message["content"].is_null());

    // Deleted-for-everyone cannot be restored.
    let undone = a
        .request("message:undelete", json!({ "conversationId": conv_id, "messageIds": [message_id] }))
        .await;
    assert_eq!(undone["updated"], 0);
}

#[tokio::test]
async fn test_ws_delete_for_me_then_undelete() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    a.request("joinConversation", json!({ "conversationId": conv_id })).await;

    let sent = a
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "keep" }))
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap();

    let ack = b
        .request("message:delete", json!({ "conversationId": conv_id, "messageIds": [message_id] }))
        .await;
    assert_eq!(ack["updated"], 1);
    let event = a.next_event("message:deleted").await;
    assert_eq!(event["scope"], "me");
    assert_eq!(event["userId"], bob.id.as_str());

    let joined = b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    assert_eq!(joined["messages"][0]["deletedFor"], json!([bob.id]));
    assert_eq!(joined["messages"][0]["content"], "keep");

    let ack = b
        .request("message:undelete", json!({ "conversationId": conv_id, "messageIds": [message_id] }))
        .await;
    assert_eq!(ack["updated"], 1);
    let event = a.next_event("message:undeleted").await;
    assert_eq!(event["userId"], bob.id.as_str());

    let joined = b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    assert!(joined["messages"][0]["deletedFor"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_ws_forward_records_provenance() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let (carol, _) = server.create_user("Carol").await;
    let ab = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let bc = server
        .create_conversation(&b_token, "direct", &[&bob.id, &carol.id])
        .await;
    let (ab_id, bc_id) = (ab["id"].as_str().unwrap(), bc["id"].as_str().unwrap());
    server.add_push_token(&carol.id, "carol-device").await;

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    let sent = a
        .request("sendMessage", json!({ "conversationId": ab_id, "content": "pass it on" }))
        .await;

    let fwd = b
        .request(
            "message:forward",
            json!({ "sourceMessageId": sent["data"]["id"], "targetConversationId": bc_id }),
        )
        .await;
    assert_eq!(fwd["success"], true);
    assert_eq!(fwd["data"]["content"], "pass it on");
    assert_eq!(fwd["data"]["conversationId"], bc_id);
    assert_eq!(fwd["data"]["forwardedFromUser"], alice.id.as_str());
    assert_eq!(fwd["data"]["forwardedFromChatId"], ab_id);
    assert_eq!(fwd["data"]["forwardedFromUserName"], "Alice");
    assert!(fwd["data"]["readBy"].as_array().unwrap().is_empty());

    let pushes = server.pushes.wait_for(1).await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, vec!["carol-device".to_string()]);
    assert_eq!(pushes[0].1.title, "Bob");

    let missing = b
        .request(
            "message:forward",
            json!({ "sourceMessageId": "missing", "targetConversationId": bc_id }),
        )
        .await;
    assert_eq!(missing["reason"], "not_found");
}

#[tokio::test]
async fn test_offline_recipient_gets_one_push_then_reads_history() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    server.add_push_token(&bob.id, "bob-device").await;

    let mut a = server.connect(&a_token).await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let sent = a
        .request("sendMessage", json!({ "conversationId": conv_id, "content": "hello" }))
        .await;
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();

    let pushes = server.pushes.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let pushes_after = server.pushes.snapshot();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes_after.len(), 1);
    let (tokens, push) = &pushes_after[0];
    assert_eq!(tokens, &vec!["bob-device".to_string()]);
    assert_eq!(push.body, "hello");
    assert_eq!(push.title, "Alice");
    assert_eq!(push.collapse_key, message_id);
    assert_eq!(push.data.get("conversationId").map(String::as_str), Some(conv_id));

    let mut b = server.connect(&b_token).await;
    let joined = b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    let messages = joined["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hello");
    assert!(messages[0]["readBy"].as_array().unwrap().is_empty());

    let emitted = b.next_event("conversation:joined").await;
    assert_eq!(emitted["messages"].as_array().unwrap().len(), 1);

    b.request("message:read", json!({ "conversationId": conv_id, "messageId": message_id }))
        .await;
    let joined = b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    assert_eq!(joined["messages"][0]["readBy"], json!([bob.id]));

    // Bob is online now: the next message is not pushed.
    a.request("sendMessage", json!({ "conversationId": conv_id, "content": "again" }))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.pushes.snapshot().len(), 1);
}

#[tokio::test]
async fn test_disconnect_broadcasts_offline_and_clears_rooms() {
    let server = start_test_server().await;
    let (alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;
    let conv = server
        .create_conversation(&a_token, "direct", &[&alice.id, &bob.id])
        .await;
    let conv_id = conv["id"].as_str().unwrap();

    let mut a = server.connect(&a_token).await;
    let mut b = server.connect(&b_token).await;
    let online = a.next_event("user:online").await;
    assert_eq!(online["userId"], bob.id.as_str());

    b.request("joinConversation", json!({ "conversationId": conv_id })).await;
    assert_eq!(server.state.rooms.member_count(&format!("conversation:{}", conv_id)), 1);

    b.close().await;
    let offline = a.next_event("user:offline").await;
    assert_eq!(offline["userId"], bob.id.as_str());

    assert!(!server.state.presence.is_online(&bob.id));
    assert_eq!(server.state.rooms.member_count(&format!("conversation:{}", conv_id)), 0);
    assert_eq!(server.state.rooms.member_count(&format!("user:{}", bob.id)), 0);
    assert!(server.state.presence.is_online(&alice.id));
}

#[tokio::test]
async fn test_second_device_keeps_user_online() {
    let server = start_test_server().await;
    let (_alice, a_token) = server.create_user("Alice").await;
    let (bob, b_token) = server.create_user("Bob").await;

    let mut a = server.connect(&a_token).await;
    let phone = server.connect(&b_token).await;
    let _laptop = server.connect(&b_token).await;
    a.next_event("user:online").await;

    phone.close().await;
    a.assert_no_event("user:offline", Duration::from_millis(300)).await;
    assert!(server.state.presence.is_online(&bob.id));
    assert_eq!(server.state.presence.connection_count(&bob.id), 1);
}

#[tokio::test]
async fn test_update_profile_issues_new_token() {
    let server = start_test_server().await;
    let (alice, token) = server.create_user("Alice").await;
    let mut client = server.connect(&token).await;

    let resp = client
        .request("updateProfile", json!({ "name": "Alicia", "avatar": "a.png" }))
        .await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["user"]["name"], "Alicia");
    assert_eq!(resp["user"]["avatar"], "a.png");

    let new_token = resp["token"].as_str().unwrap();
    let identity = parley_server::auth::jwt::verify(&server.state.jwt_secret, new_token).unwrap();
    assert_eq!(identity.id, alice.id);
    assert_eq!(identity.name, "Alicia");

    let pong = client.request("test:ping", json!(null)).await;
    assert_eq!(pong["from"], alice.id.as_str());
}
