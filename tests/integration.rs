//! Integration tests: health, signed triggers, the per-user push stream, a
//! push channel client connected to a live relay, and views folded from one
//! registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use dashfeed::error::AppResult;
use dashfeed::models::{
    Categorization, ContentBlock, Conversation, EventEnvelope, EventKind, Message, MessageCategory, Post,
};
use dashfeed::services::hub::USER_BUFFER;
use dashfeed::services::{
    Categorizer, ChannelState, ClassifierPipeline, ClassifierSettings, Delivery, EventChannel, EventHub,
    HttpPushTransport, ReconnectPolicy, SessionCredentials, SubscriptionRegistry, TriggerAuth,
};
use dashfeed::views::{ActivityFeed, Consumer, ConversationList, ConversationView, Fold, MessageInbox, PostHistory};
use dashfeed::{auth::JwtSecret, create_app, AppState};
use serde_json::json;
use tokio::sync::RwLock;
use tower::util::ServiceExt;

const APP_KEY: &str = "test-key";
const APP_SECRET: &str = "test-secret";
const JWT_SECRET: &str = "test-jwt-secret-min-32-chars!!";

struct FixedCategorizer(MessageCategory);

#[async_trait]
impl Categorizer for FixedCategorizer {
    async fn categorize(&self, _message: &Message, _history: &[Message]) -> AppResult<Categorization> {
        Ok(Categorization {
            category: self.0,
            reasoning: "fixed".to_string(),
        })
    }
}

fn test_state() -> AppState {
    let hub = EventHub::new();
    let classifier = ClassifierPipeline::new(
        Arc::new(FixedCategorizer(MessageCategory::Urgent)),
        Arc::new(hub.clone()),
        ClassifierSettings::default(),
    );
    AppState {
        hub,
        classifier: Arc::new(classifier),
        trigger_auth: TriggerAuth::new(APP_KEY.to_string(), APP_SECRET.to_string()),
        jwt_secret: JwtSecret::new(JWT_SECRET.to_string()),
    }
}

fn signed_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    let body = body.to_string();
    let signature = TriggerAuth::new(APP_KEY.to_string(), APP_SECRET.to_string())
        .sign(body.as_bytes())
        .unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-app-key", APP_KEY)
        .header("x-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn new_message_event() -> serde_json::Value {
    json!({
        "type": "newMessage",
        "data": { "id": "m1", "conversationId": "c1", "senderId": "u2", "content": "hello" }
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let app = create_app(test_state());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
}

#[tokio::test]
async fn broadcast_rejects_unsigned_requests() {
    let app = create_app(test_state());
    let body = json!({ "recipients": ["u1"], "event": new_message_event() }).to_string();

    let req = Request::builder()
        .method("POST")
        .uri("/api/broadcast")
        .header("content-type", "application/json")
        .header("x-app-key", APP_KEY)
        .header("x-signature", "00ff")
        .body(Body::from(body.clone()))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/broadcast")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn broadcast_delivers_to_connected_recipients() {
    let state = test_state();
    let mut u1 = state.hub.subscribe("u1").await;
    let app = create_app(state);

    let res = app
        .oneshot(signed_post(
            "/api/broadcast",
            json!({ "recipients": ["u1", "u3"], "event": new_message_event() }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    assert_eq!(json["recipients"], 2);
    assert_eq!(json["delivered"], 1);

    let envelope = u1.recv().await.unwrap();
    assert_eq!(envelope.kind(), EventKind::NewMessage);
}

#[tokio::test]
async fn broadcast_rejects_malformed_events() {
    let app = create_app(test_state());
    let res = app
        .oneshot(signed_post(
            "/api/broadcast",
            json!({ "recipients": ["u1"], "event": { "type": "messageCategorized", "data": { "messageId": "m1", "category": "fanMail", "reasoning": "" } } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn classify_notifies_everyone_but_the_sender() {
    let state = test_state();
    let mut recipient = state.hub.subscribe("u1").await;
    let mut sender = state.hub.subscribe("u2").await;
    let app = create_app(state);

    let res = app
        .oneshot(signed_post(
            "/api/classify",
            json!({
                "message": { "id": "m1", "conversationId": "c1", "senderId": "u2", "content": "need this today" },
                "history": [],
                "participants": ["u1", "u2"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(res).await["scheduled"], 1);

    let envelope = tokio::time::timeout(Duration::from_secs(2), recipient.recv())
        .await
        .expect("no categorization delivered")
        .unwrap();
    assert_eq!(
        *envelope,
        EventEnvelope::MessageCategorized {
            message_id: "m1".into(),
            category: MessageCategory::Urgent,
            reasoning: "fixed".into(),
        }
    );
    assert!(sender.try_recv().is_err());
}

#[tokio::test]
async fn classify_validates_participants() {
    let app = create_app(test_state());
    let res = app
        .oneshot(signed_post(
            "/api/classify",
            json!({
                "message": { "id": "m1", "conversationId": "c1", "senderId": "u2", "content": "hi" },
                "participants": []
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_require_a_session() {
    let app = create_app(test_state());
    let req = Request::builder().uri("/api/events").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/events")
        .header("cookie", "session=not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn events_accept_session_cookie() {
    let token = JwtSecret::new(JWT_SECRET.to_string()).issue("u1").unwrap();
    let app = create_app(test_state());
    let req = Request::builder()
        .uri("/api/events")
        .header("cookie", format!("session={}", token))
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res.headers().get("content-type").and_then(|v| v.to_str().ok());
    assert_eq!(content_type, Some("text/event-stream"));
}

#[tokio::test]
async fn channel_client_receives_relayed_envelopes() {
    let state = test_state();
    let hub = state.hub.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });

    let token = JwtSecret::new(JWT_SECRET.to_string()).issue("u1").unwrap();
    let transport = HttpPushTransport::new(
        format!("http://{}/api/events", addr),
        SessionCredentials::Cookie(token),
    )
    .unwrap();
    let registry = SubscriptionRegistry::new(16);
    let channel = EventChannel::new(Arc::new(transport), registry.clone(), ReconnectPolicy::never());
    let mut sub = registry.subscribe();
    let mut state_rx = channel.state();
    let lease = channel.connect();

    tokio::time::timeout(Duration::from_secs(5), state_rx.wait_for(|s| s.is_live()))
        .await
        .expect("channel never went live")
        .unwrap();

    let envelope = EventEnvelope::from_value(new_message_event()).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.broadcast(&["u1".to_string()], envelope.clone()).await == 0 {
        assert!(tokio::time::Instant::now() < deadline, "stream never subscribed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let delivery = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("envelope not relayed")
        .unwrap();
    match delivery {
        Delivery::Event(received) => assert_eq!(*received, envelope),
        Delivery::Lagged { .. } => panic!("unexpected lag"),
    }

    drop(lease);
    assert_eq!(channel.current_state(), ChannelState::Idle);
    server.abort();
}

#[tokio::test]
async fn lagging_push_stream_is_closed() {
    let state = test_state();
    let hub = state.hub.clone();
    let token = JwtSecret::new(JWT_SECRET.to_string()).issue("u1").unwrap();
    let app = create_app(state);
    let req = Request::builder()
        .uri("/api/events")
        .header("cookie", format!("session={}", token))
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // the body is not read yet, so one more than the buffer overflows it
    let envelope = EventEnvelope::from_value(new_message_event()).unwrap();
    for _ in 0..=USER_BUFFER {
        hub.broadcast(&["u1".to_string()], envelope.clone()).await;
    }

    let body = tokio::time::timeout(
        Duration::from_secs(2),
        axum::body::to_bytes(res.into_body(), usize::MAX),
    )
    .await
    .expect("lagging stream was not closed")
    .unwrap();
    assert!(body.is_empty());
}

fn at(minute: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + minute * 60, 0).unwrap()
}

fn conversation(id: &str, title: Option<&str>, participants: &[&str], minute: i64) -> Conversation {
    Conversation {
        id: id.into(),
        title: title.map(str::to_string),
        last_message_id: None,
        created_at: at(minute),
        updated_at: at(minute),
        participants: participants.iter().map(|p| p.to_string()).collect(),
    }
}

fn message(id: &str, conversation_id: &str, sender: &str, minute: i64) -> EventEnvelope {
    EventEnvelope::NewMessage(Message {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender_id: sender.into(),
        content: vec![ContentBlock::text(format!("{} says hi", sender))],
        created_at: at(minute),
        updated_at: at(minute),
    })
}

fn post(id: &str, owner: &str, minute: i64) -> EventEnvelope {
    EventEnvelope::NewPost(Post {
        id: id.into(),
        content: vec![ContentBlock::text("launch day")],
        created_at: at(minute),
        created_by: owner.into(),
        user_id: owner.into(),
        updated_at: at(minute),
    })
}

fn categorized(id: &str, category: MessageCategory) -> EventEnvelope {
    EventEnvelope::MessageCategorized {
        message_id: id.into(),
        category,
        reasoning: format!("looks {}", category),
    }
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    open: Vec<(String, Option<MessageCategory>)>,
    list: Vec<(String, Option<String>, Option<String>)>,
    tabs: Vec<(MessageCategory, Vec<String>)>,
    uncategorized: Vec<String>,
    posts: Vec<String>,
    feed: Vec<(EventKind, String, String)>,
}

fn snapshot(
    open: &ConversationView,
    list: &ConversationList,
    inbox: &MessageInbox,
    posts: &PostHistory,
    feed: &ActivityFeed,
) -> Snapshot {
    Snapshot {
        open: open
            .messages()
            .iter()
            .map(|m| (m.message.id.clone(), m.category.as_ref().map(|c| c.category)))
            .collect(),
        list: list
            .items()
            .iter()
            .map(|c| (c.id.clone(), c.title.clone(), c.last_message_id.clone()))
            .collect(),
        tabs: MessageCategory::ALL
            .into_iter()
            .map(|c| (c, inbox.tab(c).to_vec()))
            .collect(),
        uncategorized: inbox.uncategorized().to_vec(),
        posts: posts.posts().iter().map(|p| p.id.clone()).collect(),
        feed: feed
            .items()
            .map(|i| (i.kind, i.subject_id.clone(), i.summary.clone()))
            .collect(),
    }
}

#[tokio::test]
async fn views_fold_matching_envelopes_once_in_publish_order() {
    let published = vec![
        EventEnvelope::NewConversation(conversation("c1", None, &["me", "a"], 0)),
        EventEnvelope::NewConversation(conversation("c2", None, &["a", "b"], 0)),
        message("m1", "c1", "a", 1),
        post("p1", "me", 2),
        message("m2", "c1", "a", 3),
        categorized("m1", MessageCategory::Urgent),
        message("m1", "c1", "a", 1),
        EventEnvelope::EditConversation(conversation("c1", Some("Brand deal"), &["me", "a"], 4)),
        EventEnvelope::UsersAddedToConversation {
            conversation: conversation("c3", None, &["b", "me"], 5),
            new_user_ids: vec!["me".into()],
        },
        message("m3", "c3", "b", 6),
        categorized("m1", MessageCategory::Urgent),
        post("p1", "me", 2),
        message("m2", "c1", "a", 3),
        categorized("m2", MessageCategory::Spam),
        EventEnvelope::NewConversation(conversation("c1", None, &["me", "a"], 0)),
        post("p2", "a", 7),
        message("m4", "c2", "a", 8),
        message("m5", "c1", "me", 9),
    ];

    let registry = SubscriptionRegistry::new(64);
    let open = Arc::new(RwLock::new(ConversationView::new("c1")));
    let list = Arc::new(RwLock::new(ConversationList::new("me")));
    let inbox = Arc::new(RwLock::new(MessageInbox::new("me")));
    let posts = Arc::new(RwLock::new(PostHistory::new("me")));
    let feed = Arc::new(RwLock::new(ActivityFeed::default()));
    let mut open_consumer = Consumer::new("open", open.clone(), registry.subscribe());
    let mut list_consumer = Consumer::new("list", list.clone(), registry.subscribe());
    let mut inbox_consumer = Consumer::new("inbox", inbox.clone(), registry.subscribe());
    let mut posts_consumer = Consumer::new("posts", posts.clone(), registry.subscribe());
    let mut feed_consumer = Consumer::new("feed", feed.clone(), registry.subscribe());

    for envelope in &published {
        registry.publish(envelope.clone());
    }
    for handled in [
        open_consumer.catch_up().await,
        list_consumer.catch_up().await,
        inbox_consumer.catch_up().await,
        posts_consumer.catch_up().await,
        feed_consumer.catch_up().await,
    ] {
        assert_eq!(handled, published.len());
    }

    // the same stream with every repeat removed, folded directly
    let mut distinct: Vec<EventEnvelope> = Vec::new();
    for envelope in &published {
        if !distinct.contains(envelope) {
            distinct.push(envelope.clone());
        }
    }
    let mut ref_open = ConversationView::new("c1");
    let mut ref_list = ConversationList::new("me");
    let mut ref_inbox = MessageInbox::new("me");
    let mut ref_posts = PostHistory::new("me");
    let mut ref_feed = ActivityFeed::default();
    for envelope in &distinct {
        ref_open.apply(envelope);
        ref_list.apply(envelope);
        ref_inbox.apply(envelope);
        ref_posts.apply(envelope);
        ref_feed.apply(envelope);
    }

    let folded = snapshot(
        &*open.read().await,
        &*list.read().await,
        &*inbox.read().await,
        &*posts.read().await,
        &*feed.read().await,
    );
    assert_eq!(folded, snapshot(&ref_open, &ref_list, &ref_inbox, &ref_posts, &ref_feed));

    assert_eq!(
        folded.open,
        vec![
            ("m1".to_string(), Some(MessageCategory::Urgent)),
            ("m2".to_string(), Some(MessageCategory::Spam)),
            ("m5".to_string(), None),
        ]
    );
    assert_eq!(
        folded.list,
        vec![
            ("c1".to_string(), Some("Brand deal".to_string()), Some("m5".to_string())),
            ("c3".to_string(), None, Some("m3".to_string())),
        ]
    );
    assert_eq!(inbox.read().await.tab(MessageCategory::Urgent).to_vec(), vec!["m1".to_string()]);
    assert_eq!(folded.uncategorized, vec!["m4".to_string(), "m3".to_string()]);
    assert_eq!(folded.posts, vec!["p1".to_string()]);
}
