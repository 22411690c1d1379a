//! Integration tests for the chat client against a fake OpenAI-compatible
//! server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};

use seq_llm::chat::{completion_text, ChatClient, ChatError, ChatMessage, ChatRequest};

use super::{delta_frame, spawn_server};

/// Authorization header and JSON body of each request received.
type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn completions(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let streaming = body["stream"] == json!(true);
    seen.lock().unwrap().push((auth, body));

    if streaming {
        let sse = format!(
            "event: completion\n{}{}{}data: [DONE]\n\n",
            delta_frame("Hel"),
            "data: {broken\n\n",
            delta_frame("lo"),
        );
        ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
    } else {
        Json(json!({
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}}]
        }))
        .into_response()
    }
}

fn app(seen: Seen) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(completions))
        .route(
            "/v1/models",
            get(|| async { Json(json!({"object": "list", "data": [{"id": "brain"}]})) }),
        )
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .with_state(seen)
}

fn request() -> ChatRequest {
    ChatRequest::new(
        "brain",
        vec![ChatMessage::system("Be brief."), ChatMessage::user("Say hello")],
    )
    .temperature(0.2)
    .max_tokens(32)
}

#[tokio::test]
async fn stream_chat_yields_tokens_in_order() {
    let seen = Seen::default();
    let base = spawn_server(app(seen.clone())).await;
    let client = ChatClient::new(&base, Some("sk-local")).unwrap();

    let tokens: Vec<String> = client
        .stream_chat(&request())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(tokens, vec!["Hel", "lo"]);
    let seen = seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-local"));
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["model"], json!("brain"));
    assert_eq!(body["max_tokens"], json!(32));
    assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
}

#[tokio::test]
async fn chat_completion_returns_full_response() {
    let seen = Seen::default();
    let base = spawn_server(app(seen.clone())).await;
    let client = ChatClient::new(&base, None).unwrap();

    let mut streaming = request();
    streaming.stream = true;
    let response = client.chat_completion(&streaming).await.unwrap();

    assert_eq!(completion_text(&response).as_deref(), Some("Hello"));
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-default"));
    assert_eq!(seen[0].1["stream"], json!(false));
}

#[tokio::test]
async fn tokens_arrive_before_the_body_ends() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let first = stream::iter([Ok::<_, std::io::Error>(delta_frame("first"))]);
            let body = Body::from_stream(first.chain(stream::pending()));
            ([(header::CONTENT_TYPE, "text/event-stream")], body)
        }),
    );
    let base = spawn_server(app).await;
    let client = ChatClient::new(&base, None).unwrap();

    let mut tokens = client.stream_chat(&request()).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), tokens.next())
        .await
        .expect("first token should not wait for the end of the body");

    assert_eq!(first.unwrap().unwrap(), "first");
}

#[tokio::test]
async fn error_status_carries_body() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "Loading model") }),
    );
    let base = spawn_server(app).await;
    let client = ChatClient::new(&base, None).unwrap();

    let Err(err) = client.stream_chat(&request()).await else {
        panic!("expected an error status");
    };

    match &err {
        ChatError::Status { status, body, .. } => {
            assert_eq!(*status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, "Loading model");
        }
        other => panic!("Expected Status, got {other:?}"),
    }
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn non_json_completion_is_a_parse_error() {
    let app = Router::new().route("/v1/chat/completions", post(|| async { "not json" }));
    let base = spawn_server(app).await;
    let client = ChatClient::new(&base, None).unwrap();

    let err = client.chat_completion(&request()).await.unwrap_err();

    assert!(matches!(err, ChatError::ParseError { .. }), "{err:?}");
}

#[tokio::test]
async fn list_models_and_health() {
    let base = spawn_server(app(Seen::default())).await;
    let client = ChatClient::new(&base, None).unwrap();

    let models = client.list_models().await.unwrap();
    assert_eq!(models["data"][0]["id"], json!("brain"));
    assert!(client.health_check().await);
}

#[tokio::test]
async fn health_check_requires_200() {
    let app = Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading") }),
    );
    let base = spawn_server(app).await;
    let client = ChatClient::new(&base, None).unwrap();

    assert!(!client.health_check().await);
}

#[tokio::test]
async fn connection_refused_is_a_request_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ChatClient::new(&format!("http://127.0.0.1:{port}"), None).unwrap();

    let Err(err) = client.stream_chat(&request()).await else {
        panic!("expected a connection error");
    };

    assert!(matches!(err, ChatError::RequestFailed { .. }), "{err:?}");
}
