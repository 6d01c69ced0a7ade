//! Assistant chat route (Server-Sent Events)

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Router,
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

use super::{HealthState, JsonBody};
use crate::error::HealthError;
use crate::models::ChatRequest;
use crate::AuthenticatedUserId;

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .with_state(state)
}

/// Stream completion deltas as `message` events, then a final `done` event
/// POST /chat
async fn chat(
    State(state): State<HealthState>,
    _user: AuthenticatedUserId,
    JsonBody(req): JsonBody<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HealthError> {
    if req.messages.is_empty() {
        return Err(HealthError::Validation("messages cannot be empty".to_string()));
    }

    let mut deltas = state.chat.respond(&req).await;
    let stream = async_stream::stream! {
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => yield Ok(Event::default().event("message").data(text)),
                Err(e) => {
                    warn!(error = %e, "Chat stream interrupted");
                    yield Ok(Event::default()
                        .event("error")
                        .data(serde_json::json!({ "message": e.to_string() }).to_string()));
                    break;
                }
            }
        }
        yield Ok(Event::default().event("done").data("[DONE]"));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};

    fn request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_streams_offline_reply() {
        let app = TestApp::new().await;
        let response = app
            .send(
                "u1",
                request(r#"{"messages":[{"role":"user","content":"When should I take my pill?"}]}"#),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = TestApp::text(response).await;
        assert!(body.contains("event: message"));
        assert!(body.contains("offline"));
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_conversation() {
        let app = TestApp::new().await;
        let response = app.send("u1", request(r#"{"messages":[]}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
