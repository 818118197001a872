//! API routes

mod error;

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{
    BotRequest, ChatReply, ChatRequest, ClassEntry, RetrievedPassage, StoredMessage, StreamEvent,
};
use crate::AppState;

pub use error::ApiError;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub class: ClassEntry,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct TextResponse {
    pub text: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider,
    })
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.chat_engine.chat(request).await?))
}

async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    let stream = state.chat_engine.chat_stream(request).await?;

    tracing::debug!(conversation_id = %stream.conversation_id, "streaming answer");
    let events = stream
        .into_events()
        .map(|event| Ok::<Event, Infallible>(to_sse(event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: StreamEvent) -> Event {
    let (name, data) = match event {
        StreamEvent::Delta(text) => ("delta", json!({ "text": text })),
        StreamEvent::Done {
            conversation_id,
            intent,
        } => (
            "done",
            json!({ "conversation_id": conversation_id, "intent": intent }),
        ),
        StreamEvent::Cancelled { reason } => ("cancelled", json!({ "reason": reason })),
        StreamEvent::Error { message } => ("error", json!({ "error": message })),
    };
    Event::default().event(name).data(data.to_string())
}

async fn stop(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.chat_engine.stop(&conversation_id) {
        Ok(Json(json!({ "stopped": true })))
    } else {
        Err(ApiError::NotFound(format!(
            "no generation running for {}",
            conversation_id
        )))
    }
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let session = state.chat_engine.session();
    if !session.exists(&conversation_id).await? {
        return Err(ApiError::NotFound(conversation_id));
    }
    Ok(Json(session.stored_messages(&conversation_id).await?))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.chat_engine.session().delete(&conversation_id).await? {
        tracing::info!(%conversation_id, "conversation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(conversation_id))
    }
}

async fn bot(
    State(state): State<AppState>,
    payload: Result<Json<BotRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.chat_engine.bot(request).await?))
}

async fn retrieve(
    State(state): State<AppState>,
    payload: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Result<Json<Vec<RetrievedPassage>>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.chat_engine.retrieve(&request.query).await?))
}

async fn reminder(
    State(state): State<AppState>,
    payload: Result<Json<ReminderRequest>, JsonRejection>,
) -> Result<Json<TextResponse>, ApiError> {
    let Json(request) = payload?;
    let text = state.chat_engine.reminder(&request.class).await?;
    Ok(Json(TextResponse { text }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
        .route("/v1/chat/:conversation_id/stop", post(stop))
        .route(
            "/v1/conversations/:conversation_id/messages",
            get(conversation_messages),
        )
        .route(
            "/v1/conversations/:conversation_id",
            axum::routing::delete(delete_conversation),
        )
        .route("/v1/retrieve", post(retrieve))
        .route("/v1/bot", post(bot))
        .route("/v1/reminder", post(reminder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::{AssistantConfig, PromptSet};
    use crate::core::testing::{
        seeded_store, FixedEmbedder, ScriptedModel, StaticCurriculum, StaticIndex,
    };
    use crate::core::{ChatEngine, Collaborators, SessionStore};
    use crate::providers::IndexMatch;

    async fn app(model: ScriptedModel) -> Router {
        app_with_index(model, Vec::new()).await
    }

    async fn app_with_index(model: ScriptedModel, matches: Vec<IndexMatch>) -> Router {
        let session = Arc::new(SessionStore::new_in_memory().await.unwrap());
        let parts = Collaborators {
            llm: Arc::new(model),
            embedder: Arc::new(FixedEmbedder::default()),
            index: Arc::new(StaticIndex::new(matches)),
            records: Arc::new(seeded_store().await),
            curriculum: Arc::new(StaticCurriculum(None)),
        };
        let engine = ChatEngine::new(
            parts,
            session,
            &AssistantConfig::default(),
            PromptSet::default(),
        );
        router().with_state(AppState {
            chat_engine: Arc::new(engine),
            provider: "scripted",
        })
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn answering() -> ScriptedModel {
        ScriptedModel::failing()
            .classifying("INTENT: Other")
            .streaming(&["Halo ", "Budi."])
    }

    #[tokio::test]
    async fn test_chat_returns_buffered_answer() {
        let app = app(answering()).await;
        let response = app
            .clone()
            .oneshot(post(
                "/v1/chat",
                r#"{"conversation_id":"c1","user_id":"u-budi","messages":[{"role":"user","content":"Halo"}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["text"], "Halo Budi.");
        assert_eq!(body["conversation_id"], "c1");
        assert_eq!(body["intent"], "other");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/conversations/c1/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let messages: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(messages.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_request_errors_map_to_status() {
        let app = app(answering()).await;

        let malformed = app.clone().oneshot(post("/v1/chat", "{not json")).await.unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(malformed).await.contains("bad_request"));

        let anonymous = app
            .clone()
            .oneshot(post(
                "/v1/chat",
                r#"{"messages":[{"role":"user","content":"Halo"}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let failing = app_with_failing_model().await;
        let upstream = failing
            .oneshot(post(
                "/v1/bot",
                r#"{"user_id":"u-budi","message":"!tanya jadwal"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
    }

    async fn app_with_failing_model() -> Router {
        app(ScriptedModel::failing()).await
    }

    #[tokio::test]
    async fn test_stream_emits_deltas_then_done() {
        let app = app(answering()).await;
        let response = app
            .oneshot(post(
                "/v1/chat/stream",
                r#"{"conversation_id":"c2","user_id":"u-ana","messages":[{"role":"user","content":"Halo"}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert_eq!(body.matches("event: delta").count(), 2);
        assert_eq!(body.matches("event: done").count(), 1);
        assert!(!body.contains("event: error"));
        assert!(body.contains(r#"{"text":"Halo "}"#));
    }

    #[tokio::test]
    async fn test_unknown_conversations_are_not_found() {
        let app = app(answering()).await;

        let stop = app.clone().oneshot(post("/v1/chat/nope/stop", "")).await.unwrap();
        assert_eq!(stop.status(), StatusCode::NOT_FOUND);

        let delete = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/conversations/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_retrieve_returns_ranked_passages() {
        let app = app_with_index(
            answering(),
            vec![
                IndexMatch {
                    text: "Parkir motor ada di gedung B.".into(),
                    score: 0.32,
                },
                IndexMatch {
                    text: "Tugas akhir bernilai 6 SKS.".into(),
                    score: 0.91,
                },
            ],
        )
        .await;

        let response = app
            .clone()
            .oneshot(post("/v1/retrieve", r#"{"query":"Apa itu TA?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["text"], "Tugas akhir bernilai 6 SKS.");
        let score = results[0]["relevance_score"].as_f64().unwrap();
        assert!((score - 0.91).abs() < 1e-4);

        let blank = app
            .oneshot(post("/v1/retrieve", r#"{"query":"   "}"#))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reminder_returns_text() {
        let app = app(ScriptedModel::replying("Kelas dimulai 15 menit lagi.")).await;
        let response = app
            .oneshot(post(
                "/v1/reminder",
                r#"{"class":{"course":"Jaringan Komputer","day":"rabu","start_time":"13:00:00","end_time":"14:40:00","room":"D-301","instructor":"Ir. Joko"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Kelas dimulai 15 menit lagi."));
    }
}
