//! Servidor web Axum com HTTP e WebSocket para predição de entidades por spans

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use span_ner_core::{
    HashingEncoder, ModelFile, PipelineEvent, PredictInput, Prediction, Sentence, SpanConfig, SpanError,
    SpanPipeline, WordTokenizer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MODEL_ENV: &str = "SPAN_NER_MODEL";
const ADDR_ENV: &str = "SPAN_NER_ADDR";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Estado compartilhado da aplicação
struct AppState {
    pipeline: SpanPipeline<WordTokenizer, HashingEncoder>,
}

#[derive(Deserialize)]
struct PredictRequest {
    inputs: PredictInput,
    #[serde(default)]
    allow_overlapping: bool,
}

#[derive(Serialize)]
struct PredictResponse {
    predictions: Prediction,
    processing_ms: u64,
}

/// Mensagem WebSocket recebida do cliente
#[derive(Deserialize)]
struct WsRequest {
    sentence: Sentence,
    #[serde(default)]
    allow_overlapping: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let pipeline = SpanPipeline::from_model_file(load_model_file()?)?;
    let labels = pipeline.model().config().labels.len();
    let state = Arc::new(AppState { pipeline });

    let addr: SocketAddr = std::env::var(ADDR_ENV)
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, labels, "🚀 Servidor span-ner iniciado");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Lê o modelo de `SPAN_NER_MODEL`; sem a variável, usa o modelo de demonstração.
fn load_model_file() -> Result<ModelFile, SpanError> {
    match std::env::var(MODEL_ENV) {
        Ok(path) => {
            info!(%path, "carregando modelo");
            ModelFile::from_path(path)
        }
        Err(_) => {
            warn!("{MODEL_ENV} não definido, usando modelo de demonstração sem pesos treinados");
            Ok(demo_model_file())
        }
    }
}

fn demo_model_file() -> ModelFile {
    let mut config = SpanConfig::from_labels(&["O", "PER", "ORG", "LOC"]);
    config.hidden_size = 32;
    ModelFile {
        config,
        classifier: None,
    }
}

fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Erro do pipeline como resposta JSON.
fn error_response(err: &SpanError) -> Response {
    let status = match err {
        SpanError::Tokenizer(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

/// Predição via HTTP POST (sem streaming)
async fn predict_handler(State(state): State<Arc<AppState>>, Json(req): Json<PredictRequest>) -> Response {
    let start = Instant::now();

    // O pipeline é síncrono: roda fora do runtime
    let result = tokio::task::spawn_blocking(move || {
        state.pipeline.predict_par(&req.inputs, req.allow_overlapping)
    })
    .await;

    match result {
        Ok(Ok(predictions)) => Json(PredictResponse {
            predictions,
            processing_ms: start.elapsed().as_millis() as u64,
        })
        .into_response(),
        Ok(Err(err)) => {
            warn!(error = %err, "falha na predição");
            error_response(&err)
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Recebe uma sentença por mensagem e devolve os eventos do pipeline, um por mensagem.
///
/// Aceita `{"sentence": ..., "allow_overlapping": ...}` ou texto puro.
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let req = serde_json::from_str::<WsRequest>(&text).unwrap_or_else(|_| WsRequest {
                    sentence: Sentence::Text(text.trim().to_string()),
                    allow_overlapping: false,
                });
                if req.sentence.is_empty() {
                    continue;
                }

                let (tx, rx) = std::sync::mpsc::channel::<PipelineEvent>();
                let state = Arc::clone(&state);
                let handle = tokio::task::spawn_blocking(move || {
                    state
                        .pipeline
                        .predict_one_streaming(&req.sentence, req.allow_overlapping, tx);
                });
                if let Err(err) = handle.await {
                    warn!(error = %err, "pipeline interrompido");
                }

                // O pipeline já terminou: todos os eventos estão no canal
                let events: Vec<PipelineEvent> = rx.try_iter().collect();
                for event in &events {
                    if let Ok(json) = serde_json::to_string(event) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            return; // cliente desconectou
                        }
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let pipeline = SpanPipeline::from_model_file(demo_model_file()).unwrap();
        app(Arc::new(AppState { pipeline }))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_predict(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_predict_single_text() {
        let response = test_app()
            .oneshot(post_predict(serde_json::json!({"inputs": "Lula visitou Recife"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        // modelo de demonstração sem pesos: nenhuma entidade
        assert_eq!(json["predictions"], serde_json::json!([]));
        assert!(json["processing_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_predict_batch_keeps_shape() {
        let body = serde_json::json!({
            "inputs": ["Lula visitou Recife", "Tim Cook"],
            "allow_overlapping": true
        });
        let response = test_app().oneshot(post_predict(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["predictions"], serde_json::json!([[], []]));
    }

    #[tokio::test]
    async fn test_predict_rejects_malformed_body() {
        let response = test_app()
            .oneshot(post_predict(serde_json::json!({"inputs": 42})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_error_status_mapping() {
        let response = error_response(&SpanError::tokenizer("frase longa"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = error_response(&SpanError::shape("L < 2M"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
