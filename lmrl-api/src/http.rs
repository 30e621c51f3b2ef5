//! HTTP surface of a [`Protocol`].
//!
//! - `POST /generate` `{"prompt": string}` -> `{"generated_text": string}`
//! - `POST /train` `{"reward": number}` -> `{"status": "training_step_complete", "loss": number}`
//!
//! Failures answer `{"error": string}` with a 4xx or 5xx status.

use crate::{error::ProtocolError, session::Protocol};
use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const TRAINING_STEP_COMPLETE: &str = "training_step_complete";

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub generated_text: String,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub reward: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    pub loss: f32,
}

/// Shared handle to the protocol. Every operation holds the lock for its whole duration, so
/// generate and train never interleave. A panic inside an operation fails that request only.
pub struct AppState<S: Protocol> {
    session: Arc<Mutex<S>>,
}

impl<S: Protocol> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: Protocol> AppState<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Runs `operation` on the blocking pool with exclusive access to the session.
    pub async fn run<F, R>(&self, operation: F) -> Result<R, ProtocolError>
    where
        F: FnOnce(&mut S) -> Result<R, ProtocolError> + Send + 'static,
        R: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = match session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    // the panicking request may have left a half-built rollout behind
                    tracing::warn!("recovering session after a panicked request");
                    let mut guard = poisoned.into_inner();
                    guard.reset();
                    session.clear_poison();
                    guard
                }
            };
            operation(&mut *guard)
        })
        .await
        .map_err(|err| ProtocolError::Internal(anyhow!("request task failed: {err}")))?
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ProtocolError> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| ProtocolError::InvalidBody(rejection.body_text()))
}

async fn generate<S: Protocol>(
    State(state): State<AppState<S>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ProtocolError> {
    let prompt = body(payload)?
        .prompt
        .ok_or(ProtocolError::MissingField("prompt"))?;
    let generated_text = state.run(move |session| session.generate(&prompt)).await?;
    Ok(Json(GenerateResponse { generated_text }))
}

async fn train<S: Protocol>(
    State(state): State<AppState<S>>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, ProtocolError> {
    let reward = body(payload)?
        .reward
        .ok_or(ProtocolError::MissingField("reward"))?;
    let reward = reward as f32;
    if !reward.is_finite() {
        return Err(ProtocolError::InvalidBody(
            "reward does not fit in a 32-bit float".to_string(),
        ));
    }
    let loss = state.run(move |session| session.train(reward)).await?;
    Ok(Json(TrainResponse {
        status: TRAINING_STEP_COMPLETE.to_string(),
        loss,
    }))
}

pub fn router<S: Protocol>(state: AppState<S>) -> Router {
    Router::new()
        .route("/generate", post(generate::<S>))
        .route("/train", post(train::<S>))
        .with_state(state)
}
