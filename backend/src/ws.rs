//! Text-frame protocol over `/ws`.
//!
//! Requests are `EXECUTE:{json}` and `VALIDATE:{json}`. Replies are
//! `RENDER_UPDATE:{json}`, `VALIDATION_UPDATE:{json}` or `ERROR_UPDATE:{json}`.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use cascade_core::CascadeError;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::validation::{self, ExecuteRequest, ValidateRequest};
use crate::AppState;

#[derive(Debug)]
pub enum Command {
    Execute(ExecuteRequest),
    Validate(ValidateRequest),
}

pub fn parse_command(text: &str) -> Result<Command, String> {
    if let Some(body) = text.strip_prefix("EXECUTE:") {
        serde_json::from_str(body)
            .map(Command::Execute)
            .map_err(|e| format!("malformed EXECUTE payload: {}", e))
    } else if let Some(body) = text.strip_prefix("VALIDATE:") {
        serde_json::from_str(body)
            .map(Command::Validate)
            .map_err(|e| format!("malformed VALIDATE payload: {}", e))
    } else {
        let head: String = text.chars().take(32).collect();
        Err(format!("unknown command: {}", head))
    }
}

/// Format an error as a frame for the frontend.
fn format_error(code: &str, message: &str, severity: &str) -> String {
    format!(
        "ERROR_UPDATE:{}",
        json!({
            "code": code,
            "message": message,
            "severity": severity
        })
    )
}

fn format_failure(err: &CascadeError) -> String {
    let body = ApiError(err.clone()).body();
    format!(
        "ERROR_UPDATE:{}",
        json!({
            "code": body["error"],
            "message": body["message"],
            "severity": "error",
            "logs": err.logs(),
        })
    )
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");

    while let Some(msg) = socket.recv().await {
        let Ok(msg) = msg else {
            return;
        };
        let Message::Text(text) = msg else {
            continue;
        };

        let reply = match parse_command(&text) {
            Ok(command) => run(&state, command).await,
            Err(e) => {
                warn!("{}", e);
                format_error("BAD_COMMAND", &e, "warning")
            }
        };

        if socket.send(Message::Text(reply)).await.is_err() {
            return;
        }
    }
    info!("Client disconnected");
}

async fn run(state: &AppState, command: Command) -> String {
    match command {
        Command::Execute(req) => {
            if let Err(e) = validation::require_code(&req.code) {
                return format_failure(&e);
            }
            match state
                .service
                .execute_script(&req.code, req.gui_state, req.mesh_resolution)
                .await
            {
                Ok(out) => {
                    let json = serde_json::to_string(&out).unwrap_or_else(|_| "{}".into());
                    info!("Sent RENDER_UPDATE with {} vertices", out.mesh.vertex_count());
                    format!("RENDER_UPDATE:{}", json)
                }
                Err(e) => {
                    warn!("Execution failed: {}", e);
                    format_failure(&e)
                }
            }
        }
        Command::Validate(req) => {
            let report = state.service.validate_script(&req.code);
            let json = serde_json::to_string(&report).unwrap_or_else(|_| "{}".into());
            format!("VALIDATION_UPDATE:{}", json)
        }
    }
}
