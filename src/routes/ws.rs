//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::error::SessionError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage, SessionOut, TurnOut};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "socratic_tutor", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "socratic_tutor", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "socratic_tutor", bytes = txt.len(), "WS message received");
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { code: "BAD_REQUEST".into(), message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "INTERNAL", "message": format!("Serialization error: {}", e) })
            .to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "socratic_tutor", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "socratic_tutor", "WebSocket disconnected");
}

fn ws_error(e: SessionError) -> ServerWsMessage {
  ServerWsMessage::Error { code: e.code().to_string(), message: e.to_string() }
}

#[instrument(level = "info", skip(msg, state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartProblem { problem, student_id, profile } => {
      if problem.trim().is_empty() {
        return ServerWsMessage::Error { code: "BAD_REQUEST".into(), message: "problem must not be empty".into() };
      }
      match start_session(state, &problem, student_id, profile).await {
        Ok(started) => {
          info!(target: "session", session_id = %started.session_id, "WS session started");
          ServerWsMessage::SessionStarted { session: SessionOut::from(started) }
        }
        Err(e) => ws_error(e),
      }
    }

    ClientWsMessage::StudentMessage { session_id, text } => match student_message(state, &session_id, &text).await {
      Ok(outcome) => ServerWsMessage::TutorReply { turn: TurnOut::from(outcome) },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Analytics { session_id } => match session_analytics(state, &session_id).await {
      Ok(analytics) => ServerWsMessage::Analytics { analytics },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::Conversation { session_id } => match conversation(state, &session_id).await {
      Ok(turns) => ServerWsMessage::Conversation { turns },
      Err(e) => ws_error(e),
    },

    ClientWsMessage::EndSession { session_id } => match end_session(state, &session_id).await {
      Ok(analytics) => ServerWsMessage::SessionEnded { analytics },
      Err(e) => ws_error(e),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::config::{EngineSettings, Prompts};
  use crate::engine::EngineContext;
  use crate::lexicon::ConceptLexicon;
  use crate::openai::Offline;
  use crate::profile::InMemoryProfileStore;
  use crate::store::InMemorySessionStore;

  fn state() -> AppState {
    AppState::with_parts(
      EngineContext::new(ConceptLexicon::builtin(), Prompts::default(), EngineSettings::default()),
      Arc::new(Offline),
      Arc::new(InMemorySessionStore::default()),
      Arc::new(InMemoryProfileStore::default()),
    )
  }

  #[tokio::test]
  async fn dispatches_session_messages() {
    let state = state();
    let started = handle_client_ws(
      ClientWsMessage::StartProblem { problem: "2x + 5 = 13".into(), student_id: None, profile: None },
      &state,
    )
    .await;
    let session_id = match started {
      ServerWsMessage::SessionStarted { session } => session.session_id,
      other => panic!("unexpected {other:?}"),
    };

    let reply = handle_client_ws(
      ClientWsMessage::StudentMessage { session_id: session_id.clone(), text: "I don't know".into() },
      &state,
    )
    .await;
    assert!(matches!(reply, ServerWsMessage::TutorReply { ref turn } if turn.struggling_counter == 1));

    let ended = handle_client_ws(ClientWsMessage::EndSession { session_id: session_id.clone() }, &state).await;
    assert!(matches!(ended, ServerWsMessage::SessionEnded { .. }));
  }

  #[tokio::test]
  async fn unknown_session_maps_to_error_code() {
    let state = state();
    let reply = handle_client_ws(ClientWsMessage::Analytics { session_id: "missing".into() }, &state).await;
    match reply {
      ServerWsMessage::Error { code, .. } => assert_eq!(code, "UNKNOWN_SESSION"),
      other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(handle_client_ws(ClientWsMessage::Ping, &state).await, ServerWsMessage::Pong));
  }
}
