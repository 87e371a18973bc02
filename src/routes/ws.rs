//! WebSocket upgrade + message loop. Each connection owns one step controller.
//!
//! Messages are handled one at a time on the blocking pool. If one runs past
//! the evaluation bound the learner gets an `Error` evaluation at once, and
//! further messages are refused until the slow one has finished.

use std::sync::{mpsc, Arc};
use std::time::Duration;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::controller::{ControllerError, ExerciseStepController};
use crate::logic::{evaluation_out, hint, step_out, timed_out};
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::util::trunc_for_log;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "regexlab_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state), fields(session = %Uuid::new_v4()))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "regexlab_backend", "WebSocket connected");
  let mut conn = Connection::new(state);
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let replies = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => conn.handle(incoming).await,
          Err(e) => {
            debug!(target: "regexlab_backend", payload = %trunc_for_log(&txt, 120), "WS invalid message");
            vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }]
          }
        };

        for reply in replies {
          let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
          });
          if let Err(e) = socket.send(Message::Text(out)).await {
            error!(target: "regexlab_backend", error = %e, "WS send error");
            return;
          }
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "regexlab_backend", "WebSocket disconnected");
}

type Handled = (Session, Vec<ServerWsMessage>);

/// Runs each message of one connection against its `Session`, bounded by
/// `AppState::eval_timeout`.
struct Connection {
  state: Arc<AppState>,
  session: Option<Session>,
  /// A message that outlived the bound and still owns the session.
  pending: Option<JoinHandle<Handled>>,
}

impl Connection {
  fn new(state: Arc<AppState>) -> Self {
    Self { session: Some(Session::new(Arc::clone(&state))), state, pending: None }
  }

  async fn handle(&mut self, msg: ClientWsMessage) -> Vec<ServerWsMessage> {
    if matches!(msg, ClientWsMessage::Ping) {
      return vec![ServerWsMessage::Pong];
    }

    let mut replies = Vec::new();
    if let Some(task) = self.pending.take() {
      if !task.is_finished() {
        self.pending = Some(task);
        return vec![ServerWsMessage::Error { message: "still evaluating the previous pattern".into() }];
      }
      // Late results of the slow message go out first.
      replies.extend(self.restore(task.await));
    }

    let mut session = self.session.take().unwrap_or_else(|| Session::new(Arc::clone(&self.state)));
    let limit = self.state.eval_timeout;
    let timeout_reply = session.timeout_reply(&msg, limit);
    let mut task = tokio::task::spawn_blocking(move || {
      let out = session.handle(msg);
      (session, out)
    });
    match tokio::time::timeout(limit, &mut task).await {
      Ok(joined) => replies.extend(self.restore(joined)),
      Err(_) => {
        warn!(target: "exercise", limit_ms = limit.as_millis() as u64, "WS evaluation timed out");
        self.pending = Some(task);
        replies.push(timeout_reply);
      }
    }
    replies
  }

  fn restore(&mut self, joined: Result<Handled, JoinError>) -> Vec<ServerWsMessage> {
    match joined {
      Ok((session, out)) => {
        self.session = Some(session);
        out
      }
      Err(e) => {
        error!(target: "regexlab_backend", error = %e, "WS evaluation worker failed; session reset");
        self.session = Some(Session::new(Arc::clone(&self.state)));
        vec![ServerWsMessage::Error { message: "evaluation failed; load the step again".into() }]
      }
    }
  }
}

/// Per-connection learner state.
struct Session {
  state: Arc<AppState>,
  controller: Option<ExerciseStepController>,
  status_tx: mpsc::Sender<bool>,
  status_rx: mpsc::Receiver<bool>,
}

impl Session {
  fn new(state: Arc<AppState>) -> Self {
    let (status_tx, status_rx) = mpsc::channel();
    Self { state, controller: None, status_tx, status_rx }
  }

  fn handle(&mut self, msg: ClientWsMessage) -> Vec<ServerWsMessage> {
    let mut replies = match self.dispatch(msg) {
      Ok(replies) => replies,
      Err(e) => vec![ServerWsMessage::Error { message: e.to_string() }],
    };
    replies.extend(self.status_rx.try_iter().map(|success| ServerWsMessage::StatusChanged { success }));
    replies
  }

  /// What the learner gets if `msg` runs past `limit`.
  fn timeout_reply(&self, msg: &ClientWsMessage, limit: Duration) -> ServerWsMessage {
    let content = self.controller.as_ref().and_then(|c| c.definition().ok()).map(|d| d.content.as_str());
    match (msg, content) {
      (ClientWsMessage::SetPattern { .. } | ClientWsMessage::SetFlags { .. }, Some(content)) => {
        ServerWsMessage::Evaluation(timed_out(&self.state.highlighter, content, true, limit))
      }
      _ => ServerWsMessage::Error { message: format!("request took longer than {} ms", limit.as_millis()) },
    }
  }

  fn dispatch(&mut self, msg: ClientWsMessage) -> Result<Vec<ServerWsMessage>, SessionError> {
    match msg {
      ClientWsMessage::Ping => Ok(vec![ServerWsMessage::Pong]),

      ClientWsMessage::LoadStep { lesson_id, step } => {
        let same_lesson = self.controller.as_ref().is_some_and(|c| c.lesson().id == lesson_id);
        if !same_lesson {
          let tx = self.status_tx.clone();
          let controller = self
            .state
            .controller(&lesson_id)
            .ok_or_else(|| SessionError::UnknownLesson(lesson_id.clone()))?
            .on_status_changed(move |success| { let _ = tx.send(success); });
          self.controller = Some(controller);
        }
        let c = self.controller()?;
        c.load_step(step)?;
        info!(target: "exercise", lesson = %lesson_id, step, status = ?c.attempt().status, "WS step loaded");
        Ok(vec![ServerWsMessage::Step(step_out(c)?), ServerWsMessage::Evaluation(evaluation_out(c)?)])
      }

      ClientWsMessage::SetPattern { pattern } => {
        let c = self.controller()?;
        c.set_pattern(&pattern)?;
        Ok(vec![ServerWsMessage::Evaluation(evaluation_out(c)?)])
      }

      ClientWsMessage::SetFlags { flags } => {
        let c = self.controller()?;
        c.set_flags(&flags)?;
        Ok(vec![ServerWsMessage::Evaluation(evaluation_out(c)?)])
      }

      ClientWsMessage::Skip => {
        let c = self.controller()?;
        if !c.skip()? {
          return Err(SessionError::SkipUnavailable);
        }
        Ok(vec![ServerWsMessage::Evaluation(evaluation_out(c)?)])
      }

      ClientWsMessage::Hint => Ok(vec![hint(self.controller()?)?]),

      ClientWsMessage::NextStep => {
        let c = self.controller()?;
        c.next_step()?;
        Ok(vec![ServerWsMessage::Step(step_out(c)?), ServerWsMessage::Evaluation(evaluation_out(c)?)])
      }
    }
  }

  fn controller(&mut self) -> Result<&mut ExerciseStepController, SessionError> {
    self.controller.as_mut().ok_or(SessionError::Controller(ControllerError::NoStepLoaded))
  }
}

#[derive(Debug, thiserror::Error)]
enum SessionError {
  #[error("unknown lesson: {0}")]
  UnknownLesson(String),
  #[error("skip is only available on steps graded by exact text")]
  SkipUnavailable,
  #[error(transparent)]
  Controller(#[from] ControllerError),
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use indoc::formatdoc;

  use super::*;
  use crate::config::{parse_config, AppConfig};
  use crate::domain::AttemptStatus;
  use crate::progress::{MemoryProgressStore, ProgressStore};

  fn session() -> (Session, Arc<MemoryProgressStore>) {
    let store = Arc::new(MemoryProgressStore::default());
    let state = AppState::from_parts(AppConfig::default(), store.clone());
    (Session::new(Arc::new(state)), store)
  }

  fn load(step: usize) -> ClientWsMessage {
    ClientWsMessage::LoadStep { lesson_id: "regex101".into(), step }
  }

  fn evaluation(replies: &[ServerWsMessage]) -> &crate::protocol::EvaluationOut {
    replies
      .iter()
      .find_map(|r| match r {
        ServerWsMessage::Evaluation(e) => Some(e),
        _ => None,
      })
      .expect("evaluation reply")
  }

  fn status_changes(replies: &[ServerWsMessage]) -> Vec<bool> {
    replies
      .iter()
      .filter_map(|r| match r {
        ServerWsMessage::StatusChanged { success } => Some(*success),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn edits_before_loading_are_rejected() {
    let (mut s, _) = session();
    let replies = s.handle(ClientWsMessage::SetPattern { pattern: "a".into() });
    assert!(matches!(&replies[..], [ServerWsMessage::Error { .. }]));
  }

  #[test]
  fn unknown_lesson() {
    let (mut s, _) = session();
    let replies = s.handle(ClientWsMessage::LoadStep { lesson_id: "nope".into(), step: 0 });
    assert!(matches!(&replies[..], [ServerWsMessage::Error { message }] if message.contains("nope")));
  }

  #[test]
  fn solving_a_step_reports_success_and_saves_progress() {
    let (mut s, store) = session();
    let replies = s.handle(load(1));
    assert!(matches!(replies[0], ServerWsMessage::Step(ref step) if step.step == 1 && step.title == "Basic matchers"));
    assert_eq!(evaluation(&replies).status, AttemptStatus::Error);

    let replies = s.handle(ClientWsMessage::SetPattern { pattern: "curious".into() });
    assert_eq!(evaluation(&replies).status, AttemptStatus::Success);
    assert_eq!(status_changes(&replies), vec![true]);
    assert_eq!(store.get("regex101").unwrap().map(|r| r.last_step), Some(2));

    let replies = s.handle(ClientWsMessage::NextStep);
    assert!(matches!(replies[0], ServerWsMessage::Step(ref step) if step.step == 2));
    assert_eq!(status_changes(&replies), vec![false]);
  }

  #[test]
  fn non_interactive_intro_succeeds_on_load() {
    let (mut s, _) = session();
    let replies = s.handle(load(0));
    assert_eq!(evaluation(&replies).status, AttemptStatus::Success);
    assert_eq!(status_changes(&replies), vec![true]);
  }

  #[test]
  fn skip_only_on_literal_steps() {
    let (mut s, _) = session();
    s.handle(load(1));
    let replies = s.handle(ClientWsMessage::Skip);
    assert!(matches!(&replies[..], [ServerWsMessage::Error { .. }]));

    let lookbehind = s.state.lesson("regex101").unwrap().steps.iter().position(|d| d.literal_fallback).unwrap();
    s.handle(load(lookbehind));
    let replies = s.handle(ClientWsMessage::Skip);
    assert_eq!(evaluation(&replies).status, AttemptStatus::Success);
  }

  #[test]
  fn hint_returns_reference_answers() {
    let (mut s, _) = session();
    s.handle(load(1));
    let replies = s.handle(ClientWsMessage::Hint);
    assert!(matches!(
      &replies[..],
      [ServerWsMessage::Hint { reference_patterns, reference_flags }]
        if reference_patterns == &vec!["curious".to_string()] && reference_flags == "g"
    ));
  }

  /// One step whose content makes `(a+)+$` backtrack for seconds.
  fn runaway_state(timeout_ms: u64) -> Arc<AppState> {
    let cfg = parse_config(&formatdoc! {r#"
      [evaluation]
      timeout_ms = {timeout_ms}

      [[lessons]]
      id = "runaway"
      title = "Runaway"

      [[lessons.steps]]
      title = "Nested quantifiers"
      content = "{content}!"
      reference_patterns = ["a+"]
    "#, content = "a".repeat(26)})
    .unwrap();
    Arc::new(AppState::from_parts(cfg, Arc::new(MemoryProgressStore::default())))
  }

  #[tokio::test]
  async fn connection_relays_session_replies() {
    let mut conn = Connection::new(runaway_state(1000));
    assert!(matches!(&conn.handle(ClientWsMessage::Ping).await[..], [ServerWsMessage::Pong]));

    conn.handle(ClientWsMessage::LoadStep { lesson_id: "runaway".into(), step: 0 }).await;
    let replies = conn.handle(ClientWsMessage::SetPattern { pattern: "a+".into() }).await;
    assert_eq!(evaluation(&replies).status, AttemptStatus::Success);
    assert_eq!(status_changes(&replies), vec![true]);
  }

  #[test]
  fn runaway_pattern_times_out_as_error() {
    // Own runtime so shutdown does not wait for the still-running worker.
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut conn = Connection::new(runaway_state(200));
    let started = Instant::now();

    rt.block_on(async {
      conn.handle(ClientWsMessage::LoadStep { lesson_id: "runaway".into(), step: 0 }).await;

      let replies = conn.handle(ClientWsMessage::SetPattern { pattern: "(a+)+$".into() }).await;
      let eval = evaluation(&replies);
      assert_eq!(eval.status, AttemptStatus::Error);
      assert!(eval.spans.is_empty());
      assert!(eval.error.as_deref().unwrap().contains("longer than 200 ms"));

      let replies = conn.handle(ClientWsMessage::SetPattern { pattern: "a+".into() }).await;
      assert!(matches!(&replies[..], [ServerWsMessage::Error { message }] if message.contains("still evaluating")));
      assert!(matches!(&conn.handle(ClientWsMessage::Ping).await[..], [ServerWsMessage::Pong]));
    });

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    rt.shutdown_background();
  }
}
