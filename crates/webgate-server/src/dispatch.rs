//! Per-frame dispatch pipeline: decode, authenticate, admit, sanitize,
//! validate, route.

use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};

use webgate_browser::SessionError;
use webgate_protocol::{
    Action, ClosedPayload, CommandFrame, ErrorBody, ErrorCode, Reply, ReplyPayload,
    SessionPayload,
};
use webgate_security::{RateLimitDecision, SanitizeError};

use crate::state::AppState;

/// A command handed to a session worker; its reply arrives later through
/// the per-session forwarder.
pub struct PendingReply {
    pub request_id: String,
    pub started: Instant,
    pub rx: oneshot::Receiver<Result<ReplyPayload, ErrorBody>>,
}

/// What the connection loop should do with a processed frame.
pub enum FrameOutcome {
    /// Send this reply and carry on.
    Reply(Reply),
    /// The command is queued on a session worker.
    Enqueued {
        session_id: String,
        pending: PendingReply,
    },
    /// Send the reply, then close the connection after a short delay.
    AuthFailed(Reply),
    /// Send the reply, then close: too many malformed frames in a row.
    MalformedLimit(Reply),
}

/// Process one text frame from a client.
pub async fn handle_frame(
    state: &AppState,
    client_id: &str,
    text: &str,
    authed: &mut bool,
    consecutive_malformed: &mut u32,
) -> FrameOutcome {
    let started = Instant::now();

    // Decode. A malformed frame is replied to, not fatal, until a run of
    // them crosses the limit.
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            *consecutive_malformed += 1;
            let reply = Reply::error(
                String::new(),
                ErrorCode::InvalidCommand,
                format!("Invalid JSON frame: {}", e),
            );
            if *consecutive_malformed >= state.config.server.malformed_frame_limit {
                warn!("Closing connection from {}: malformed frame limit", client_id);
                return FrameOutcome::MalformedLimit(reply);
            }
            return FrameOutcome::Reply(reply);
        }
    };
    let request_id = value
        .get("id")
        .and_then(|id| id.as_str())
        .unwrap_or_default()
        .to_string();

    // Authentication gate: the first frame must present the key.
    if state.auth.required() && !*authed {
        let provided = value.get("api_key").and_then(|k| k.as_str());
        if !state.auth.verify(provided) {
            warn!("Authentication failed for {}", client_id);
            return FrameOutcome::AuthFailed(Reply::error(
                request_id,
                ErrorCode::AuthFailed,
                "Authentication failed",
            ));
        }
        *authed = true;
        info!("Client {} authenticated", client_id);
    }

    // Admission control.
    match state.limiter.check(client_id) {
        RateLimitDecision::Allowed => {}
        RateLimitDecision::Limited | RateLimitDecision::Blocked => {
            return FrameOutcome::Reply(Reply::error(
                request_id,
                ErrorCode::RateLimited,
                "Rate limit exceeded",
            ));
        }
    }

    // Shape validation into a typed command.
    let mut frame: CommandFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(e) => {
            *consecutive_malformed += 1;
            let reply = Reply::error(
                request_id,
                ErrorCode::InvalidCommand,
                format!("Invalid command: {}", e),
            );
            if *consecutive_malformed >= state.config.server.malformed_frame_limit {
                return FrameOutcome::MalformedLimit(reply);
            }
            return FrameOutcome::Reply(reply);
        }
    };
    *consecutive_malformed = 0;

    // Input hygiene before field validation.
    if let Err(e) = sanitize_action(state, &mut frame.action) {
        return FrameOutcome::Reply(Reply::failure(
            frame.id,
            ErrorBody::new(ErrorCode::UnsafeInput, "Unsafe input rejected").with_detail(
                "category",
                serde_json::to_value(e.category()).unwrap_or_default(),
            ),
            started.elapsed().as_millis() as u64,
        ));
    }

    if let Err(e) = frame.validate(state.config.browser.max_command_timeout_ms) {
        return FrameOutcome::Reply(Reply::failure(
            frame.id,
            ErrorBody::new(ErrorCode::InvalidParams, e.to_string())
                .with_detail("field", e.field()),
            started.elapsed().as_millis() as u64,
        ));
    }

    route(state, client_id, frame, started).await
}

/// Route a validated frame to the session manager.
async fn route(
    state: &AppState,
    client_id: &str,
    mut frame: CommandFrame,
    started: Instant,
) -> FrameOutcome {
    match frame.action {
        Action::CreateSession => match state.sessions.create(client_id).await {
            Ok(session_id) => FrameOutcome::Reply(Reply::success(
                frame.id,
                ReplyPayload::Session(SessionPayload { session_id }),
                started.elapsed().as_millis() as u64,
            )),
            Err(e) => FrameOutcome::Reply(session_failure(frame.id, e, started)),
        },

        Action::CloseSession => {
            if frame.session_id.is_empty() {
                return FrameOutcome::Reply(Reply::error(
                    frame.id,
                    ErrorCode::InvalidParams,
                    "session_id is required to close a session",
                ));
            }
            match state.sessions.close(&frame.session_id, client_id).await {
                Ok(()) => FrameOutcome::Reply(Reply::success(
                    frame.id,
                    ReplyPayload::Closed(ClosedPayload {
                        session_id: frame.session_id,
                        closed: true,
                    }),
                    started.elapsed().as_millis() as u64,
                )),
                Err(e) => FrameOutcome::Reply(session_failure(frame.id, e, started)),
            }
        }

        _ => {
            let session_id = match state
                .sessions
                .resolve_or_create(&frame.session_id, client_id)
                .await
            {
                Ok(session_id) => session_id,
                Err(e) => return FrameOutcome::Reply(session_failure(frame.id, e, started)),
            };
            frame.session_id = session_id.clone();

            let request_id = frame.id.clone();
            match state.sessions.submit(&session_id, client_id, frame).await {
                Ok(rx) => FrameOutcome::Enqueued {
                    session_id,
                    pending: PendingReply {
                        request_id,
                        started,
                        rx,
                    },
                },
                Err(e) => FrameOutcome::Reply(session_failure(request_id, e, started)),
            }
        }
    }
}

/// Map session-layer failures onto wire error codes.
fn session_failure(request_id: String, error: SessionError, started: Instant) -> Reply {
    let body = match &error {
        SessionError::NotFound(id) => ErrorBody::new(
            ErrorCode::SessionNotFound,
            format!("Session {} not found", id),
        ),
        SessionError::NotOwned(id) => ErrorBody::new(
            ErrorCode::SessionNotOwned,
            format!("Session {} is not owned by this client", id),
        ),
        SessionError::Exhausted => ErrorBody::new(
            ErrorCode::ResourceExhausted,
            "Session limit reached; try again later",
        ),
        SessionError::Closing => ErrorBody::new(
            ErrorCode::SessionNotFound,
            "Session is shutting down",
        ),
        SessionError::Pool(_) | SessionError::Browser(_) => {
            warn!("Session operation failed: {}", error);
            ErrorBody::new(ErrorCode::Internal, "Browser backend failure")
        }
    };
    Reply::failure(request_id, body, started.elapsed().as_millis() as u64)
}

/// Sanitize every string field that reaches a page, normalizing in place.
fn sanitize_action(state: &AppState, action: &mut Action) -> Result<(), SanitizeError> {
    let sanitizer = &state.sanitizer;
    match action {
        Action::Navigate { url, .. } => {
            *url = sanitizer.sanitize_url(url)?;
        }
        Action::Click { selector, .. } => {
            *selector = sanitizer.sanitize_selector(selector)?;
        }
        Action::Fill { selector, text, .. } => {
            *selector = sanitizer.sanitize_selector(selector)?;
            *text = sanitizer.sanitize_text(text)?;
        }
        Action::Extract { selector, .. } => {
            *selector = sanitizer.sanitize_selector(selector)?;
        }
        Action::Wait {
            selector,
            custom_js,
            ..
        } => {
            if let Some(selector) = selector {
                *selector = sanitizer.sanitize_selector(selector)?;
            }
            if let Some(script) = custom_js {
                *script = sanitizer.sanitize_script(script)?;
            }
        }
        Action::CreateSession | Action::CloseSession => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
