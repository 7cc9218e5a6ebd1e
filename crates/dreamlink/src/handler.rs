//! Per-connection handler for the binary-TCP match service.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The state machine is small and strict:
//!
//! ```text
//! AwaitingLogin ──login ok──→ LoggedIn ──logout/close──→ Closed
//! ```
//!
//! On connect the server immediately emits a fresh challenge. The only
//! acceptable first message is a login whose token resolves to a live
//! match session and whose response proves knowledge of the login-service
//! challenge. Every later message must present the session key minted at
//! login. Decode failures and unexpected kinds are fatal; an idle timeout
//! closes silently.

use std::sync::Arc;

use dreamlink_protocol::{EscapedForm, MatchReply, MatchRequest};
use dreamlink_session::{
    generate_challenge, login_proof, ProfileChanges, RecordStore, SERVICE_MATCH,
};
use dreamlink_transport::{Connection, FrameConnection};
use rand::Rng;

use crate::server::ServerState;

/// Error code for malformed frames and unexpected message kinds.
const ERR_PROTOCOL: u16 = 0;
/// Error code for a failed login (bad token or bad proof).
const ERR_LOGIN_FAILED: u16 = 256;
/// Error code for a missing or mismatched session key.
const ERR_BAD_SESSION_KEY: u16 = 260;
/// Error code for internal failures surfaced to the client.
const ERR_INTERNAL: u16 = 100;

/// What the connection knows after a successful login.
struct LoginState {
    user_id: String,
    branch: String,
    profile_id: u32,
    /// Cleared by logout; `None` afterwards rejects every keyed message.
    session_key: Option<u32>,
}

/// Volatile per-connection state. Owned exclusively by the connection's
/// task; lives exactly as long as the socket.
struct MatchConnection {
    server_challenge: String,
    login: Option<LoginState>,
}

/// Handles a single match connection from accept to close.
///
/// This is the outermost boundary: unexpected internal failures are
/// logged and answered with one fatal protocol error before the close,
/// never a silent drop.
pub(crate) async fn handle_connection<S: RecordStore>(
    conn: FrameConnection,
    state: Arc<ServerState<S>>,
) {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling match connection");

    if let Err(e) = drive_connection(&conn, &state).await {
        tracing::warn!(%conn_id, error = %e, "connection failed");
        send_error(&conn, ERR_INTERNAL, "internal error", true).await;
    }

    let _ = conn.close().await;
    tracing::debug!(%conn_id, "match connection closed");
}

async fn drive_connection<S: RecordStore>(
    conn: &FrameConnection,
    state: &Arc<ServerState<S>>,
) -> Result<(), crate::DreamlinkError> {
    let mut mc = MatchConnection {
        server_challenge: generate_challenge(),
        login: None,
    };

    // The greeting goes out before the client says anything.
    let greeting = MatchReply::Challenge {
        server_challenge: mc.server_challenge.clone(),
    };
    conn.send(&EscapedForm::encode(&greeting.to_fields())).await?;

    loop {
        let frame = match tokio::time::timeout(
            state.config.read_timeout,
            conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::debug!(id = %conn.id(), "connection closed cleanly");
                return Ok(());
            }
            Ok(Err(e)) => {
                if matches!(e, dreamlink_transport::TransportError::FrameTooLarge { .. }) {
                    send_error(conn, ERR_PROTOCOL, "frame too large", true).await;
                } else {
                    tracing::debug!(id = %conn.id(), error = %e, "recv error");
                }
                return Ok(());
            }
            Err(_) => {
                // Idle timeout: silent, non-fatal closure.
                tracing::debug!(id = %conn.id(), "connection idle, closing");
                return Ok(());
            }
        };

        let request = match EscapedForm::decode(&frame)
            .and_then(|fields| MatchRequest::from_fields(&fields))
        {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(id = %conn.id(), error = %e, "bad frame");
                send_error(conn, ERR_PROTOCOL, "malformed message", true).await;
                return Ok(());
            }
        };

        if mc.login.is_none() {
            // Awaiting login: the only acceptable message is a login.
            let MatchRequest::Login {
                token,
                client_challenge,
                response,
            } = request
            else {
                tracing::debug!(
                    id = %conn.id(),
                    kind = request.kind(),
                    "message before login"
                );
                send_error(conn, ERR_PROTOCOL, "login required", true).await;
                return Ok(());
            };

            match process_login(
                state,
                &mc.server_challenge,
                &token,
                &client_challenge,
                &response,
            )
            .await?
            {
                Ok((login, reply)) => {
                    mc.login = Some(login);
                    conn.send(&EscapedForm::encode(&reply.to_fields())).await?;
                }
                Err(message) => {
                    send_error(conn, ERR_LOGIN_FAILED, message, true).await;
                    return Ok(());
                }
            }
            continue;
        }

        // A second login on a live connection is a protocol violation.
        if matches!(request, MatchRequest::Login { .. }) {
            send_error(conn, ERR_PROTOCOL, "already logged in", true).await;
            return Ok(());
        }

        let Some(login) = mc.login.as_mut() else {
            continue;
        };
        if !key_matches(login, &request) {
            // Rejected and otherwise ignored: no state change.
            send_error(conn, ERR_BAD_SESSION_KEY, "invalid session key", false).await;
            continue;
        }
        let reply = process_logged_in(state, login, request).await?;
        conn.send(&EscapedForm::encode(&reply.to_fields())).await?;
    }
}

/// Verifies the challenge-response proof and binds the connection.
///
/// Returns the application-level outcome: `Err(message)` is a login
/// rejection, not an internal failure.
async fn process_login<S: RecordStore>(
    state: &Arc<ServerState<S>>,
    server_challenge: &str,
    token: &str,
    client_challenge: &str,
    response: &str,
) -> Result<Result<(LoginState, MatchReply), &'static str>, crate::DreamlinkError> {
    let Some(session) = state
        .sessions
        .lock()
        .await
        .get_valid(token, SERVICE_MATCH)
    else {
        return Ok(Err("unknown or expired token"));
    };

    let expected = login_proof(
        &session.challenge_hash,
        &session.user_id,
        client_challenge,
        server_challenge,
    );
    if response != expected {
        tracing::debug!(user_id = %session.user_id, "login proof mismatch");
        return Ok(Err("bad response"));
    }

    // Proof verified: the token is spent from here on.
    state.sessions.lock().await.consume(token);

    let profile = state
        .users
        .lock()
        .await
        .ensure_profile(&session.user_id, &session.branch)
        .await?;

    // The answering proof swaps the challenge order.
    let proof = login_proof(
        &session.challenge_hash,
        &session.user_id,
        server_challenge,
        client_challenge,
    );
    let session_key: u32 = rand::rng().random_range(1..0x8000_0000u32);

    tracing::info!(
        user_id = %session.user_id,
        branch = %session.branch,
        profile_id = profile.id,
        "match login complete"
    );

    let reply = MatchReply::LoginOk {
        user_id: session.user_id.clone(),
        profile_id: profile.id,
        proof,
        session_key,
    };
    Ok(Ok((
        LoginState {
            user_id: session.user_id,
            branch: session.branch,
            profile_id: profile.id,
            session_key: Some(session_key),
        },
        reply,
    )))
}

/// Whether the request's session key matches the connection's.
fn key_matches(login: &LoginState, request: &MatchRequest) -> bool {
    let presented = match request {
        MatchRequest::ProfileGet { session_key }
        | MatchRequest::ProfileUpdate { session_key, .. }
        | MatchRequest::KeepAlive { session_key }
        | MatchRequest::Status { session_key }
        | MatchRequest::Logout { session_key } => *session_key,
        MatchRequest::Login { .. } => return true,
    };
    login.session_key == Some(presented)
}

/// Serves one logged-in request. The session key was already checked.
async fn process_logged_in<S: RecordStore>(
    state: &Arc<ServerState<S>>,
    login: &mut LoginState,
    request: MatchRequest,
) -> Result<MatchReply, crate::DreamlinkError> {
    match request {
        MatchRequest::ProfileGet { .. } => {
            let user = state.users.lock().await.get(&login.user_id).await;
            let profile = user
                .as_ref()
                .and_then(|u| u.profiles.get(&login.branch).cloned());
            match profile {
                Some(profile) => Ok(MatchReply::ProfileInfo {
                    profile_id: profile.id,
                    first_name: profile.first_name.unwrap_or_default(),
                    last_name: profile.last_name.unwrap_or_default(),
                    display_name: profile.display_name.unwrap_or_default(),
                    postal_code: profile.postal_code.unwrap_or_default(),
                }),
                None => Ok(MatchReply::Error {
                    code: ERR_INTERNAL,
                    message: "profile missing".into(),
                    fatal: false,
                }),
            }
        }

        MatchRequest::ProfileUpdate {
            first_name,
            last_name,
            display_name,
            postal_code,
            ..
        } => {
            let changes = ProfileChanges {
                first_name,
                last_name,
                display_name,
                postal_code,
            };
            let result = state
                .users
                .lock()
                .await
                .update_profile(&login.user_id, &login.branch, &changes)
                .await;
            match result {
                Ok(_) => Ok(MatchReply::ProfileUpdated),
                Err(e) => {
                    // Reported failed so the client retries; nothing was
                    // committed.
                    tracing::warn!(user_id = %login.user_id, error = %e, "profile update failed");
                    Ok(MatchReply::Error {
                        code: ERR_INTERNAL,
                        message: "update failed".into(),
                        fatal: false,
                    })
                }
            }
        }

        MatchRequest::KeepAlive { .. } => Ok(MatchReply::KeepAliveAck {
            user_id: login.user_id.clone(),
        }),

        MatchRequest::Status { .. } => Ok(MatchReply::StatusAck {
            user_id: login.user_id.clone(),
        }),

        MatchRequest::Logout { .. } => {
            tracing::info!(user_id = %login.user_id, profile_id = login.profile_id, "logout");
            login.session_key = None;
            Ok(MatchReply::LogoutAck)
        }

        MatchRequest::Login { .. } => unreachable!("handled by the caller"),
    }
}

/// Sends an error reply, best effort.
async fn send_error(conn: &FrameConnection, code: u16, message: &str, fatal: bool) {
    let reply = MatchReply::Error {
        code,
        message: message.to_string(),
        fatal,
    };
    if let Err(e) = conn.send(&EscapedForm::encode(&reply.to_fields())).await {
        tracing::debug!(id = %conn.id(), error = %e, "error reply not delivered");
    }
}
