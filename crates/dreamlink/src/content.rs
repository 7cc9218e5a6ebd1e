//! HTTP endpoint C: the session-gated binary Dream World exchange.
//!
//! GET serves the read-style operations (status, list, download,
//! memory link); POST the write-style ones (upload, finish, account
//! creation). Every request presents the shared-secret basic-auth pair
//! plus the `token` minted by service location. Binary responses start
//! with a 4-byte little-endian status word; status-style responses pad it
//! with 124 reserved zero bytes, while a download carries the real
//! payload after the word.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use bytes::Bytes;
use dreamlink_dream::{encode_download_payload, read_pkmn_record, GameVariant, PKMN_RECORD_LEN};
use dreamlink_session::{PlayerStatus, RecordStore, SessionError, SERVICE_CONTENT};
use warp::filters::BoxedFilter;
use warp::http::Response;
use warp::Filter;

use crate::server::ServerState;

/// Operation succeeded.
const STATUS_OK: u32 = 0;
/// Missing, expired or wrong-service token (or bad basic auth).
const STATUS_BAD_TOKEN: u32 = 1;
/// No player with the given game-sync id.
const STATUS_UNKNOWN_PLAYER: u32 = 2;
/// The player's lifecycle state forbids the operation.
const STATUS_WRONG_STATE: u32 = 3;
/// Malformed request or undecodable upload.
const STATUS_MALFORMED: u32 = 4;
/// The external store failed; the client should retry.
const STATUS_STORE_FAILED: u32 = 5;
/// Account creation with an id that is already taken.
const STATUS_DUPLICATE: u32 = 6;

/// Reserved tail of a status-style response.
const RESERVED_LEN: usize = 124;

/// The GET and POST /sync routes.
pub(crate) fn routes<S: RecordStore>(
    state: Arc<ServerState<S>>,
) -> BoxedFilter<(Response<Vec<u8>>,)> {
    let get_state = Arc::clone(&state);
    let with_get_state = warp::any().map(move || Arc::clone(&get_state));
    let get = warp::get()
        .and(warp::path("sync"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_get_state)
        .then(handle_get);

    let with_post_state = warp::any().map(move || Arc::clone(&state));
    let post = warp::post()
        .and(warp::path("sync"))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::bytes())
        .and(with_post_state)
        .then(handle_post);

    get.or(post).unify().boxed()
}

async fn handle_get<S: RecordStore>(
    query: HashMap<String, String>,
    authorization: Option<String>,
    state: Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    if !basic_auth_ok(authorization.as_deref(), &state.config.content_auth) {
        return status_response(STATUS_BAD_TOKEN);
    }
    let Some(op) = query.get("p") else {
        return status_response(STATUS_MALFORMED);
    };
    if session_for(&query, &state).await.is_none() {
        return status_response(STATUS_BAD_TOKEN);
    }

    match op.as_str() {
        // Pure acknowledgments: the client only checks the status word.
        "status" | "list" | "memorylink" => status_response(STATUS_OK),
        "download" => download(&query, &state).await,
        _ => status_response(STATUS_MALFORMED),
    }
}

async fn handle_post<S: RecordStore>(
    query: HashMap<String, String>,
    authorization: Option<String>,
    body: Bytes,
    state: Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    // `body` is fully buffered before this handler runs, so a rejection
    // never leaves half a request in the socket.
    if !basic_auth_ok(authorization.as_deref(), &state.config.content_auth) {
        return status_response(STATUS_BAD_TOKEN);
    }
    let Some(op) = query.get("p") else {
        return status_response(STATUS_MALFORMED);
    };
    if session_for(&query, &state).await.is_none() {
        return status_response(STATUS_BAD_TOKEN);
    }

    match op.as_str() {
        "upload" => upload(&query, &body, &state).await,
        "finish" => finish(&query, &state).await,
        "acctcreate" => acctcreate(&query, &state).await,
        _ => status_response(STATUS_MALFORMED),
    }
}

/// `p=download`: deliver the staged dream content, or a bare
/// acknowledgment if the player is awake and there is nothing to wake up
/// from.
async fn download<S: RecordStore>(
    query: &HashMap<String, String>,
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let Some(sync_id) = query.get("gsid") else {
        return status_response(STATUS_MALFORMED);
    };

    let mut players = state.players.lock().await;
    let Some(player) = players.get(sync_id).await else {
        return status_response(STATUS_UNKNOWN_PLAYER);
    };

    if !player.status.has_dream() {
        return status_response(STATUS_OK);
    }

    let payload = encode_download_payload(&player.content, player.game_version);
    if player.status != PlayerStatus::WakeReady {
        if let Err(e) = players.mark_wake_ready(sync_id).await {
            tracing::warn!(%sync_id, error = %e, "wake-ready transition failed");
            return status_response(store_failure_code(&e));
        }
    }

    let mut body = Vec::with_capacity(4 + payload.len());
    body.extend_from_slice(&STATUS_OK.to_le_bytes());
    body.extend_from_slice(&payload);
    binary_response(body)
}

/// `p=upload`: decode the tucked-in creature and put the player to sleep.
async fn upload<S: RecordStore>(
    query: &HashMap<String, String>,
    body: &[u8],
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let Some(sync_id) = query.get("gsid") else {
        return status_response(STATUS_MALFORMED);
    };

    let mut players = state.players.lock().await;
    let Some(player) = players.get(sync_id).await else {
        return status_response(STATUS_UNKNOWN_PLAYER);
    };
    if !player.status.accepts_upload() && !state.config.allow_sleeping_overwrite {
        return status_response(STATUS_WRONG_STATE);
    }

    if body.len() < PKMN_RECORD_LEN {
        return status_response(STATUS_MALFORMED);
    }
    let record = match read_pkmn_record(&body[..PKMN_RECORD_LEN]) {
        Ok(record) => record,
        Err(e) => {
            // The save fragment did not decode; the player transition is
            // never attempted.
            tracing::info!(%sync_id, error = %e, "upload rejected");
            return status_response(STATUS_MALFORMED);
        }
    };

    match players
        .begin_sleep(
            sync_id,
            record,
            body,
            state.config.allow_sleeping_overwrite,
        )
        .await
    {
        Ok(()) => status_response(STATUS_OK),
        Err(SessionError::WrongStatus { .. }) => status_response(STATUS_WRONG_STATE),
        Err(SessionError::UnknownPlayer(_)) => status_response(STATUS_UNKNOWN_PLAYER),
        Err(e) => {
            tracing::error!(%sync_id, error = %e, "upload persist failed");
            status_response(STATUS_STORE_FAILED)
        }
    }
}

/// `p=finish`: the client confirmed its download; per policy, reset the
/// player back to awake.
async fn finish<S: RecordStore>(
    query: &HashMap<String, String>,
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let Some(sync_id) = query.get("gsid") else {
        return status_response(STATUS_MALFORMED);
    };

    if !state.config.reset_on_finish {
        return status_response(STATUS_OK);
    }

    match state.players.lock().await.reset(sync_id).await {
        Ok(()) => status_response(STATUS_OK),
        Err(SessionError::UnknownPlayer(_)) => status_response(STATUS_UNKNOWN_PLAYER),
        Err(e) => {
            tracing::error!(%sync_id, error = %e, "reset failed");
            status_response(STATUS_STORE_FAILED)
        }
    }
}

/// `p=acctcreate`: register a new game-sync account.
async fn acctcreate<S: RecordStore>(
    query: &HashMap<String, String>,
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let Some(sync_id) = query.get("gsid") else {
        return status_response(STATUS_MALFORMED);
    };
    let variant = match query.get("version").map(String::as_str) {
        Some("1") => GameVariant::Version1,
        Some("2") => GameVariant::Version2,
        _ => return status_response(STATUS_MALFORMED),
    };

    match state.players.lock().await.create(sync_id, variant).await {
        Ok(()) => status_response(STATUS_OK),
        Err(SessionError::DuplicateId(_)) => status_response(STATUS_DUPLICATE),
        Err(SessionError::BadId(_)) => status_response(STATUS_MALFORMED),
        Err(e) => {
            tracing::error!(%sync_id, error = %e, "player creation failed");
            status_response(STATUS_STORE_FAILED)
        }
    }
}

/// Resolves the request's token against the content service.
async fn session_for<S: RecordStore>(
    query: &HashMap<String, String>,
    state: &Arc<ServerState<S>>,
) -> Option<dreamlink_session::ServiceSession> {
    let token = query.get("token")?;
    state
        .sessions
        .lock()
        .await
        .get_valid(token, SERVICE_CONTENT)
}

/// Checks the `Authorization: Basic …` header against the configured
/// shared-secret pair.
fn basic_auth_ok(header: Option<&str>, expected: &(String, String)) -> bool {
    let Some(header) = header else {
        return false;
    };
    let expected_value = format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", expected.0, expected.1))
    );
    header == expected_value
}

fn store_failure_code(error: &SessionError) -> u32 {
    match error {
        SessionError::WrongStatus { .. } => STATUS_WRONG_STATE,
        SessionError::UnknownPlayer(_) => STATUS_UNKNOWN_PLAYER,
        _ => STATUS_STORE_FAILED,
    }
}

/// A 4-byte status word followed by the reserved tail.
fn status_response(code: u32) -> Response<Vec<u8>> {
    let mut body = Vec::with_capacity(4 + RESERVED_LEN);
    body.extend_from_slice(&code.to_le_bytes());
    body.resize(4 + RESERVED_LEN, 0);
    binary_response(body)
}

fn binary_response(body: Vec<u8>) -> Response<Vec<u8>> {
    Response::builder()
        .header("content-type", "application/octet-stream")
        .body(body)
        .unwrap_or_default()
}
