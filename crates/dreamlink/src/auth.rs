//! HTTP endpoint A: login, registration and service location.
//!
//! One POST route speaking the obfuscated UrlForm dialect. Every response
//! carries a 3-digit `returncd` and a `datetime` stamp; the interesting
//! fields ride alongside. This is the first hop of the authentication
//! hand-off: a successful login or service location mints the token a
//! second transport later redeems.

use std::sync::Arc;

use bytes::Bytes;
use dreamlink_protocol::UrlForm;
use dreamlink_session::{is_valid_user_id, RecordStore, SessionError, SERVICE_MATCH};
use time::macros::format_description;
use time::OffsetDateTime;
use warp::filters::BoxedFilter;
use warp::http::Response;
use warp::Filter;

use crate::server::ServerState;

/// Success.
const CD_OK: &str = "001";
/// Registration success.
const CD_REGISTERED: &str = "002";
/// Internal error.
const CD_INTERNAL: &str = "100";
/// Bad request.
const CD_BAD_REQUEST: &str = "102";
/// Duplicate id at registration.
const CD_DUPLICATE: &str = "104";
/// User not found (also covers bad credentials, as the original did).
const CD_NOT_FOUND: &str = "204";

/// The POST /ac route.
pub(crate) fn route<S: RecordStore>(
    state: Arc<ServerState<S>>,
) -> BoxedFilter<(Response<Vec<u8>>,)> {
    let with_state = warp::any().map(move || Arc::clone(&state));
    warp::post()
        .and(warp::path("ac"))
        .and(warp::path::end())
        .and(warp::body::bytes())
        .and(with_state)
        .then(handle)
        .boxed()
}

async fn handle<S: RecordStore>(
    body: Bytes,
    state: Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let form = UrlForm::obfuscated();

    let fields = match std::str::from_utf8(&body).map(|text| form.decode(text)) {
        Ok(Ok(fields)) => fields,
        _ => return respond(CD_BAD_REQUEST, Vec::new()),
    };

    match find(&fields, "action") {
        Some("login") => login(&fields, &state).await,
        Some("acctcreate") => acctcreate(&fields, &state).await,
        Some("svcloc") => svcloc(&fields, &state).await,
        _ => respond(CD_BAD_REQUEST, Vec::new()),
    }
}

/// `action=login`: authenticate (auto-registering when policy allows) and
/// issue the match-service session.
async fn login<S: RecordStore>(
    fields: &[(String, String)],
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let (Some(user_id), Some(secret), Some(branch)) = (
        find(fields, "userid"),
        find(fields, "passwd"),
        find(fields, "branch"),
    ) else {
        return respond(CD_BAD_REQUEST, Vec::new());
    };

    let mut users = state.users.lock().await;

    if !users.exists(user_id).await {
        if !(state.config.register_on_login && is_valid_user_id(user_id)) {
            return respond(CD_NOT_FOUND, Vec::new());
        }
        match users.register(user_id, secret).await {
            Ok(()) => {}
            Err(SessionError::Store(e)) => {
                tracing::error!(error = %e, "registration-through-login failed");
                return respond(CD_INTERNAL, Vec::new());
            }
            Err(_) => return respond(CD_BAD_REQUEST, Vec::new()),
        }
    }

    if users.authenticate(user_id, secret).await.is_none() {
        return respond(CD_NOT_FOUND, Vec::new());
    }
    drop(users);

    let (token, challenge) = state
        .sessions
        .lock()
        .await
        .issue(user_id, SERVICE_MATCH, branch);

    respond(
        CD_OK,
        vec![
            ("challenge".to_string(), challenge),
            ("token".to_string(), token),
        ],
    )
}

/// `action=acctcreate`: explicit registration.
async fn acctcreate<S: RecordStore>(
    fields: &[(String, String)],
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let (Some(user_id), Some(secret)) =
        (find(fields, "userid"), find(fields, "passwd"))
    else {
        return respond(CD_BAD_REQUEST, Vec::new());
    };

    match state.users.lock().await.register(user_id, secret).await {
        Ok(()) => respond(CD_REGISTERED, Vec::new()),
        Err(SessionError::DuplicateId(_)) => respond(CD_DUPLICATE, Vec::new()),
        Err(SessionError::BadId(_)) => respond(CD_BAD_REQUEST, Vec::new()),
        Err(e) => {
            tracing::error!(error = %e, "registration failed");
            respond(CD_INTERNAL, Vec::new())
        }
    }
}

/// `action=svcloc`: the second-hop credential hand-off. Authenticates and
/// issues a session scoped to the named service, so a completely
/// different transport can re-validate this login without the password.
async fn svcloc<S: RecordStore>(
    fields: &[(String, String)],
    state: &Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let (Some(user_id), Some(secret), Some(svc)) = (
        find(fields, "userid"),
        find(fields, "passwd"),
        find(fields, "svc"),
    ) else {
        return respond(CD_BAD_REQUEST, Vec::new());
    };
    let branch = find(fields, "branch").unwrap_or_default();

    if state
        .users
        .lock()
        .await
        .authenticate(user_id, secret)
        .await
        .is_none()
    {
        return respond(CD_NOT_FOUND, Vec::new());
    }

    let Some((service, host)) = resolve_service(&state.config, svc) else {
        return respond(CD_BAD_REQUEST, Vec::new());
    };

    let (token, _challenge) = state
        .sessions
        .lock()
        .await
        .issue(user_id, &service, branch);

    respond(
        CD_OK,
        vec![
            ("svchost".to_string(), host),
            ("servicetoken".to_string(), token),
        ],
    )
}

/// Maps a requested service tag to (session service name, host).
fn resolve_service(
    config: &crate::ServerConfig,
    svc: &str,
) -> Option<(String, String)> {
    if svc == "content" {
        return Some((
            dreamlink_session::SERVICE_CONTENT.to_string(),
            config.content_host.clone(),
        ));
    }
    config
        .external_services
        .iter()
        .find(|(tag, _)| tag == svc)
        .map(|(_, target)| target.clone())
}

/// Builds the obfuscated UrlForm response with the mandatory status and
/// timestamp fields appended.
fn respond(code: &str, mut fields: Vec<(String, String)>) -> Response<Vec<u8>> {
    fields.push(("returncd".to_string(), code.to_string()));
    fields.push(("datetime".to_string(), datetime_stamp()));

    let body = UrlForm::obfuscated().encode(&fields).into_bytes();
    Response::builder()
        .header("content-type", "text/plain")
        .body(body)
        .unwrap_or_default()
}

/// `YYYYMMDDHHMMSS` in UTC, the stamp format the client expects.
fn datetime_stamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day][hour][minute][second]"
        ))
        .unwrap_or_else(|_| "00000000000000".to_string())
}

fn find<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_stamp_shape() {
        let stamp = datetime_stamp();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_resolve_service_content_uses_configured_host() {
        let config = crate::ServerConfig::default();
        let (service, host) = resolve_service(&config, "content").unwrap();
        assert_eq!(service, dreamlink_session::SERVICE_CONTENT);
        assert_eq!(host, config.content_host);
    }

    #[test]
    fn test_resolve_service_external_passthrough() {
        let config = crate::ServerConfig {
            external_services: vec![(
                "terminal".to_string(),
                ("terminal".to_string(), "gt.dreamlink.example".to_string()),
            )],
            ..Default::default()
        };
        let (service, host) = resolve_service(&config, "terminal").unwrap();
        assert_eq!(service, "terminal");
        assert_eq!(host, "gt.dreamlink.example");
    }

    #[test]
    fn test_resolve_service_unknown_is_none() {
        let config = crate::ServerConfig::default();
        assert!(resolve_service(&config, "warp-pipe").is_none());
    }
}
