//! Typed messages for the binary-TCP match service.
//!
//! The legacy dialect carries the message kind as the name of the first
//! escaped-form field. The set of kinds is closed and will never grow (the
//! client is burned into ROM), so dispatch is an exhaustive match on a
//! tagged union rather than any open-ended registry.

use crate::FormatError;

/// Messages a client may send to the match service.
///
/// Every kind except [`Login`](Self::Login) presents the session key the
/// server handed out at login; the handler rejects mismatches without
/// touching connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRequest {
    /// Completes the challenge-response handshake with a token issued by
    /// the login service.
    Login {
        token: String,
        client_challenge: String,
        response: String,
    },
    /// Fetches the profile bound to this connection.
    ProfileGet { session_key: u32 },
    /// Updates the bound profile. Only the present fields are applied.
    ProfileUpdate {
        session_key: u32,
        first_name: Option<String>,
        last_name: Option<String>,
        display_name: Option<String>,
        postal_code: Option<String>,
    },
    /// Keepalive; answered with an identity echo.
    KeepAlive { session_key: u32 },
    /// Status probe; answered with an identity echo.
    Status { session_key: u32 },
    /// Clears the connection's session key.
    Logout { session_key: u32 },
}

impl MatchRequest {
    /// The wire discriminator for this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::ProfileGet { .. } => "getprofile",
            Self::ProfileUpdate { .. } => "updatepro",
            Self::KeepAlive { .. } => "ka",
            Self::Status { .. } => "status",
            Self::Logout { .. } => "logout",
        }
    }

    /// Decodes a request from its escaped-form field list.
    ///
    /// The first field names the kind; unknown kinds and missing or
    /// malformed required fields are `FormatError`s.
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, FormatError> {
        let kind = fields
            .first()
            .map(|(name, _)| name.as_str())
            .ok_or(FormatError::MissingField("kind"))?;

        match kind {
            "login" => Ok(Self::Login {
                token: required(fields, "authtoken")?.to_owned(),
                client_challenge: required(fields, "challenge")?.to_owned(),
                response: required(fields, "response")?.to_owned(),
            }),
            "getprofile" => Ok(Self::ProfileGet {
                session_key: session_key(fields)?,
            }),
            "updatepro" => Ok(Self::ProfileUpdate {
                session_key: session_key(fields)?,
                first_name: optional(fields, "firstname"),
                last_name: optional(fields, "lastname"),
                display_name: optional(fields, "nick"),
                postal_code: optional(fields, "zipcode"),
            }),
            "ka" => Ok(Self::KeepAlive {
                session_key: session_key(fields)?,
            }),
            "status" => Ok(Self::Status {
                session_key: session_key(fields)?,
            }),
            "logout" => Ok(Self::Logout {
                session_key: session_key(fields)?,
            }),
            other => Err(FormatError::UnknownKind(other.to_owned())),
        }
    }

    /// Encodes this request to its escaped-form field list.
    ///
    /// The server never sends requests; this is the client half of the
    /// dialect, used by tests and diagnostic tooling.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![(self.kind().to_owned(), String::new())];
        match self {
            Self::Login {
                token,
                client_challenge,
                response,
            } => {
                fields.push(("challenge".into(), client_challenge.clone()));
                fields.push(("authtoken".into(), token.clone()));
                fields.push(("response".into(), response.clone()));
            }
            Self::ProfileGet { session_key }
            | Self::KeepAlive { session_key }
            | Self::Status { session_key }
            | Self::Logout { session_key } => {
                fields.push(("sesskey".into(), session_key.to_string()));
            }
            Self::ProfileUpdate {
                session_key,
                first_name,
                last_name,
                display_name,
                postal_code,
            } => {
                fields.push(("sesskey".into(), session_key.to_string()));
                push_opt(&mut fields, "firstname", first_name);
                push_opt(&mut fields, "lastname", last_name);
                push_opt(&mut fields, "nick", display_name);
                push_opt(&mut fields, "zipcode", postal_code);
            }
        }
        fields
    }
}

/// Messages the match service sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReply {
    /// The unsolicited greeting: a fresh server challenge, sent the moment
    /// a connection is accepted.
    Challenge { server_challenge: String },
    /// Login succeeded.
    LoginOk {
        user_id: String,
        profile_id: u32,
        proof: String,
        session_key: u32,
    },
    /// The profile bound to this connection.
    ProfileInfo {
        profile_id: u32,
        first_name: String,
        last_name: String,
        display_name: String,
        postal_code: String,
    },
    /// Profile update acknowledged.
    ProfileUpdated,
    /// Keepalive echo.
    KeepAliveAck { user_id: String },
    /// Status echo.
    StatusAck { user_id: String },
    /// Logout acknowledged; the session key is gone.
    LogoutAck,
    /// Something went wrong. `fatal` replies are followed by a close.
    Error {
        code: u16,
        message: String,
        fatal: bool,
    },
}

impl MatchReply {
    /// Encodes this reply to its escaped-form field list.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        match self {
            Self::Challenge { server_challenge } => vec![
                ("lc".into(), "1".into()),
                ("challenge".into(), server_challenge.clone()),
                ("id".into(), "1".into()),
            ],
            Self::LoginOk {
                user_id,
                profile_id,
                proof,
                session_key,
            } => vec![
                ("lc".into(), "2".into()),
                ("sesskey".into(), session_key.to_string()),
                ("proof".into(), proof.clone()),
                ("userid".into(), user_id.clone()),
                ("profileid".into(), profile_id.to_string()),
                ("id".into(), "1".into()),
            ],
            Self::ProfileInfo {
                profile_id,
                first_name,
                last_name,
                display_name,
                postal_code,
            } => vec![
                ("pi".into(), String::new()),
                ("profileid".into(), profile_id.to_string()),
                ("firstname".into(), first_name.clone()),
                ("lastname".into(), last_name.clone()),
                ("nick".into(), display_name.clone()),
                ("zipcode".into(), postal_code.clone()),
                ("id".into(), "1".into()),
            ],
            Self::ProfileUpdated => vec![("pu".into(), "1".into())],
            Self::KeepAliveAck { user_id } => vec![("ka".into(), user_id.clone())],
            Self::StatusAck { user_id } => vec![("status".into(), user_id.clone())],
            Self::LogoutAck => vec![("lo".into(), "1".into())],
            Self::Error {
                code,
                message,
                fatal,
            } => {
                let mut fields = vec![
                    ("error".into(), String::new()),
                    ("err".into(), code.to_string()),
                    ("errmsg".into(), message.clone()),
                ];
                if *fatal {
                    fields.push(("fatal".into(), "1".into()));
                }
                fields
            }
        }
    }

    /// Decodes a reply from its field list. The client half of the dialect,
    /// used by tests and diagnostic tooling.
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, FormatError> {
        let kind = fields
            .first()
            .ok_or(FormatError::MissingField("kind"))?;

        match (kind.0.as_str(), kind.1.as_str()) {
            ("lc", "1") => Ok(Self::Challenge {
                server_challenge: required(fields, "challenge")?.to_owned(),
            }),
            ("lc", "2") => Ok(Self::LoginOk {
                user_id: required(fields, "userid")?.to_owned(),
                profile_id: parse_u32(fields, "profileid")?,
                proof: required(fields, "proof")?.to_owned(),
                session_key: parse_u32(fields, "sesskey")?,
            }),
            ("pi", _) => Ok(Self::ProfileInfo {
                profile_id: parse_u32(fields, "profileid")?,
                first_name: required(fields, "firstname")?.to_owned(),
                last_name: required(fields, "lastname")?.to_owned(),
                display_name: required(fields, "nick")?.to_owned(),
                postal_code: required(fields, "zipcode")?.to_owned(),
            }),
            ("pu", _) => Ok(Self::ProfileUpdated),
            ("ka", user_id) => Ok(Self::KeepAliveAck {
                user_id: user_id.to_owned(),
            }),
            ("status", user_id) => Ok(Self::StatusAck {
                user_id: user_id.to_owned(),
            }),
            ("lo", _) => Ok(Self::LogoutAck),
            ("error", _) => Ok(Self::Error {
                code: parse_u32(fields, "err")? as u16,
                message: required(fields, "errmsg")?.to_owned(),
                fatal: optional(fields, "fatal").is_some(),
            }),
            (other, _) => Err(FormatError::UnknownKind(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn find<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn required<'a>(
    fields: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str, FormatError> {
    find(fields, name).ok_or(FormatError::MissingField(name))
}

fn optional(fields: &[(String, String)], name: &str) -> Option<String> {
    find(fields, name).map(str::to_owned)
}

fn parse_u32(fields: &[(String, String)], name: &'static str) -> Result<u32, FormatError> {
    required(fields, name)?
        .parse()
        .map_err(|_| FormatError::InvalidField(name))
}

fn session_key(fields: &[(String, String)]) -> Result<u32, FormatError> {
    parse_u32(fields, "sesskey")
}

fn push_opt(fields: &mut Vec<(String, String)>, name: &str, value: &Option<String>) {
    if let Some(value) = value {
        fields.push((name.to_owned(), value.clone()));
    }
}

// =========================================================================
// Tests
// =========================================================================
