use serde::Deserialize;
use serde::Serialize;

/// Value of the `type` field in the handshake prompt the server sends before
/// anything else on a fresh connection.
pub const AUTH_REQUIRED_TYPE: &str = "auth_required";

/// One line of client input, parsed into the fixed command vocabulary.
///
/// `EXEC:`, `CHECK_AUTH:`, `GRANT:` and `REVOKE:` take the remainder of the
/// line as their argument, untrimmed beyond the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Version,
    Exec(String),
    CheckAuth(String),
    Grant(String),
    Revoke(String),
    Unknown(String),
}

impl Request {
    pub fn parse(line: &str) -> Request {
        if line == "PING" {
            Request::Ping
        } else if line == "VERSION" {
            Request::Version
        } else if let Some(cmd) = line.strip_prefix("EXEC:") {
            Request::Exec(cmd.to_string())
        } else if let Some(pkg) = line.strip_prefix("CHECK_AUTH:") {
            Request::CheckAuth(pkg.to_string())
        } else if let Some(pkg) = line.strip_prefix("GRANT:") {
            Request::Grant(pkg.to_string())
        } else if let Some(pkg) = line.strip_prefix("REVOKE:") {
            Request::Revoke(pkg.to_string())
        } else {
            Request::Unknown(line.to_string())
        }
    }
}

/// Single-line JSON frame sent for every server reply: a success flag plus
/// either an output or an error field. Serializing through serde keeps quote
/// and control characters from breaking the line framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn from_error(error: &crate::BrokerError) -> Self {
        Self::fail(error.to_string())
    }

    /// Serializes to one line, without the trailing newline. Serialization of
    /// this shape cannot fail in practice; if it ever does the client still
    /// receives a well-formed failure object.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"Internal error: response serialization"}"#.to_string()
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthRequired<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

/// The handshake prompt, one line, without the trailing newline.
pub fn auth_required_line() -> String {
    serde_json::to_string(&AuthRequired {
        kind: AUTH_REQUIRED_TYPE,
        message: "Authentication required",
    })
    .unwrap_or_else(|_| r#"{"type":"auth_required"}"#.to_string())
}
