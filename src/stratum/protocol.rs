//! Stratum protocol message definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum protocol methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    /// Client subscribes to mining notifications
    Subscribe,
    /// Client authorizes with credentials
    Authorize,
    /// Client submits a share
    Submit,
    /// Client asks to receive extranonce updates
    ExtranonceSubscribe,
    /// Server notifies client of new work
    Notify,
    /// Server sets share difficulty
    SetDifficulty,
    /// Unknown method
    Unknown(String),
}

impl StratumMethod {
    /// Parse method from string
    pub fn parse_method(s: &str) -> Self {
        match s {
            "mining.subscribe" => Self::Subscribe,
            "mining.authorize" => Self::Authorize,
            "mining.submit" => Self::Submit,
            "mining.extranonce.subscribe" => Self::ExtranonceSubscribe,
            "mining.notify" => Self::Notify,
            "mining.set_difficulty" => Self::SetDifficulty,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "mining.subscribe",
            Self::Authorize => "mining.authorize",
            Self::Submit => "mining.submit",
            Self::ExtranonceSubscribe => "mining.extranonce.subscribe",
            Self::Notify => "mining.notify",
            Self::SetDifficulty => "mining.set_difficulty",
            Self::Unknown(s) => s,
        }
    }
}

/// Error codes carried in the `error` triple of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    /// Catch-all, also used for malformed input
    Other = 20,
    /// Job id unknown or already evicted
    JobNotFound = 21,
    /// Share already submitted
    DuplicateShare = 22,
    /// Hash above the session target
    LowDifficultyShare = 23,
    /// Worker not authorized
    UnauthorizedWorker = 24,
    /// Request requires a subscription
    NotSubscribed = 25,
}

impl StratumErrorCode {
    /// Numeric wire code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Default message for the code
    pub fn message(self) -> &'static str {
        match self {
            Self::Other => "Other/Unknown",
            Self::JobNotFound => "Job not found",
            Self::DuplicateShare => "Duplicate share",
            Self::LowDifficultyShare => "Low difficulty share",
            Self::UnauthorizedWorker => "Unauthorized worker",
            Self::NotSubscribed => "Not subscribed",
        }
    }
}

/// Stratum request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    /// Request ID
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

impl StratumRequest {
    /// Create a new request
    pub fn new(id: impl Into<Value>, method: &str, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Get the method as enum
    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::parse_method(&self.method)
    }

    /// String parameter at `index`, if present
    pub fn str_param(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(Value::as_str)
    }
}

/// Stratum response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumResponse {
    /// Request ID this responds to
    pub id: Value,
    /// Result if successful
    pub result: Option<Value>,
    /// Error if failed
    pub error: Option<Value>,
}

impl StratumResponse {
    /// Create a successful response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, code: i32, message: &str) -> Self {
        Self {
            id,
            result: None,
            error: Some(error_triple(code, message)),
        }
    }

    /// Create an error response with the code's default message
    pub fn error_with_code(id: Value, code: StratumErrorCode) -> Self {
        Self::error(id, code.code(), code.message())
    }

    /// A `false` result that still carries the rejection reason
    pub fn rejected(id: Value, code: i32, message: &str) -> Self {
        Self {
            id,
            result: Some(Value::Bool(false)),
            error: Some(error_triple(code, message)),
        }
    }

    /// Whether the response reports success
    pub fn is_accepted(&self) -> bool {
        self.error.is_none() && self.result.as_ref().map_or(false, |r| r != &Value::Bool(false))
    }
}

fn error_triple(code: i32, message: &str) -> Value {
    Value::Array(vec![
        Value::Number(code.into()),
        Value::String(message.to_string()),
        Value::Null,
    ])
}

/// Stratum notification (no ID)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumNotification {
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Vec<Value>,
    /// Always null for notifications
    pub id: Value,
}

impl StratumNotification {
    /// Create a new notification
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
            id: Value::Null,
        }
    }

    /// `mining.set_difficulty`
    pub fn set_difficulty(difficulty: f64) -> Self {
        Self::new(
            StratumMethod::SetDifficulty.as_str(),
            vec![serde_json::json!(difficulty)],
        )
    }

    /// `mining.notify`
    pub fn notify(params: Vec<Value>) -> Self {
        Self::new(StratumMethod::Notify.as_str(), params)
    }
}

/// Generic Stratum message
#[derive(Debug, Clone)]
pub enum StratumMessage {
    /// Request from client
    Request(StratumRequest),
    /// Response to request
    Response(StratumResponse),
    /// Notification (no response expected)
    Notification(StratumNotification),
}

impl StratumMessage {
    /// Parse a JSON string into a Stratum message
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;

        if value.get("method").is_some() {
            match value.get("id") {
                None | Some(Value::Null) => {
                    let notification: StratumNotification = serde_json::from_value(value)?;
                    Ok(StratumMessage::Notification(notification))
                }
                Some(_) => {
                    let request: StratumRequest = serde_json::from_value(value)?;
                    Ok(StratumMessage::Request(request))
                }
            }
        } else {
            let response: StratumResponse = serde_json::from_value(value)?;
            Ok(StratumMessage::Response(response))
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StratumMessage::Request(req) => serde_json::to_string(req),
            StratumMessage::Response(resp) => serde_json::to_string(resp),
            StratumMessage::Notification(notif) => serde_json::to_string(notif),
        }
    }
}
