//! Boundary to the signing/filing microservice that talks to the regulator.
//!
//! The service signs the e-CF, files it and answers with a tracking id; the
//! regulator's verdict is fetched later by tracking id. Only the parts of its
//! replies the workflow acts on are interpreted here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use uuid::Uuid;

use ecf_core::{DocumentId, Money, TenantId};
use ecf_documents::RegulatorStatus;
use ecf_sequencing::{DocumentType, Encf};

/// Regulator environment the microservice files against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Cert,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Cert => "cert",
            Environment::Prod => "prod",
        }
    }
}

impl core::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "cert" => Ok(Environment::Cert),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{other}' (expected test, cert or prod)")),
        }
    }
}

/// Connection settings for the microservice, handed to the client explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroserviceConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub environment: Environment,
}

impl MicroserviceConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing service unreachable: {0}")]
    Transport(String),

    #[error("signing service answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("signing service reply is not usable: {0}")]
    InvalidResponse(String),

    #[error("signing service reported an error: {0}")]
    Service(String),
}

/// What gets filed for one numbered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub encf: Encf,
    pub buyer_rnc: Option<String>,
    pub total: Money,
    pub reference_encf: Option<Encf>,
}

impl Submission {
    fn payload(&self, environment: Environment) -> JsonValue {
        json!({
            "environment": environment.as_str(),
            "ecf": {
                "tipoeCF": self.document_type.code(),
                "eNCF": self.encf.to_string(),
                "rncComprador": self.buyer_rnc,
                "montoTotal": self.total.to_string(),
                "ncfModificado": self.reference_encf.map(|e| e.to_string()),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub track_id: String,
    pub status: RegulatorStatus,
    pub messages: Option<String>,
    /// `data` part of the reply, kept for the transaction log.
    pub reply: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// `None` when the reply carries no recognizable code.
    pub status: Option<RegulatorStatus>,
    pub messages: Option<String>,
    pub reply: JsonValue,
}

/// A call made to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCall<'a> {
    Submit,
    Status { track_id: &'a str },
}

impl ServiceCall<'_> {
    pub fn method(self) -> &'static str {
        match self {
            ServiceCall::Submit => "POST",
            ServiceCall::Status { .. } => "GET",
        }
    }

    pub fn path(self) -> String {
        match self {
            ServiceCall::Submit => "/invoice/send".to_string(),
            ServiceCall::Status { track_id } => format!("/invoice/status/{track_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pub method: &'static str,
    pub url: String,
}

pub trait SigningService: Send + Sync {
    fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SigningError>;

    fn status(&self, track_id: &str) -> Result<StatusReport, SigningError>;

    /// Where `call` goes. Services without a base URL answer with the bare path.
    fn route(&self, call: ServiceCall<'_>) -> ServiceRoute {
        ServiceRoute {
            method: call.method(),
            url: call.path(),
        }
    }
}

fn code_of(data: &JsonValue) -> Option<i64> {
    match data.get("codigo")? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Status right after filing: no code or code 0 means the regulator has not
/// decided yet; any other code means it answered synchronously.
pub fn submission_status(data: &JsonValue) -> RegulatorStatus {
    let missing = matches!(data.get("codigo"), None | Some(JsonValue::Null));
    if missing || code_of(data) == Some(0) {
        RegulatorStatus::Pending
    } else {
        RegulatorStatus::Accepted
    }
}

/// Regulator status codes: 0 pending, 1 accepted, 2 rejected.
pub fn status_from_code(data: &JsonValue) -> Option<RegulatorStatus> {
    match code_of(data)? {
        0 => Some(RegulatorStatus::Pending),
        1 => Some(RegulatorStatus::Accepted),
        2 => Some(RegulatorStatus::Rejected),
        _ => None,
    }
}

/// Flatten the regulator's message list into `code: value` lines.
pub fn format_messages(data: &JsonValue) -> Option<String> {
    let list = ["mensajes", "messages"]
        .iter()
        .filter_map(|key| data.get(*key).and_then(JsonValue::as_array))
        .find(|list| !list.is_empty())?;

    let lines: Vec<String> = list
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|m| {
            let code = m.get("codigo").map(render).unwrap_or_default();
            let value = m
                .get("valor")
                .or_else(|| m.get("message"))
                .map(render)
                .unwrap_or_default();
            format!("{code}: {value}")
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ServiceReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<JsonValue>,
}

/// Blocking HTTP client for the microservice. Call it from a blocking thread.
#[derive(Debug, Clone)]
pub struct HttpSigningService {
    client: reqwest::blocking::Client,
    config: MicroserviceConfig,
}

impl HttpSigningService {
    pub fn new(config: MicroserviceConfig) -> Result<Self, SigningError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| SigningError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &MicroserviceConfig {
        &self.config
    }

    fn with_key(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => request.header("x-api-key", key),
            _ => request,
        }
    }

    fn read(response: reqwest::blocking::Response) -> Result<JsonValue, SigningError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SigningError::Http {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let reply: ServiceReply = response
            .json()
            .map_err(|e| SigningError::InvalidResponse(e.to_string()))?;
        if !reply.success {
            return Err(SigningError::Service(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(reply.data.unwrap_or(JsonValue::Null))
    }
}

impl SigningService for HttpSigningService {
    fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SigningError> {
        let response = self
            .with_key(self.client.post(self.route(ServiceCall::Submit).url))
            .json(&submission.payload(self.config.environment))
            .send()
            .map_err(|e| SigningError::Transport(e.to_string()))?;

        let data = Self::read(response)?;
        let track_id = data
            .get("trackId")
            .and_then(JsonValue::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SigningError::InvalidResponse("reply has no trackId".to_string()))?;

        Ok(SubmissionReceipt {
            track_id: track_id.to_string(),
            status: submission_status(&data),
            messages: format_messages(&data),
            reply: data.clone(),
        })
    }

    fn status(&self, track_id: &str) -> Result<StatusReport, SigningError> {
        let response = self
            .with_key(
                self.client
                    .get(self.route(ServiceCall::Status { track_id }).url)
                    .timeout(Duration::from_secs(10)),
            )
            .send()
            .map_err(|e| SigningError::Transport(e.to_string()))?;

        let data = Self::read(response)?;
        Ok(StatusReport {
            status: status_from_code(&data),
            messages: format_messages(&data),
            reply: data,
        })
    }

    fn route(&self, call: ServiceCall<'_>) -> ServiceRoute {
        ServiceRoute {
            method: call.method(),
            url: self.config.url(&call.path()),
        }
    }
}

/// Stand-in service for tests and local runs without a microservice.
///
/// Filing answers "pending"; the verdict for a tracking id is whatever was
/// last set with [`InMemorySigningService::set_code`].
#[derive(Debug, Default)]
pub struct InMemorySigningService {
    codes: Mutex<HashMap<String, Option<i64>>>,
    submissions: Mutex<Vec<Submission>>,
    unreachable: AtomicBool,
}

impl InMemorySigningService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_code(&self, track_id: &str, code: i64) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(track_id.to_string(), Some(code));
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn ensure_reachable(&self) -> Result<(), SigningError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SigningError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

impl SigningService for InMemorySigningService {
    fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SigningError> {
        self.ensure_reachable()?;
        let track_id = format!("TRK-{}", Uuid::now_v7().simple());
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(track_id.clone(), None);
        }
        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.push(submission.clone());
        }
        let reply = json!({ "trackId": track_id });
        Ok(SubmissionReceipt {
            track_id,
            status: RegulatorStatus::Pending,
            messages: None,
            reply,
        })
    }

    fn status(&self, track_id: &str) -> Result<StatusReport, SigningError> {
        self.ensure_reachable()?;
        let codes = self
            .codes
            .lock()
            .map_err(|_| SigningError::Transport("state lock poisoned".to_string()))?;
        let code = codes
            .get(track_id)
            .ok_or_else(|| SigningError::Service(format!("unknown trackId {track_id}")))?;

        let data = match code {
            Some(code) => {
                let valor = if *code == 2 { "Rechazado" } else { "Aceptado" };
                json!({
                    "codigo": code,
                    "mensajes": [{"codigo": code, "valor": valor}]
                })
            }
            None => json!({}),
        };
        Ok(StatusReport {
            status: status_from_code(&data),
            messages: format_messages(&data),
            reply: data,
        })
    }
}
