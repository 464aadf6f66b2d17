//! Shared data model for the whittle request minimizer.
//!
//! Everything that flows between the engine, the transport layer, the store
//! and the CLI lives here: the immutable captured request, the comparable
//! response projection, the mutable reduction working set, the run
//! configuration and the terminal result/error types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

/// Runtime directory for settings, the capture database and run logs.
pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".whittle")
}

/// True when a `Content-Type` value indicates a JSON body.
pub fn content_type_is_json(value: &str) -> bool {
    value.to_ascii_lowercase().contains("json")
}

/// True when a `Content-Type` value indicates a URL-encoded form body.
pub fn content_type_is_form(value: &str) -> bool {
    value
        .to_ascii_lowercase()
        .contains("application/x-www-form-urlencoded")
}

/// Immutable snapshot of a captured HTTP request.
///
/// Captured once (by `whittle import` or an upstream proxy) and never
/// mutated afterwards; every reduction pass re-synthesizes trial requests
/// from this plus the current [`ReductionState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Path without the query string, e.g. `/api/items`.
    pub path: String,
    /// Raw query string without the leading `?`. Empty when absent.
    pub query: String,
    /// Header multimap in first-seen order, captured name casing preserved.
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// First value of the named header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_value("content-type")
    }
}

/// Derived, comparable projection of an HTTP response.
///
/// Computed fresh for every response and never persisted. The engine's
/// equivalence oracle only ever looks at these fields; `body_sha256` backs
/// the oracle's exact-body fallback when a JSON body fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSignature {
    pub status: u16,
    /// Raw `Content-Length` header value (string compare; absence matters).
    pub content_length: Option<String>,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub body_len: usize,
    /// Sorted top-level JSON key names, when the content type indicates
    /// JSON and the body parses. An empty vec means "parsed, but not an
    /// object"; `None` means "not JSON" or "did not parse".
    pub json_keys: Option<Vec<String>>,
    pub body_sha256: String,
}

impl ResponseSignature {
    pub fn from_parts(
        status: u16,
        content_length: Option<String>,
        content_type: Option<String>,
        location: Option<String>,
        body: &[u8],
    ) -> Self {
        let json_keys = match content_type.as_deref() {
            Some(ct) if content_type_is_json(ct) => top_level_json_keys(body),
            _ => None,
        };
        Self {
            status,
            content_length,
            content_type,
            location,
            body_len: body.len(),
            json_keys,
            body_sha256: sha256_hex(body),
        }
    }
}

fn top_level_json_keys(body: &[u8]) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            Some(keys)
        }
        _ => Some(Vec::new()),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Current body of the request under reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BodyState {
    Raw(Vec<u8>),
    /// Parsed `application/x-www-form-urlencoded` fields, first-seen order.
    Form(IndexMap<String, Vec<String>>),
}

/// The orchestrator's working set: the currently committed minimal request.
///
/// Owned exclusively by the orchestrator. Each reducer receives a clone per
/// trial and the orchestrator commits the clone only when the trial's
/// response stayed oracle-equivalent to the baseline, so the state is in
/// the baseline equivalence class at every point by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionState {
    pub query: IndexMap<String, Vec<String>>,
    /// Surviving headers with current values. Never contains `Host`; the
    /// transport derives it from the descriptor's host and port.
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Option<BodyState>,
}

impl ReductionState {
    pub fn from_descriptor(desc: &RequestDescriptor) -> Self {
        let headers = desc
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        Self {
            query: parse_urlencoded(&desc.query),
            headers,
            body: desc.body.clone().map(BodyState::Raw),
        }
    }

    /// Current body bytes; form fields are re-encoded on demand.
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        match &self.body {
            Some(BodyState::Raw(bytes)) => Some(bytes.clone()),
            Some(BodyState::Form(fields)) => Some(encode_urlencoded(fields).into_bytes()),
            None => None,
        }
    }

    /// First value of the named header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }
}

/// Parse a query string or form body into an ordered key -> values map.
pub fn parse_urlencoded(raw: &str) -> IndexMap<String, Vec<String>> {
    let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
    if raw.is_empty() {
        return map;
    }
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        map.entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    map
}

/// Serialize an ordered key -> values map back into `k=v&k2=v2` form.
pub fn encode_urlencoded(map: &IndexMap<String, Vec<String>>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in map {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Pipeline phase of one minimization run.
///
/// Transitions are strictly sequential; a disabled stage still advances the
/// phase without touching [`ReductionState`]. `Error` is reachable from any
/// phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimizePhase {
    Init,
    BaselineSent,
    QueryReduced,
    BodyReduced,
    HeadersReduced,
    JsonReduced,
    FinalSent,
    Done,
    Error,
}

pub fn is_valid_phase_transition(from: &MinimizePhase, to: &MinimizePhase) -> bool {
    if from == to {
        return true;
    }
    if *to == MinimizePhase::Error {
        return true;
    }
    matches!(
        (from, to),
        (MinimizePhase::Init, MinimizePhase::BaselineSent)
            | (MinimizePhase::BaselineSent, MinimizePhase::QueryReduced)
            | (MinimizePhase::QueryReduced, MinimizePhase::BodyReduced)
            | (MinimizePhase::BodyReduced, MinimizePhase::HeadersReduced)
            | (MinimizePhase::HeadersReduced, MinimizePhase::JsonReduced)
            | (MinimizePhase::JsonReduced, MinimizePhase::FinalSent)
            | (MinimizePhase::FinalSent, MinimizePhase::Done)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizationConfig {
    /// Minimum delay before every send, in milliseconds. Advisory pacing,
    /// not a scheduler; there is never more than one request in flight.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Additional attempts after the first failed send.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Header name globs removed without a network trial.
    #[serde(default = "default_auto_removed_headers")]
    pub auto_removed_headers: Vec<String>,
    /// Header name globs never trialed for removal. Takes precedence over
    /// `auto_removed_headers`.
    #[serde(default)]
    pub keep_headers: Vec<String>,
    #[serde(default = "default_true")]
    pub minimize_query: bool,
    #[serde(default = "default_true")]
    pub minimize_body: bool,
    #[serde(default = "default_true")]
    pub minimize_headers: bool,
    #[serde(default = "default_true")]
    pub minimize_json: bool,
    /// Forwarded to the transport collaborator on every send.
    #[serde(default)]
    pub save_to_history: bool,
}

fn default_min_delay_ms() -> u64 {
    100
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_auto_removed_headers() -> Vec<String> {
    vec!["sec-*".to_string()]
}
fn default_true() -> bool {
    true
}

impl Default for MinimizationConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            auto_removed_headers: default_auto_removed_headers(),
            keep_headers: Vec::new(),
            minimize_query: true,
            minimize_body: true,
            minimize_headers: true,
            minimize_json: true,
            save_to_history: false,
        }
    }
}

impl MinimizationConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".whittle/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    /// Layered load: defaults, then user settings, then project settings.
    /// Missing files are skipped; present files are deep-merged over the
    /// accumulated value key by key.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid settings path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

/// Terminal outcome of one minimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MinimizeResult {
    Success {
        status: u16,
        session_id: Uuid,
    },
    /// Minimized and confirmed, but the replay session could not be opened.
    Warning {
        status: u16,
        message: String,
    },
}

/// Hard failures surfaced to the caller. Everything else degrades to
/// "keep this piece of the request" and the pipeline continues.
#[derive(Debug, thiserror::Error)]
pub enum MinimizeError {
    #[error("request {0} not found")]
    RequestNotFound(Uuid),

    #[error("baseline request failed: {0}")]
    Baseline(String),

    #[error("final send failed: {0}")]
    FinalSend(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
