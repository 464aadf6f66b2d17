//! End-to-end minimization flows against simulated endpoints.
//!
//! Each scenario wires the engine to an in-memory request source, a
//! deterministic transport whose response depends on which parts of the
//! trial request survived, and a recording session host, then asserts on
//! the final minimized request the engine hands to the session host.

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;
use whittle_core::{
    MinimizationConfig, MinimizeError, MinimizeResult, RequestDescriptor, ResponseSignature,
    parse_urlencoded,
};
use whittle_engine::MinimizeEngine;
use whittle_http::{ProgressSink, RequestSource, RequestSpec, SessionHost, Transport};

// ── collaborator mocks ────────────────────────────────────────────────

struct MapSource {
    requests: HashMap<Uuid, RequestDescriptor>,
}

impl RequestSource for MapSource {
    fn get(&self, id: Uuid) -> Result<Option<RequestDescriptor>> {
        Ok(self.requests.get(&id).cloned())
    }
}

/// Responds 200 "granted" when the requirement holds, 403 "denied" when it
/// does not, and counts every send.
struct SimulatedApp<F: Fn(&RequestSpec) -> bool> {
    requirement: F,
    sends: Mutex<u32>,
}

impl<F: Fn(&RequestSpec) -> bool> SimulatedApp<F> {
    fn new(requirement: F) -> Self {
        Self {
            requirement,
            sends: Mutex::new(0),
        }
    }

    fn sends(&self) -> u32 {
        *self.sends.lock().expect("sends lock")
    }
}

impl<F: Fn(&RequestSpec) -> bool> Transport for SimulatedApp<F> {
    fn send(&self, spec: &RequestSpec, _save: bool) -> Result<Option<ResponseSignature>> {
        *self.sends.lock().expect("sends lock") += 1;
        let (status, body) = if (self.requirement)(spec) {
            (200, b"granted".as_slice())
        } else {
            (403, b"denied".as_slice())
        };
        Ok(Some(ResponseSignature::from_parts(
            status,
            Some(body.len().to_string()),
            Some("text/plain".to_string()),
            None,
            body,
        )))
    }
}

/// Always fails at the transport level.
struct DeadTransport {
    sends: Mutex<u32>,
}

impl Transport for DeadTransport {
    fn send(&self, _spec: &RequestSpec, _save: bool) -> Result<Option<ResponseSignature>> {
        *self.sends.lock().expect("sends lock") += 1;
        Err(anyhow!("connection refused"))
    }
}

struct RecordingSessions {
    captured: Mutex<Option<RequestSpec>>,
    fail: bool,
}

impl RecordingSessions {
    fn new() -> Self {
        Self {
            captured: Mutex::new(None),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            captured: Mutex::new(None),
            fail: true,
        }
    }

    fn captured(&self) -> RequestSpec {
        self.captured
            .lock()
            .expect("captured lock")
            .clone()
            .expect("session host was never called")
    }
}

impl SessionHost for RecordingSessions {
    fn create_session(&self, spec: &RequestSpec) -> Result<Option<Uuid>> {
        if self.fail {
            return Err(anyhow!("replay workspace unavailable"));
        }
        *self.captured.lock().expect("captured lock") = Some(spec.clone());
        Ok(Some(Uuid::now_v7()))
    }
}

struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn event(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

// ── helpers ───────────────────────────────────────────────────────────

fn fast_config() -> MinimizationConfig {
    MinimizationConfig {
        min_delay_ms: 0,
        ..MinimizationConfig::default()
    }
}

fn headers(pairs: &[(&str, &str)]) -> IndexMap<String, Vec<String>> {
    let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
    for (name, value) in pairs {
        map.entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    map
}

fn source_with(desc: RequestDescriptor) -> (Uuid, MapSource) {
    let id = Uuid::now_v7();
    let mut requests = HashMap::new();
    requests.insert(id, desc);
    (id, MapSource { requests })
}

fn spec_query(spec: &RequestSpec) -> IndexMap<String, Vec<String>> {
    match spec.path_and_query.split_once('?') {
        Some((_, query)) => parse_urlencoded(query),
        None => IndexMap::new(),
    }
}

fn spec_header<'s>(spec: &'s RequestSpec, name: &str) -> Option<&'s str> {
    spec.headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.first())
        .map(String::as_str)
}

fn descriptor_from_spec(spec: &RequestSpec) -> RequestDescriptor {
    let (path, query) = match spec.path_and_query.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (spec.path_and_query.clone(), String::new()),
    };
    RequestDescriptor {
        method: spec.method.clone(),
        host: spec.host.clone(),
        port: spec.port,
        tls: spec.tls,
        path,
        query,
        headers: spec.headers.clone(),
        body: spec.body.clone(),
    }
}

// ── scenarios ─────────────────────────────────────────────────────────

#[test]
fn reduces_query_headers_and_cookies_to_load_bearing_set() {
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 443,
        tls: true,
        path: "/dashboard".to_string(),
        query: "token=t0&utm_source=mail&cache_bust=123".to_string(),
        headers: headers(&[
            ("Host", "app.test"),
            ("Authorization", "Bearer abc"),
            ("Accept-Language", "en"),
            ("Sec-Fetch-Site", "same-origin"),
            ("Cookie", "theme=dark; session=s1"),
            ("X-Noise", "1"),
        ]),
        body: None,
    };
    let (id, source) = source_with(desc);

    let transport = SimulatedApp::new(|spec: &RequestSpec| {
        spec_query(spec).contains_key("token")
            && spec_header(spec, "authorization") == Some("Bearer abc")
            && spec_header(spec, "cookie").is_some_and(|c| c.contains("session=s1"))
    });
    let sessions = RecordingSessions::new();

    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);
    let result = engine.minimize(id, &fast_config()).expect("minimize");

    assert!(matches!(result, MinimizeResult::Success { status: 200, .. }));

    let minimized = sessions.captured();
    assert_eq!(minimized.path_and_query, "/dashboard?token=t0");
    assert_eq!(spec_header(&minimized, "authorization"), Some("Bearer abc"));
    assert_eq!(spec_header(&minimized, "cookie"), Some("session=s1"));
    // Auto-removed and inessential headers are gone.
    assert!(spec_header(&minimized, "sec-fetch-site").is_none());
    assert!(spec_header(&minimized, "x-noise").is_none());
    assert!(spec_header(&minimized, "accept-language").is_none());
}

#[test]
fn reduces_json_body_to_load_bearing_subtree() {
    let desc = RequestDescriptor {
        method: "POST".to_string(),
        host: "api.test".to_string(),
        port: 80,
        tls: false,
        path: "/submit".to_string(),
        query: String::new(),
        headers: headers(&[
            ("Host", "api.test"),
            ("Content-Type", "application/json"),
        ]),
        body: Some(br#"{"a":1,"b":{"c":2,"d":3}}"#.to_vec()),
    };
    let (id, source) = source_with(desc);

    let transport = SimulatedApp::new(|spec: &RequestSpec| {
        let has_ct = spec_header(spec, "content-type") == Some("application/json");
        let d_survives = spec
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice::<serde_json::Value>(b).ok())
            .and_then(|doc| doc.pointer("/b/d").and_then(|v| v.as_i64()))
            == Some(3);
        has_ct && d_survives
    });
    let sessions = RecordingSessions::new();

    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);
    engine.minimize(id, &fast_config()).expect("minimize");

    let minimized = sessions.captured();
    let body: serde_json::Value =
        serde_json::from_slice(minimized.body.as_deref().expect("body kept")).expect("json body");
    assert_eq!(body, serde_json::json!({"b": {"d": 3}}));
    assert_eq!(
        spec_header(&minimized, "content-type"),
        Some("application/json")
    );
}

#[test]
fn reduces_form_body_fields() {
    let desc = RequestDescriptor {
        method: "POST".to_string(),
        host: "forms.test".to_string(),
        port: 80,
        tls: false,
        path: "/login".to_string(),
        query: String::new(),
        headers: headers(&[
            ("Host", "forms.test"),
            ("Content-Type", "application/x-www-form-urlencoded"),
        ]),
        body: Some(b"user=ada&debug=1&csrf=tok".to_vec()),
    };
    let (id, source) = source_with(desc);

    let transport = SimulatedApp::new(|spec: &RequestSpec| {
        let body = spec.body.as_deref().unwrap_or_default();
        let fields = parse_urlencoded(&String::from_utf8_lossy(body));
        fields.contains_key("csrf")
            && spec_header(spec, "content-type")
                == Some("application/x-www-form-urlencoded")
    });
    let sessions = RecordingSessions::new();

    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);
    engine.minimize(id, &fast_config()).expect("minimize");

    let minimized = sessions.captured();
    assert_eq!(minimized.body.as_deref(), Some(b"csrf=tok".as_slice()));
}

#[test]
fn minimization_is_idempotent() {
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 443,
        tls: true,
        path: "/x".to_string(),
        query: "keep=1&drop=2".to_string(),
        headers: headers(&[("Host", "app.test"), ("X-Auth", "k")]),
        body: None,
    };
    let (id, source) = source_with(desc);

    let requirement = |spec: &RequestSpec| {
        spec_query(spec).contains_key("keep") && spec_header(spec, "x-auth").is_some()
    };
    let transport = SimulatedApp::new(requirement);
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);
    engine.minimize(id, &fast_config()).expect("first run");
    let first = sessions.captured();

    // Feed the minimized request back through a fresh run.
    let (second_id, second_source) = source_with(descriptor_from_spec(&first));
    let second_transport = SimulatedApp::new(requirement);
    let second_sessions = RecordingSessions::new();
    let second_engine = MinimizeEngine::new(
        &second_source,
        &second_transport,
        &second_sessions,
        &NoopProgress,
    );
    second_engine
        .minimize(second_id, &fast_config())
        .expect("second run");
    let second = second_sessions.captured();

    assert_eq!(first.path_and_query, second.path_and_query);
    assert_eq!(first.headers, second.headers);
    assert_eq!(first.body, second.body);
}

#[test]
fn unknown_request_is_a_hard_error_with_no_sends() {
    let source = MapSource {
        requests: HashMap::new(),
    };
    let transport = SimulatedApp::new(|_: &RequestSpec| true);
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);

    let err = engine
        .minimize(Uuid::now_v7(), &fast_config())
        .expect_err("should fail");
    assert!(matches!(err, MinimizeError::RequestNotFound(_)));
    assert_eq!(transport.sends(), 0);
}

#[test]
fn baseline_failure_stops_after_retries_with_no_trials() {
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "down.test".to_string(),
        port: 80,
        tls: false,
        path: "/".to_string(),
        query: "a=1".to_string(),
        headers: headers(&[("Host", "down.test")]),
        body: None,
    };
    let (id, source) = source_with(desc);
    let transport = DeadTransport {
        sends: Mutex::new(0),
    };
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);

    let cfg = MinimizationConfig {
        min_delay_ms: 0,
        max_retries: 2,
        ..MinimizationConfig::default()
    };
    let err = engine.minimize(id, &cfg).expect_err("should fail");
    assert!(matches!(err, MinimizeError::Baseline(_)));
    // The baseline attempt plus exactly max_retries, then nothing more.
    assert_eq!(*transport.sends.lock().expect("sends lock"), 3);
}

#[test]
fn failed_trials_keep_the_element_and_continue() {
    // The endpoint requires q1; any trial without it is "denied", which
    // the oracle rejects, so q1 must survive while q2 is removed.
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 80,
        tls: false,
        path: "/".to_string(),
        query: "q1=a&q2=b".to_string(),
        headers: headers(&[("Host", "app.test")]),
        body: None,
    };
    let (id, source) = source_with(desc);
    let transport = SimulatedApp::new(|spec: &RequestSpec| spec_query(spec).contains_key("q1"));
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);

    let result = engine.minimize(id, &fast_config()).expect("minimize");
    assert!(matches!(result, MinimizeResult::Success { .. }));
    assert_eq!(sessions.captured().path_and_query, "/?q1=a");
}

#[test]
fn trial_transport_failure_keeps_the_element_under_test() {
    // The endpoint hangs (transport error) whenever q1 is missing, so the
    // q1 removal trial burns its retries and q1 is kept; q2 still goes.
    struct FlakyTransport {
        sends: Mutex<u32>,
    }

    impl Transport for FlakyTransport {
        fn send(&self, spec: &RequestSpec, _save: bool) -> Result<Option<ResponseSignature>> {
            *self.sends.lock().expect("sends lock") += 1;
            if !spec_query(spec).contains_key("q1") {
                return Err(anyhow!("read timed out"));
            }
            Ok(Some(ResponseSignature::from_parts(
                200,
                Some("2".to_string()),
                Some("text/plain".to_string()),
                None,
                b"ok",
            )))
        }
    }

    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 80,
        tls: false,
        path: "/".to_string(),
        query: "q1=a&q2=b".to_string(),
        headers: headers(&[("Host", "app.test")]),
        body: None,
    };
    let (id, source) = source_with(desc);
    let transport = FlakyTransport {
        sends: Mutex::new(0),
    };
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);

    let cfg = MinimizationConfig {
        min_delay_ms: 0,
        max_retries: 2,
        ..MinimizationConfig::default()
    };
    let result = engine.minimize(id, &cfg).expect("minimize");
    assert!(matches!(result, MinimizeResult::Success { .. }));
    assert_eq!(sessions.captured().path_and_query, "/?q1=a");
    // Baseline (1) + q1 trial with retries (3) + q2 trial (1) + final (1).
    assert_eq!(*transport.sends.lock().expect("sends lock"), 6);
}

#[test]
fn session_failure_downgrades_to_warning() {
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 80,
        tls: false,
        path: "/".to_string(),
        query: String::new(),
        headers: headers(&[("Host", "app.test")]),
        body: None,
    };
    let (id, source) = source_with(desc);
    let transport = SimulatedApp::new(|_: &RequestSpec| true);
    let sessions = RecordingSessions::failing();

    let result = whittle_engine::minimize_request(
        id,
        &fast_config(),
        &source,
        &transport,
        &sessions,
        &NoopProgress,
    )
    .expect("minimize");
    match result {
        MinimizeResult::Warning { status, message } => {
            assert_eq!(status, 200);
            assert!(message.contains("replay workspace unavailable"));
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[test]
fn disabled_stages_leave_their_dimension_untouched() {
    let desc = RequestDescriptor {
        method: "GET".to_string(),
        host: "app.test".to_string(),
        port: 80,
        tls: false,
        path: "/".to_string(),
        query: "a=1&b=2".to_string(),
        headers: headers(&[("Host", "app.test"), ("X-Noise", "1")]),
        body: None,
    };
    let (id, source) = source_with(desc);
    let transport = SimulatedApp::new(|_: &RequestSpec| true);
    let sessions = RecordingSessions::new();
    let engine = MinimizeEngine::new(&source, &transport, &sessions, &NoopProgress);

    let cfg = MinimizationConfig {
        min_delay_ms: 0,
        minimize_query: false,
        minimize_headers: false,
        ..MinimizationConfig::default()
    };
    engine.minimize(id, &cfg).expect("minimize");

    let minimized = sessions.captured();
    assert_eq!(minimized.path_and_query, "/?a=1&b=2");
    assert!(spec_header(&minimized, "x-noise").is_some());
    // Baseline and final send are the only traffic.
    assert_eq!(transport.sends(), 2);
}
