//! Transport layer for the minimization engine.
//!
//! Holds the collaborator traits the engine talks through, the trial
//! request synthesis from descriptor + reduction state, and the blocking
//! reqwest transport with the retry/timeout policy. The retry wrapper
//! [`send_with_retry`] is the engine's sole contact point with the network:
//! every trial in every reduction pass goes through it.

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use std::thread;
use std::time::Duration;
use uuid::Uuid;
use whittle_core::{
    MinimizationConfig, ReductionState, RequestDescriptor, ResponseSignature, encode_urlencoded,
};

/// One fully assembled request, ready to send.
///
/// Candidate state is not composable across passes, so every trial
/// re-synthesizes a complete spec from the immutable descriptor plus the
/// currently committed [`ReductionState`].
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub path_and_query: String,
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}{}",
            self.host, self.port, self.path_and_query
        )
    }
}

/// Build the complete trial request for the current reduction state.
pub fn synthesize(desc: &RequestDescriptor, state: &ReductionState) -> RequestSpec {
    let query = encode_urlencoded(&state.query);
    let path_and_query = if query.is_empty() {
        desc.path.clone()
    } else {
        format!("{}?{query}", desc.path)
    };
    RequestSpec {
        method: desc.method.clone(),
        host: desc.host.clone(),
        port: desc.port,
        tls: desc.tls,
        path_and_query,
        headers: state.headers.clone(),
        body: state.body_bytes(),
    }
}

/// Lookup of captured requests by id.
pub trait RequestSource {
    fn get(&self, id: Uuid) -> Result<Option<RequestDescriptor>>;
}

/// Sends one request and projects the response. `Err` is a transport
/// failure (timeout included); `Ok(None)` means the host sent the request
/// but saw no response.
pub trait Transport {
    fn send(&self, spec: &RequestSpec, save: bool) -> Result<Option<ResponseSignature>>;
}

/// Opens a replay session for the final minimized request.
pub trait SessionHost {
    fn create_session(&self, spec: &RequestSpec) -> Result<Option<Uuid>>;
}

/// Optional history recording for sends with `save` set.
pub trait HistorySink {
    fn record(&self, spec: &RequestSpec, status: u16) -> Result<()>;
}

/// Progress notifications from the engine.
pub trait ProgressSink {
    fn event(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Retry/timeout wrapper around a [`Transport`].
///
/// Sleeps `min_delay_ms` before every attempt (pacing plus backoff in one),
/// retries failed sends up to `max_retries` additional times, and
/// propagates the last error once retries are exhausted.
pub fn send_with_retry(
    transport: &dyn Transport,
    spec: &RequestSpec,
    cfg: &MinimizationConfig,
    save: bool,
) -> Result<Option<ResponseSignature>> {
    let mut last_err: Option<anyhow::Error> = None;
    let mut attempt: u32 = 0;
    loop {
        if cfg.min_delay_ms > 0 {
            thread::sleep(Duration::from_millis(cfg.min_delay_ms));
        }
        match transport.send(spec, save) {
            Ok(response) => return Ok(response),
            Err(err) => {
                last_err = Some(err);
                if attempt < cfg.max_retries {
                    attempt = attempt.saturating_add(1);
                    continue;
                }
                break;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("send failed without detailed error")))
}

/// Blocking reqwest transport.
///
/// Redirects are disabled so the oracle's `location` rule sees raw 3xx
/// responses, and no cookie jar is attached: the header reducer owns the
/// Cookie header verbatim.
pub struct HttpTransport {
    client: Client,
    history: Option<Box<dyn HistorySink>>,
}

impl HttpTransport {
    pub fn new(cfg: &MinimizationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            client,
            history: None,
        })
    }

    pub fn with_history(mut self, sink: Box<dyn HistorySink>) -> Self {
        self.history = Some(sink);
        self
    }
}

impl Transport for HttpTransport {
    fn send(&self, spec: &RequestSpec, save: bool) -> Result<Option<ResponseSignature>> {
        let method = Method::from_bytes(spec.method.as_bytes())?;
        let mut request = self.client.request(method, spec.url());
        for (name, values) in &spec.headers {
            // Host comes from the URL; Content-Length from the actual body.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();

        let signature = ResponseSignature::from_parts(
            status,
            header_string(&headers, CONTENT_LENGTH),
            header_string(&headers, CONTENT_TYPE),
            header_string(&headers, LOCATION),
            &body,
        );
        if save && let Some(sink) = &self.history {
            // Best-effort: a history write must never fail a trial.
            let _ = sink.record(spec, status);
        }
        Ok(Some(signature))
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
