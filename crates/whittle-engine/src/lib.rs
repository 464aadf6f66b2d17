//! The minimization engine.
//!
//! Sequences the reduction passes over a shared "current best" request
//! state: baseline capture, query reduction, form body reduction, header
//! reduction, JSON structural reduction, final send. Each stage mutates
//! only its own dimension; every trial re-synthesizes a complete request
//! and goes through the transport retry wrapper. Exactly one trial is in
//! flight at any time: the sequential-commit invariant every pass relies
//! on.

use uuid::Uuid;
use whittle_core::{
    BodyState, MinimizationConfig, MinimizeError, MinimizePhase, MinimizeResult, ReductionState,
    content_type_is_form, is_valid_phase_transition, parse_urlencoded,
};
use whittle_http::{ProgressSink, RequestSource, SessionHost, Transport, send_with_retry, synthesize};

pub mod form;
pub mod headers;
pub mod json;
pub mod oracle;
pub mod query;

/// One minimization run's collaborators, borrowed for the duration of the
/// run. The engine owns no state between runs.
pub struct MinimizeEngine<'a> {
    source: &'a dyn RequestSource,
    transport: &'a dyn Transport,
    sessions: &'a dyn SessionHost,
    progress: &'a dyn ProgressSink,
}

impl<'a> MinimizeEngine<'a> {
    pub fn new(
        source: &'a dyn RequestSource,
        transport: &'a dyn Transport,
        sessions: &'a dyn SessionHost,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            source,
            transport,
            sessions,
            progress,
        }
    }

    /// Minimize the captured request with the given id.
    ///
    /// Hard errors: unknown id, no baseline response, final-send transport
    /// failure. A failed trial mid-run only keeps the element under test;
    /// a failed replay-session creation downgrades the outcome to
    /// [`MinimizeResult::Warning`].
    pub fn minimize(
        &self,
        id: Uuid,
        cfg: &MinimizationConfig,
    ) -> Result<MinimizeResult, MinimizeError> {
        let mut phase = MinimizePhase::Init;

        let desc = match self.source.get(id) {
            Ok(Some(desc)) => desc,
            Ok(None) => {
                advance(&mut phase, MinimizePhase::Error);
                return Err(MinimizeError::RequestNotFound(id));
            }
            Err(err) => {
                advance(&mut phase, MinimizePhase::Error);
                return Err(MinimizeError::Internal(err));
            }
        };

        let mut state = ReductionState::from_descriptor(&desc);

        // Baseline: any response, any status, establishes the equivalence
        // target.
        let baseline_spec = synthesize(&desc, &state);
        let baseline =
            match send_with_retry(self.transport, &baseline_spec, cfg, cfg.save_to_history) {
                Ok(Some(signature)) => signature,
                Ok(None) => {
                    advance(&mut phase, MinimizePhase::Error);
                    return Err(MinimizeError::Baseline(
                        "no response to the original request".to_string(),
                    ));
                }
                Err(err) => {
                    advance(&mut phase, MinimizePhase::Error);
                    return Err(MinimizeError::Baseline(err.to_string()));
                }
            };
        advance(&mut phase, MinimizePhase::BaselineSent);
        self.progress
            .event(&format!("baseline captured: status {}", baseline.status));

        let mut check = |candidate: &ReductionState| -> bool {
            let spec = synthesize(&desc, candidate);
            match send_with_retry(self.transport, &spec, cfg, cfg.save_to_history) {
                Ok(Some(signature)) => oracle::equivalent(&baseline, &signature),
                Ok(None) => false,
                Err(err) => {
                    self.progress
                        .warn(&format!("trial failed after retries, keeping element: {err}"));
                    false
                }
            }
        };

        if cfg.minimize_query && !state.query.is_empty() {
            let before = state.query.len();
            query::reduce_query(&mut state, &mut check);
            self.progress.event(&format!(
                "query: kept {} of {} parameters",
                state.query.len(),
                before
            ));
        }
        advance(&mut phase, MinimizePhase::QueryReduced);

        let form_body = cfg.minimize_body
            && desc.content_type().is_some_and(content_type_is_form)
            && state.body.is_some();
        if form_body && let Some(bytes) = state.body_bytes() {
            let fields = parse_urlencoded(&String::from_utf8_lossy(&bytes));
            if !fields.is_empty() {
                let before = fields.len();
                state.body = Some(BodyState::Form(fields));
                form::reduce_form(&mut state, &mut check);
                if let Some(BodyState::Form(kept)) = &state.body {
                    self.progress.event(&format!(
                        "body: kept {} of {before} form fields",
                        kept.len()
                    ));
                }
            }
        }
        advance(&mut phase, MinimizePhase::BodyReduced);

        if cfg.minimize_headers {
            let policy = headers::HeaderPolicy::from_config(cfg);
            let before = state.headers.len();
            headers::reduce_headers(&mut state, &policy, &mut check);
            self.progress.event(&format!(
                "headers: kept {} of {before}",
                state.headers.len()
            ));
        }
        advance(&mut phase, MinimizePhase::HeadersReduced);

        if cfg.minimize_json && let Some(bytes) = state.body_bytes() {
            let base = state.clone();
            let mut body_check = |candidate_body: &[u8]| -> bool {
                let mut candidate = base.clone();
                candidate.body = Some(BodyState::Raw(candidate_body.to_vec()));
                check(&candidate)
            };
            match json::reduce_json(&bytes, &mut body_check) {
                Ok(Some(reduced)) => {
                    self.progress.event(&format!(
                        "json: body reduced from {} to {} bytes",
                        bytes.len(),
                        reduced.len()
                    ));
                    state.body = Some(BodyState::Raw(reduced));
                }
                Ok(None) => {}
                Err(err) => {
                    // Fail-safe: keep the body from the previous stage.
                    self.progress
                        .warn(&format!("json minimization abandoned: {err}"));
                }
            }
        }
        advance(&mut phase, MinimizePhase::JsonReduced);

        let final_spec = synthesize(&desc, &state);
        let final_signature =
            match send_with_retry(self.transport, &final_spec, cfg, cfg.save_to_history) {
                Ok(Some(signature)) => signature,
                Ok(None) => {
                    advance(&mut phase, MinimizePhase::Error);
                    return Err(MinimizeError::FinalSend(
                        "no response to the minimized request".to_string(),
                    ));
                }
                Err(err) => {
                    advance(&mut phase, MinimizePhase::Error);
                    return Err(MinimizeError::FinalSend(err.to_string()));
                }
            };
        advance(&mut phase, MinimizePhase::FinalSent);

        let result = match self.sessions.create_session(&final_spec) {
            Ok(Some(session_id)) => MinimizeResult::Success {
                status: final_signature.status,
                session_id,
            },
            Ok(None) => MinimizeResult::Warning {
                status: final_signature.status,
                message: "replay session was not created".to_string(),
            },
            Err(err) => {
                self.progress
                    .warn(&format!("replay session creation failed: {err}"));
                MinimizeResult::Warning {
                    status: final_signature.status,
                    message: err.to_string(),
                }
            }
        };
        advance(&mut phase, MinimizePhase::Done);
        Ok(result)
    }
}

/// Convenience entry point: one minimization run with explicit
/// collaborators.
pub fn minimize_request(
    id: Uuid,
    cfg: &MinimizationConfig,
    source: &dyn RequestSource,
    transport: &dyn Transport,
    sessions: &dyn SessionHost,
    progress: &dyn ProgressSink,
) -> Result<MinimizeResult, MinimizeError> {
    MinimizeEngine::new(source, transport, sessions, progress).minimize(id, cfg)
}

fn advance(phase: &mut MinimizePhase, to: MinimizePhase) {
    debug_assert!(
        is_valid_phase_transition(phase, &to),
        "invalid phase transition {phase:?} -> {to:?}"
    );
    *phase = to;
}
