use crate::MinimizeArgs;
use crate::output::{StderrSink, print_json};
use anyhow::Result;
use std::path::Path;
use uuid::Uuid;
use whittle_core::{MinimizationConfig, MinimizeResult};
use whittle_engine::MinimizeEngine;
use whittle_http::HttpTransport;
use whittle_store::CaptureStore;

pub(crate) fn run_minimize(
    workspace: &Path,
    store: &CaptureStore,
    args: &MinimizeArgs,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let id = Uuid::parse_str(&args.id)?;
    let cfg = build_config(workspace, args)?;

    let mut transport = HttpTransport::new(&cfg)?;
    if cfg.save_to_history {
        transport = transport.with_history(Box::new(store.clone()));
    }
    let sink = StderrSink::new(workspace, verbose);
    let engine = MinimizeEngine::new(store, &transport, store, &sink);

    let result = engine.minimize(id, &cfg)?;
    if json {
        return print_json(&result);
    }
    match result {
        MinimizeResult::Success { status, session_id } => {
            println!("minimized: status {status}, replay session {session_id}");
        }
        MinimizeResult::Warning { status, message } => {
            println!("minimized with warning: status {status} ({message})");
        }
    }
    Ok(())
}

fn build_config(workspace: &Path, args: &MinimizeArgs) -> Result<MinimizationConfig> {
    let mut cfg = MinimizationConfig::load(workspace)?;
    if let Some(min_delay_ms) = args.min_delay_ms {
        cfg.min_delay_ms = min_delay_ms;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        cfg.timeout_ms = timeout_ms;
    }
    if let Some(max_retries) = args.max_retries {
        cfg.max_retries = max_retries;
    }
    cfg.keep_headers.extend(args.keep_header.iter().cloned());
    cfg.auto_removed_headers
        .extend(args.auto_remove_header.iter().cloned());
    if args.skip_query {
        cfg.minimize_query = false;
    }
    if args.skip_body {
        cfg.minimize_body = false;
    }
    if args.skip_headers {
        cfg.minimize_headers = false;
    }
    if args.skip_json {
        cfg.minimize_json = false;
    }
    if args.save_to_history {
        cfg.save_to_history = true;
    }
    Ok(cfg)
}
