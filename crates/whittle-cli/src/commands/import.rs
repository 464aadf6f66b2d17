use crate::ImportArgs;
use crate::httptext::{ImportOverrides, parse_raw_request};
use crate::output::print_json;
use anyhow::Result;
use serde_json::json;
use std::fs;
use whittle_store::CaptureStore;

pub(crate) fn run_import(store: &CaptureStore, args: &ImportArgs, json: bool) -> Result<()> {
    let raw = fs::read(&args.file)?;
    let desc = parse_raw_request(
        &raw,
        &ImportOverrides {
            host: args.host.clone(),
            port: args.port,
            tls: args.tls,
        },
    )?;
    let id = store.insert_request(&desc)?;

    if json {
        print_json(&json!({
            "id": id,
            "method": desc.method,
            "host": desc.host,
            "path": desc.path,
        }))?;
    } else {
        println!(
            "imported {} {}{} as {id}",
            desc.method,
            desc.host,
            desc.path
        );
    }
    Ok(())
}
