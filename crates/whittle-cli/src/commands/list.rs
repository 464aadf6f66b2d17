use crate::output::print_json;
use anyhow::Result;
use whittle_store::CaptureStore;

pub(crate) fn run_list(store: &CaptureStore, json: bool) -> Result<()> {
    let requests = store.list_requests()?;
    if json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("no captured requests; add one with `whittle import <file>`");
        return Ok(());
    }
    for meta in requests {
        println!(
            "{}  {:7} {}{}  {}",
            meta.id, meta.method, meta.host, meta.path, meta.captured_at
        );
    }
    Ok(())
}
