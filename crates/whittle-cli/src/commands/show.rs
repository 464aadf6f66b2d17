use crate::ShowArgs;
use crate::httptext::format_spec;
use anyhow::{Result, anyhow};
use uuid::Uuid;
use whittle_core::ReductionState;
use whittle_http::synthesize;
use whittle_store::CaptureStore;

pub(crate) fn run_show(store: &CaptureStore, args: &ShowArgs) -> Result<()> {
    let id = Uuid::parse_str(&args.id)?;
    let spec = if args.session {
        store
            .get_session(id)?
            .ok_or_else(|| anyhow!("replay session {id} not found"))?
    } else {
        let desc = store
            .get_request(id)?
            .ok_or_else(|| anyhow!("request {id} not found"))?;
        synthesize(&desc, &ReductionState::from_descriptor(&desc))
    };
    print!("{}", format_spec(&spec));
    Ok(())
}
