use anyhow::Result;
use serde_json::json;

use crate::cli_utils::{load_store, print_json};
use crate::GlobalOpts;

pub fn cmd_stats(opts: &GlobalOpts) -> Result<()> {
    let store = load_store(opts)?;
    let stats = store.stats();

    print_json(&json!({
        "database": opts.database.display().to_string(),
        "total_networks": stats.total_networks,
        "unique_countries": stats.unique_countries,
        "ipv4_networks": stats.ipv4_networks,
        "ipv6_networks": stats.ipv6_networks,
    }))
}
