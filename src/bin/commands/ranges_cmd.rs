use anyhow::{Context, Result};
use serde_json::json;

use crate::cli_utils::{load_store, print_json};
use crate::GlobalOpts;

pub fn cmd_ranges(opts: &GlobalOpts, code: String, page: Option<i64>, size: Option<i64>) -> Result<()> {
    let store = load_store(opts)?;

    match size {
        Some(size) => {
            let page = store
                .paginate(&code, page.unwrap_or(0), size)
                .with_context(|| format!("Failed to page ranges for {}", code))?;
            print_json(&page)
        }
        None => {
            let ranges = store
                .ranges_view(&code)
                .with_context(|| format!("Failed to list ranges for {}", code))?;
            print_json(&json!({
                "iso_code": geocoder::normalize_iso(&code),
                "total_elements": ranges.len(),
                "networks": ranges,
            }))
        }
    }
}
