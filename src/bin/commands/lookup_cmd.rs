use anyhow::Result;
use geocoder::GeoError;
use serde_json::json;

use crate::cli_utils::{load_store, print_json};
use crate::GlobalOpts;

pub fn cmd_lookup(opts: &GlobalOpts, cidr: String) -> Result<()> {
    let store = load_store(opts)?;

    match store.lookup_exact(&cidr) {
        Ok(code) => print_json(&json!({
            "network": cidr.trim().parse::<geocoder::Prefix>()?,
            "iso_code": code,
        })),
        Err(GeoError::NotFound(msg)) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
