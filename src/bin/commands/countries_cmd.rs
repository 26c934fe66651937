use anyhow::Result;
use geocoder::{GeoService, StoreHolder};
use std::sync::Arc;

use crate::cli_utils::{load_store, print_json};
use crate::GlobalOpts;

pub fn cmd_countries(opts: &GlobalOpts) -> Result<()> {
    let store = load_store(opts)?;
    let service = GeoService::new(Arc::new(StoreHolder::new(store)));
    print_json(&service.countries())
}
