use anyhow::{Context, Result};
use geocoder::GeoService;
use std::sync::Arc;

use crate::cli_utils::{interrupt_token, open_holder, print_json};
use crate::GlobalOpts;

pub fn cmd_ip(opts: &GlobalOpts, ips: Vec<String>) -> Result<()> {
    let cancel = interrupt_token()?;
    let holder = open_holder(opts, &cancel)?;
    let service = GeoService::new(Arc::new(holder)).with_fallback_code(&opts.fallback_code);

    let results = service.ip_data(&ips).context("IP lookup failed")?;
    print_json(&results)
}
