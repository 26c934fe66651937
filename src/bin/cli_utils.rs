use anyhow::{Context, Result};
use geocoder::{CancelToken, LoadOptions, Store, StoreHolder};
use serde::Serialize;

use crate::GlobalOpts;

/// Install the tracing subscriber on stderr
///
/// `RUST_LOG` is honoured; `--debug`/`-v` raise the default level.
pub fn init_tracing(opts: &GlobalOpts) {
    let level = match (opts.debug, opts.verbose) {
        (_, v) if v >= 2 => "trace",
        (true, _) | (_, 1) => "debug",
        _ => "info",
    };

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = format!("geocoder={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn load_options(opts: &GlobalOpts) -> LoadOptions {
    LoadOptions::new()
        .with_skip_aliased(!opts.keep_aliased)
        .with_fallback_code(opts.fallback_code.clone())
        .with_conflict_policy(opts.on_conflict)
}

/// Cancellation token tripped by Ctrl-C
pub fn interrupt_token() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n[INFO] Shutting down...");
        handler_token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(token)
}

/// Load the configured database into a store
pub fn load_store(opts: &GlobalOpts) -> Result<Store> {
    let cancel = interrupt_token()?;
    geocoder::load_file(&opts.database, &load_options(opts), &cancel)
        .with_context(|| format!("Failed to load database: {}", opts.database.display()))
}

/// Load the configured database into a holder that keeps the reader
pub fn open_holder(opts: &GlobalOpts, cancel: &CancelToken) -> Result<StoreHolder> {
    StoreHolder::open(&opts.database, &load_options(opts), cancel)
        .with_context(|| format!("Failed to load database: {}", opts.database.display()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
