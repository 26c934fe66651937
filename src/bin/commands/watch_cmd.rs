use anyhow::{Context, Result};
use geocoder::{Component, DatabaseWatcher, Graph, Runner};
use std::sync::Arc;

use crate::cli_utils::{interrupt_token, load_options, open_holder};
use crate::GlobalOpts;

pub fn cmd_watch(opts: &GlobalOpts) -> Result<()> {
    // Ctrl-C cancels the initial load and then shuts the runner down
    let interrupt = interrupt_token()?;
    let holder = open_holder(opts, &interrupt)?;
    let holder = Arc::new(holder.on_reload(|event| {
        if event.success {
            tracing::info!(generation = event.generation, "database reloaded");
        }
    }));

    let stats = holder.snapshot().stats();
    tracing::info!(
        total_networks = stats.total_networks,
        unique_countries = stats.unique_countries,
        "serving database"
    );

    let watcher: Arc<dyn Component> = Arc::new(DatabaseWatcher::new(
        &opts.database,
        Arc::clone(&holder),
        load_options(opts),
    ));
    let graph = Graph::build(vec![watcher]).context("Invalid component graph")?;

    Runner::new()
        .run(&graph, &interrupt)
        .context("Watcher stopped with an error")?;
    Ok(())
}
