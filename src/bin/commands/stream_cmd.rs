use anyhow::{Context, Result};
use std::io::{self, BufWriter, Write};

use crate::cli_utils::load_store;
use crate::GlobalOpts;

pub fn cmd_stream(opts: &GlobalOpts, codes: Vec<String>, chunk_size: Option<usize>) -> Result<()> {
    let store = load_store(opts)?;
    let stream = store
        .stream_ranges(&codes, chunk_size)
        .context("Failed to start range stream")?;
    tracing::debug!(chunk_size = stream.chunk_size(), "streaming ranges");

    // One JSON document per line; each chunk is written before the next is built
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for chunk in stream {
        serde_json::to_writer(&mut out, &chunk)?;
        out.write_all(b"\n")?;
        if chunk.is_last() {
            out.flush()?;
        }
    }
    out.flush()?;
    Ok(())
}
