use anyhow::{Context, Result};
use geocoder::{CountryDbWriter, Prefix, RecordSize};
use std::fs;
use std::path::PathBuf;

/// Non-empty, trimmed CSV field
fn field(record: &csv::StringRecord, index: usize) -> Option<&str> {
    record.get(index).map(str::trim).filter(|s| !s.is_empty())
}

pub fn cmd_build(
    input: PathBuf,
    output: PathBuf,
    record_size: u16,
    ipv4_aliases: bool,
    database_type: String,
    description: Option<String>,
) -> Result<()> {
    let record_size = RecordSize::from_bits(record_size)?;
    let mut writer = CountryDbWriter::new()
        .with_record_size(record_size)
        .with_ipv4_aliases(ipv4_aliases)
        .with_database_type(database_type);
    if let Some(text) = description {
        writer = writer.with_description("en", text);
    }

    let file = fs::File::open(&input)
        .with_context(|| format!("Failed to open CSV file: {}", input.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(file);

    for (row_num, result) in reader.records().enumerate() {
        let record = result.context("Failed to read CSV record")?;
        let Some(network) = field(&record, 0) else {
            continue;
        };
        // Optional header row
        if row_num == 0 && network.eq_ignore_ascii_case("network") {
            continue;
        }

        let prefix: Prefix = network
            .parse()
            .with_context(|| format!("Invalid network at row {}", row_num + 1))?;
        let country = field(&record, 1);
        let registered = field(&record, 2);
        if country.is_none() && registered.is_none() {
            anyhow::bail!("Row {} has no country code", row_num + 1);
        }

        writer
            .insert_with_registered(prefix, country, registered)
            .with_context(|| format!("Failed to insert {}", prefix))?;
    }

    let networks = writer.len();
    let bytes = writer.build().context("Failed to build database")?;
    fs::write(&output, &bytes)
        .with_context(|| format!("Failed to write database: {}", output.display()))?;

    tracing::info!(
        networks,
        bytes = bytes.len(),
        output = %output.display(),
        "database written"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "output": output.display().to_string(),
            "networks": networks,
            "bytes": bytes.len(),
        }))?
    );
    Ok(())
}
