mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use geocoder::ConflictPolicy;
use std::path::PathBuf;

use commands::{
    cmd_build, cmd_countries, cmd_ip, cmd_lookup, cmd_ranges, cmd_stats, cmd_stream, cmd_watch,
};

#[derive(Parser)]
#[command(name = "geocoder")]
#[command(
    about = "IP-to-country index over MaxMind country databases",
    long_about = "geocoder - load a MaxMind-format country database into memory and query it\n\n\
    Answers which country owns an exact network prefix, which prefixes a country owns\n\
    (whole, paginated, or streamed in chunks), and which country an address falls in.\n\n\
    Examples:\n\
      geocoder -d GeoLite2-Country.mmdb stats\n\
      geocoder lookup 10.0.0.0/8\n\
      geocoder ranges RU --page 0 --size 100\n\
      geocoder stream RU KZ --chunk-size 5000\n\
      geocoder build networks.csv -o country.mmdb --ipv4-aliases"
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Country database (MMDB) to load
    #[arg(
        short = 'd',
        long,
        env = "GEOIP_DATABASE_PATH",
        default_value = "db/RU-GeoIP-Country.mmdb",
        global = true
    )]
    pub database: PathBuf,

    /// Keep IPv4 alias networks (::ffff:0:0/96, 2001::/32, 2002::/16) as IPv6 entries
    #[arg(long, global = true)]
    pub keep_aliased: bool,

    /// Country code for networks with no country
    #[arg(long, default_value = "ZZ", global = true)]
    pub fallback_code: String,

    /// Exact-match behaviour for duplicate prefixes: last-wins, first-wins, reject
    #[arg(long, default_value = "last-wins", global = true)]
    pub on_conflict: ConflictPolicy,

    /// Enable debug logging
    #[arg(long, env = "GEOCODER_DEBUG", global = true)]
    pub debug: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the database and print store statistics
    Stats,

    /// List country codes with their range counts
    Countries,

    /// Find the country that owns exactly this prefix (exit code 1 if none)
    Lookup {
        /// Prefix in address/length form, e.g. 10.0.0.0/8
        #[arg(value_name = "CIDR")]
        cidr: String,
    },

    /// Resolve the country of one or more addresses (longest-prefix match)
    Ip {
        /// Addresses to resolve
        #[arg(value_name = "ADDR", required = true)]
        ips: Vec<String>,
    },

    /// Print the ranges of a country, whole or one page
    Ranges {
        /// ISO country code
        #[arg(value_name = "CODE")]
        code: String,

        /// Zero-based page index (requires --size)
        #[arg(long, requires = "size", allow_negative_numbers = true)]
        page: Option<i64>,

        /// Page size
        #[arg(long, allow_negative_numbers = true)]
        size: Option<i64>,
    },

    /// Stream country ranges as newline-delimited JSON chunks
    Stream {
        /// ISO country codes, emitted in this order
        #[arg(value_name = "CODE", required = true)]
        codes: Vec<String>,

        /// Ranges per chunk (default 1000, max 10000)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Build a country database from CSV rows: network,iso_code[,registered_iso_code]
    Build {
        /// Input CSV file
        #[arg(value_name = "CSV")]
        input: PathBuf,

        /// Output database file
        #[arg(short, long)]
        output: PathBuf,

        /// Record size in bits (24, 28 or 32)
        #[arg(long, default_value = "28")]
        record_size: u16,

        /// Link IPv4 alias networks to the IPv4 subtree
        #[arg(long)]
        ipv4_aliases: bool,

        /// Database type written to the metadata
        #[arg(long, default_value = "GeoIP2-Country")]
        database_type: String,

        /// English description written to the metadata
        #[arg(long)]
        description: Option<String>,
    },

    /// Load the database and reload it whenever the file changes, until Ctrl-C
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli_utils::init_tracing(&cli.global);

    match cli.command {
        Commands::Stats => cmd_stats(&cli.global),
        Commands::Countries => cmd_countries(&cli.global),
        Commands::Lookup { cidr } => cmd_lookup(&cli.global, cidr),
        Commands::Ip { ips } => cmd_ip(&cli.global, ips),
        Commands::Ranges { code, page, size } => cmd_ranges(&cli.global, code, page, size),
        Commands::Stream { codes, chunk_size } => cmd_stream(&cli.global, codes, chunk_size),
        Commands::Build {
            input,
            output,
            record_size,
            ipv4_aliases,
            database_type,
            description,
        } => cmd_build(
            input,
            output,
            record_size,
            ipv4_aliases,
            database_type,
            description,
        ),
        Commands::Watch => cmd_watch(&cli.global),
    }
}
