pub mod build_cmd;
pub mod countries_cmd;
pub mod ip_cmd;
pub mod lookup_cmd;
pub mod ranges_cmd;
pub mod stats_cmd;
pub mod stream_cmd;
pub mod watch_cmd;

pub use build_cmd::cmd_build;
pub use countries_cmd::cmd_countries;
pub use ip_cmd::cmd_ip;
pub use lookup_cmd::cmd_lookup;
pub use ranges_cmd::cmd_ranges;
pub use stats_cmd::cmd_stats;
pub use stream_cmd::cmd_stream;
pub use watch_cmd::cmd_watch;
