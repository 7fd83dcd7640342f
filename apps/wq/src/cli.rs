//! Argument parsing for the `wq` binary.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Role {
    Worker,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum AdminCmd {
    Stats,
    StatsKeys,
    Peek,
    PurgeDlq,
    PurgeAll,
    Bench,
}

#[derive(Debug, Parser)]
#[command(name = "wq", about = "Distributed work queue: worker runtime and admin surface")]
pub struct Cli {
    /// Whether this process runs the worker engine or the admin surface.
    #[arg(long, value_enum)]
    pub role: Role,

    /// TOML configuration file. Environment variables take precedence over
    /// any key also present here.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// One-shot admin operation. If omitted under `--role=admin`, the
    /// process instead binds the HTTP admin surface and runs until shutdown.
    #[arg(long, value_enum)]
    pub admin_cmd: Option<AdminCmd>,

    #[arg(long)]
    pub peek_queue: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub peek_n: i64,

    #[arg(long, default_value_t = 100)]
    pub bench_count: u64,

    #[arg(long, default_value_t = 50.0)]
    pub bench_rate: f64,

    #[arg(long, default_value = "default")]
    pub bench_priority: String,

    #[arg(long, default_value_t = 30)]
    pub bench_timeout: u64,

    /// Confirms a destructive admin operation (`purge-all`).
    #[arg(long)]
    pub yes: bool,

    /// Port the HTTP health/admin/metrics server binds to.
    #[arg(long, default_value_t = 8080)]
    pub http_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_role() {
        let cli = Cli::parse_from(["wq", "--role", "worker"]);
        assert_eq!(cli.role, Role::Worker);
        assert!(cli.admin_cmd.is_none());
    }

    #[test]
    fn parses_admin_bench_command() {
        let cli = Cli::parse_from([
            "wq",
            "--role",
            "admin",
            "--admin-cmd",
            "bench",
            "--bench-count",
            "500",
        ]);
        assert_eq!(cli.role, Role::Admin);
        assert_eq!(cli.admin_cmd, Some(AdminCmd::Bench));
        assert_eq!(cli.bench_count, 500);
    }
}
