//! Command-line surface (§2 "Driver"): a thin `clap` layer over
//! `scheduler_shared::SchedulerConfig::load`, following the teacher's
//! `Cli`/`#[command(...)]` derive style in `src/main.rs`.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mesh-scheduler")]
#[command(about = "Two-tier distributed function scheduler")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file. Without one, defaults apply,
    /// still subject to `MESH_SCHED_*` environment overrides.
    #[arg(short, long, env = "MESH_SCHED_CONFIG")]
    pub config: Option<String>,

    /// This node's id, as a UUID. Overrides the config file and
    /// `MESH_SCHED_NODE_ID`. A fresh random id is generated if omitted.
    #[arg(long, env = "MESH_SCHED_NODE_ID")]
    pub node_id: Option<String>,

    /// Log level/filter passed to `tracing_subscriber::EnvFilter`, e.g.
    /// `info` or `mesh_scheduler=debug,schedule_queue=trace`. Overrides
    /// the config file and `RUST_LOG`.
    #[arg(long)]
    pub log_level: Option<String>,
}
