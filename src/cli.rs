use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use deploykit::Datastore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netpush")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Push rendered configuration to a fleet of NETCONF devices",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Lock, push, commit and unlock every device in the inventory
    Deploy(DeployArgs),

    /// Print the configuration rendered for one device (nothing is sent)
    Render {
        /// Device hostname from the inventory
        hostname: String,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// List inventory devices and their host vars
    Inventory {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory (inventory.toml, host_vars/, templates/)
    #[arg(long, env = "NETPUSH_PROJECT_DIR", default_value = ".")]
    pub project: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Only deploy to these devices (comma-separated hostnames)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Devices in flight at once (0 = all at once)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Datastore to lock and edit (candidate, running, startup)
    #[arg(long)]
    pub datastore: Option<Datastore>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Login user
    #[arg(long, env = "NETPUSH_USERNAME", default_value = "")]
    pub username: String,

    /// Login password (prefer the environment variable)
    #[arg(long, env = "NETPUSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}
