use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "webheal")]
#[command(version, about = "Webheal - self-healing browser workflow runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow with self-healing retries
    Run(RunArgs),

    /// List available workflow templates
    Templates,

    /// Check browser runtime prerequisites (Node.js + Playwright)
    Probe,
}

#[derive(Args)]
pub struct RunArgs {
    /// Workflow type (login, network_hierarchy)
    pub workflow: String,

    /// Target controller URL
    #[arg(long, env = "WEBHEAL_URL")]
    pub url: String,

    /// Login username
    #[arg(long, env = "WEBHEAL_USERNAME")]
    pub username: String,

    /// Login password
    #[arg(long, env = "WEBHEAL_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Extra workflow parameters as key=value (repeatable)
    #[arg(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// Run the browser headless (use --headless=false for headed)
    #[arg(long, default_value_t = true)]
    pub headless: bool,

    /// Session ID prefix (defaults to a generated one)
    #[arg(long)]
    pub session: Option<String>,
}
