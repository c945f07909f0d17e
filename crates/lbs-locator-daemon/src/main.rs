//! lbs-locator daemon — entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use lbs_locator_daemon::config::{build_config, Overrides};
use lbs_locator_daemon::service::LocatorService;
use lbs_locator_daemon::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "lbs-locator-daemon",
    about = "Online cell/Wi-Fi geolocation daemon — observations on stdin, fixes on stdout",
    version
)]
struct Cli {
    /// Path to the lookup key file.
    #[arg(short, long)]
    key: Option<String>,

    /// Path to the persistent state file.
    #[arg(short, long)]
    state: Option<String>,

    /// Path to the fallback-preference INI file.
    #[arg(short, long)]
    config: Option<String>,

    /// Lookup service endpoint URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Keep state in memory instead of the state file.
    #[arg(long)]
    ephemeral: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read observations from stdin and stream events to stdout (default).
    Serve,

    /// Print resolved configuration and key-cooldown state as JSON.
    Status,

    /// Remove a recorded key rejection so lookups resume immediately.
    ClearCooldown,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   lbs-locator-daemon completions bash > ~/.local/share/bash-completion/completions/lbs-locator-daemon
    ///   lbs-locator-daemon completions zsh > ~/.zfunc/_lbs-locator-daemon
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        key: cli.key,
        state: cli.state,
        config: cli.config,
        endpoint: cli.endpoint,
    };

    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::Completions { shell } = command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "lbs-locator-daemon", &mut std::io::stdout());
        return Ok(());
    }

    let config = build_config(&overrides);
    let service = if cli.ephemeral {
        LocatorService::ephemeral(config)
    } else {
        LocatorService::open(config)
    };

    match command {
        Commands::Serve => {
            let (handle, task) = service.spawn()?;
            let transport = StdioTransport::new(handle);
            transport.run().await?;
            drop(transport);
            task.await?;
        }

        Commands::Status => {
            let report = service.status_report(chrono::Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::ClearCooldown => {
            if service.clear_cooldown()? {
                println!("Key failure marker cleared");
            } else {
                println!("No key failure recorded");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}
