mod config_commands;
mod export_commands;
mod serve;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    rollcall_config::RollcallConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall: contact registration and referral")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery in ./ and ~/.config/rollcall/).
    #[arg(long, global = true, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default when no subcommand is provided).
    Serve,
    /// Print every exportable contact to stdout.
    Export {
        #[arg(long, value_enum, default_value_t = export_commands::ExportFormat::Vcf)]
        format: export_commands::ExportFormat,
    },
    /// Print an Argon2 hash to use as `admin.password`.
    HashPassword { password: String },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the explicit config file, or discover one. Environment overrides
/// apply either way.
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RollcallConfig> {
    let Some(path) = path else {
        return Ok(rollcall_config::discover_and_load());
    };
    let mut config = rollcall_config::load_config(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    rollcall_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "rollcall starting");
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(bind) = cli.bind {
                config.server.bind = bind;
            }
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            serve::run(config).await
        },
        Some(Commands::Export { format }) => {
            let config = load_config(cli.config.as_ref())?;
            export_commands::export(&config, format).await
        },
        Some(Commands::HashPassword { password }) => {
            println!("{}", rollcall_gateway::auth::hash_password(&password)?);
            Ok(())
        },
        Some(Commands::Config { action }) => {
            let config = load_config(cli.config.as_ref())?;
            config_commands::handle_config(action, &config, cli.config.as_deref())
        },
    }
}
