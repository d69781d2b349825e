use std::sync::Arc;

use clap::Parser;

use mindful::cli::{self, Cli, Commands, ConfigSubcommands};
use mindful::config::AppConfig;
use mindful::logging;
use mindful::session::ChatSession;
use mindful::transport::HttpTransport;
use mindful::Result;

fn run_config_command(command: &ConfigSubcommands, cli: &Cli) -> Result<()> {
    match command {
        ConfigSubcommands::Init => match AppConfig::init_default() {
            Ok(path) => {
                println!("✓ Created config file at {}", path.display());
            }
            Err(e) => {
                eprintln!("✗ Failed to create config: {e}");
            }
        },
        ConfigSubcommands::Where => match AppConfig::get_config_path() {
            Some(path) => println!("{}", path.display()),
            None => eprintln!("✗ Could not determine config path"),
        },
        ConfigSubcommands::Show => {
            let mut config = AppConfig::load();
            cli.apply_to(&mut config);
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

fn create_session(config: &AppConfig) -> Result<ChatSession> {
    let transport = HttpTransport::new(config.http_config())?;
    Ok(ChatSession::with_config(
        Arc::new(transport),
        config.session_config(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose);

    let question = match &cli.command {
        Some(Commands::Config { command }) => return run_config_command(command, &cli),
        Some(Commands::Ask { question, json }) => Some((question.as_str(), *json)),
        None => None,
    };

    if let Some(path) = logging::log_file_path() {
        eprintln!("Debug log: {}", path.display());
    }

    let mut config = AppConfig::load();
    cli.apply_to(&mut config);

    let session = create_session(&config)?;
    tracing::info!(
        session_id = %session.session_id(),
        base_url = %config.base_url,
        streaming = config.streaming,
        "Session started"
    );

    match question {
        Some((question, json)) => cli::run_ask(&session, question, json).await?,
        None => cli::run_repl(&session).await?,
    }

    Ok(())
}
