//! CLI argument definitions.

use clap::{Parser, Subcommand};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "mindful")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Chat service root URL (overrides config and MINDFUL_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Wait for complete answers instead of streaming them
    #[arg(long, global = true)]
    pub no_stream: bool,

    /// Enable verbose logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(url) = &self.base_url {
            config.base_url.clone_from(url);
        }
        if self.no_stream {
            config.streaming = false;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question and print the answer
    Ask {
        /// The question to send
        question: String,

        /// Print the final reply as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigSubcommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigSubcommands {
    /// Initialize a new config file
    Init,
    /// Print config file location
    Where,
    /// Print the effective configuration as TOML
    Show,
}
