mod args;
mod chat;
mod render;

pub use args::{Cli, Commands, ConfigSubcommands};
pub use chat::{run_ask, run_repl, run_turn};
pub use render::{TurnRenderer, write_intro};
