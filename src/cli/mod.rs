pub mod args;
pub mod commands;

pub use args::{Args, Command, SendArgs};
pub use commands::run_command;
