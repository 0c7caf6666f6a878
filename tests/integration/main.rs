mod common;

mod cli_commands;
mod cookie_interop;
mod delivery_flow;
mod retry_backoff;
mod startup_recovery;
