pub mod commands;
pub mod config;
pub mod data;
pub mod enforcement;
pub mod handlers;
pub mod logging;

pub const BOT_NAME: &str = "blacklist_warden";
pub const COMMAND_TARGET: &str = "blacklist_warden::command";
pub const ERROR_TARGET: &str = "blacklist_warden::error";
pub const EVENT_TARGET: &str = "blacklist_warden::handlers";
pub const ENFORCEMENT_TARGET: &str = "blacklist_warden::enforcement";
pub const CONSOLE_TARGET: &str = "blacklist_warden";

pub use config::{ConfigWatcher, WardenConfig};
pub use data::{Data, DataInner};
pub use enforcement::Warden;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
