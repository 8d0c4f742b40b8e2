pub mod runtime;

pub use runtime::{DiscordEvent, DiscordMessageEvent, DiscordPlatform};
