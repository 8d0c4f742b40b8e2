pub mod subscription;
pub mod twitch;

pub use subscription::{GuildConfig, NotificationEvent, RepositoryStats, StreamerSub};
pub use twitch::{BulkStreamLookup, StreamObservation, StreamSnapshot, TwitchUser};
