pub mod stream_watch;

pub use stream_watch::{LiveKey, LiveSetTracker, StreamWatcher, spawn_stream_watch_task};
