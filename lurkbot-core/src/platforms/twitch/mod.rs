pub mod auth;
pub mod client;

pub use auth::AppTokenManager;
pub use client::TwitchHelixClient;
