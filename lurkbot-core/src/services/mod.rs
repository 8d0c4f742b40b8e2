pub mod command_service;
pub mod notification;

pub use command_service::CommandService;
