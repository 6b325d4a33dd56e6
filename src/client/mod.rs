mod handlers;
pub mod screens;
pub mod tui;

pub use tui::ReplicationUI;
