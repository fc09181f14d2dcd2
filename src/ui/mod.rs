//! TUI module for the recite application.

mod app;
pub mod theme;
mod widgets;

pub use app::App;
