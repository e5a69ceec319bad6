//! Built-in handlers.

pub mod ping;
pub mod taunt;

pub use ping::PingHandler;
pub use taunt::TauntHandler;
