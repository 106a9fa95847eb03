//! CLI command implementations

pub mod config;
pub mod export;
pub mod inspect;

pub use config::execute as config;
pub use export::execute as export;
pub use inspect::execute as inspect;
