//! Terminal output helpers
//!
//! Uses `cliclack` log framing in interactive terminals and falls back to
//! plain tagged lines when output is piped or running in CI.

mod context;
mod output;

pub use context::UiContext;
pub use output::{key_value, section, step_ok_detail, step_warn_hint};
