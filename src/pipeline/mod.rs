//! The style-guide build expressed as tasks over external tools.

pub mod files;
pub mod reload;
pub mod tasks;
pub mod tools;

pub use reload::{BrowserSync, LiveReload, NoopReload};
pub use tasks::{register_pipeline, Collaborators};
pub use tools::{Placeholders, ToolCommand};
