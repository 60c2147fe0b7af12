//! Kontext CLI - publish local directories as incremental context images.

pub mod commands;
pub mod logging;
pub mod output;
