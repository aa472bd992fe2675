//! CLI subcommands.

pub mod check;
pub mod run;
pub mod schema;
pub mod status;
