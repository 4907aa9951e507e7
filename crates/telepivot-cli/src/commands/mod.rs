//! CLI command implementations

pub mod dump;
pub mod init;
pub mod run;
pub mod validate;
