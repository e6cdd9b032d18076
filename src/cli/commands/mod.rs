//! CLI command implementations

pub mod clone;
pub mod init;
pub mod line;
pub mod part;
pub mod tree;
