//! Configuration sources, lowest precedence first: global file, then workspace files.

pub mod global_file;
pub mod workspace_file;
