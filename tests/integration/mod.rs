//! Integration tests for qmap

mod config_loading;
mod generation_run;
mod json_repair;
mod test_utils;
