#![allow(dead_code)]

pub mod config;
pub mod progress_ui;
pub mod report_error;
pub mod util;
