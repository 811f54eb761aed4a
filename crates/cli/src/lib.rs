pub mod app;
pub mod chrome;
pub mod cli;
pub mod console;
pub mod logging;
pub mod status;
