pub mod catalog;
pub mod config;
mod depfile;
mod discover;
pub mod engine;
pub mod error;
pub mod fs;
pub mod graph;
mod oracle;
pub mod process;
pub mod progress;
pub mod run;
mod scanner;
mod scheduler;
pub mod step;
pub mod template;
