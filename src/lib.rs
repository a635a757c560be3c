#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod commands;
pub mod engine;
pub mod epub;
pub mod extract;
pub mod library;
pub mod logging;
pub mod model;
pub mod openai;
pub mod orchestrator;
pub mod parallel;
pub mod reader;
pub mod reference;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;
