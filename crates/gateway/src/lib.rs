pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod service;
pub mod state;
