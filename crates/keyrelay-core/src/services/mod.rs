//! Core services.

pub mod script_service;

pub use script_service::ScriptService;
