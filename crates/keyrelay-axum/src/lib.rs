//! Administrative HTTP API for the keyrelay dynamic channel runtime.
//!
//! Exposes catalogue CRUD, validation, enable/disable, hot-reload, and
//! channel-type discovery. Every response uses the `{success, data|error}`
//! envelope; all endpoints except `/health` sit behind bearer-token auth
//! when a token is configured.

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;

pub use bootstrap::{bootstrap, start_server, ServerConfig};
pub use error::HttpError;
pub use routes::create_router;
pub use state::{AppState, AxumContext};
