//! Debug Adapter Protocol back end for magic-api scripts.
//!
//! This crate provides:
//! - A DAP server that speaks the VS Code Debug Adapter Protocol over stdio or TCP.
//! - A breakpoint registry keyed by normalized script paths, with lines translated
//!   between client and instrumented coordinates.
//! - An execution bridge that runs a compiled script on its own thread and parks it at
//!   breakpoints until the client resumes it.

pub mod breakpoints;
pub mod bridge;
pub mod dap;
pub mod error;
pub mod format;
pub mod hardening;
pub mod outbound;
pub mod output;
pub mod path;
pub mod rendezvous;
pub mod server;
pub mod session;
pub mod variables;

pub use crate::bridge::{DebugContext, PauseDecision, PauseHandler};
pub use crate::error::{DebugError, DebugResult};
pub use crate::session::{Backend, Session, SessionState};
