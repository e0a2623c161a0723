//! reaper cleanup handler library.
//!
//! This crate primarily ships the `cleanup-handler` binary, but the
//! pieces are exposed as a library so integration tests can drive the
//! handler against mock providers and a mock runtime API.

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod noderes;
pub mod profiles;
pub mod providers;
pub mod response;
pub mod runtime;
pub mod waiter;

pub use config::{CleanupMode, Config};
pub use error::{CleanupError, InvocationError};
pub use event::{CfnEvent, CfnResponse, InvocationContext, RequestType, ResponseStatus};
pub use providers::{LiveProviderFactory, ProviderFactory, Providers};
pub use response::CfnResponder;
pub use runtime::RuntimeClient;
