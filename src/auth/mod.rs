//! Authentication and token lifecycle engine.
//!
//! Leaf components (`password`, `token`, `csrf`, `rate_limit`,
//! `service_token`, `roles`) are pure or process-local. The flows
//! (`authenticator`, `refresh`, `registration`, `verification`, `invite`,
//! `reset`, `bootstrap`) combine them with the [`crate::store::Store`] and the
//! [`crate::notify::Dispatcher`] held in [`AuthState`].

pub mod authenticator;
pub mod bootstrap;
pub mod csrf;
pub mod error;
pub mod invite;
pub mod password;
pub mod rate_limit;
pub mod refresh;
pub mod registration;
pub mod reset;
pub mod roles;
pub mod service_token;
pub mod state;
pub mod token;
pub mod validation;
pub mod verification;

pub use error::{AuthError, AuthResult, ErrorKind};
pub use refresh::Session;
pub use state::{AuthConfig, AuthState};
