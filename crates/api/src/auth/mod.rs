//! Caller identity
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the verified user id in `X-User-Id`.

pub mod middleware;
#[cfg(test)]
mod middleware_tests;

pub use middleware::{
    optional_auth, require_auth, AuthError, AuthUser, Viewer, USER_EMAIL_HEADER, USER_ID_HEADER,
};
