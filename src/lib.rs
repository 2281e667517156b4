//! # Token Renew Library
//!
//! HTTP transport decorator for OAuth2 client-credentials clients: when a
//! protected resource rejects the access token, the token is renewed once,
//! shared by every concurrent caller, and the request is retried with the same
//! body.
//!
//! Modules:
//! - `auth`: the authenticating decorator and its constructor
//! - `classify`: recognizes the invalid-access-token 401
//! - `replay`: request body capture for the single retry
//! - `renewal`: single-flight replacement of the inner transport
//! - `oauth2`: client-credentials grant and the bearer transport
//! - `transport`: transport trait, body type, request context, reqwest adapter
//! - `config`: YAML configuration of the binary

pub mod auth;
pub mod classify;
pub mod config;
pub mod error;
pub mod helpers;
pub mod oauth2;
pub mod observability;
pub mod renewal;
pub mod replay;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::auth::{new_authenticated_transport, Authenticator};
pub use crate::error::{Error, Result};
pub use crate::oauth2::{AuthStyle, ClientCredentials, Token};
pub use crate::transport::{Body, ReqwestTransport, RequestContext, Transport};
