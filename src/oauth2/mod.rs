//! Client-credentials grant: configuration, token, token endpoint exchange and
//! the bearer transport that caches the token it obtained.

pub mod bearer;
pub mod credentials;
pub mod token;
pub mod token_source;

pub use bearer::BearerTransport;
pub use credentials::{AuthStyle, ClientCredentials, ClientCredentialsBuilder, INVALID_ACCESS_TOKEN};
pub use token::Token;
pub use token_source::fetch_token;
