pub mod authenticator;

pub use authenticator::{new_authenticated_transport, Authenticator};
