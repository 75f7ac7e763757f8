//! Bearer credentials: expiry decoding, providers and the shared cache.
//!
//! The identity exchange itself lives behind [`CredentialProvider`]; this
//! module only decides *when* to ask for a token and makes sure concurrent
//! callers share one request.

mod cache;
mod jwt;
mod provider;

pub use cache::{AuthSettings, Credential, CredentialCache};
pub use jwt::decode_expiry;
pub use provider::{CommandCredentialProvider, CredentialProvider, Principal, StaticTokenProvider};
