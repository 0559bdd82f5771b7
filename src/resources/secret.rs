//! Root credential Secret handling
//!
//! The cluster's `secretName` points at a user-provided Secret. The operator
//! never writes it; it only reads the administrative account out of it.

use k8s_openapi::api::core::v1::Secret;

use crate::controller::{Error, Result};
use crate::mysql::Credentials;

pub const ROOT_USER_KEY: &str = "rootUser";
pub const ROOT_HOST_KEY: &str = "rootHost";
pub const ROOT_PASSWORD_KEY: &str = "rootPassword";

/// Read a UTF-8 value out of a Secret, checking `stringData` as well for
/// objects that have not round-tripped through the API server
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key).cloned())
        })
}

/// Extract the administrative account. `rootUser` defaults to `root` and
/// `rootHost` to `%`; a missing or empty password is an error.
pub fn parse_root_credentials(secret: &Secret) -> Result<Credentials> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let password = secret_value(secret, ROOT_PASSWORD_KEY)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            Error::InvalidConfig(format!("secret {} has no {} key", name, ROOT_PASSWORD_KEY))
        })?;

    Ok(Credentials {
        user: secret_value(secret, ROOT_USER_KEY)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "root".to_string()),
        host: secret_value(secret, ROOT_HOST_KEY)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "%".to_string()),
        password,
    })
}
