//! secret references inside variable values
//!
//! A value such as `gcp-secret://projects/p/secrets/db-password` is replaced with the payload of the latest
//! version of that secret. Two variants exist:
//! - [RAW_PREFIX]: the payload is used as text
//! - [BASE64_PREFIX]: the payload is base64 encoded (for binary secrets or kubernetes `data:` fields)
//!
//! Values without one of these prefixes are left alone.
use base64::Engine;

pub const RAW_PREFIX: &str = "gcp-secret://";
pub const BASE64_PREFIX: &str = "gcp-secret-base64://";

/// Version appended to every secret path
const VERSION_SUFFIX: &str = "/versions/latest";

const SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";

/// Environment variable checked for an access token before asking `gcloud`
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Remote secret storage
pub trait SecretBackend {
    /// Fetch the payload of a fully qualified secret version
    fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError>;
}

/// Fetch the secret referenced by `value` if it carries `prefix`
///
/// Returns `(None, value)` when the prefix does not match. Otherwise returns the payload and the name of the
/// secret version it was fetched from.
pub fn resolve(
    backend: &dyn SecretBackend,
    prefix: &str,
    value: &str,
) -> Result<(Option<Vec<u8>>, String), SecretError> {
    let Some(secret_path) = value.strip_prefix(prefix) else {
        return Ok((None, value.to_string()));
    };

    let name = format!("{secret_path}{VERSION_SUFFIX}");
    let payload = backend.fetch(&name)?;
    tracing::info!(%name, "secret fetched");

    Ok((Some(payload), name))
}

/// Resolve a [RAW_PREFIX] reference, the payload must be utf-8
pub fn resolve_raw(backend: &dyn SecretBackend, value: &str) -> Result<String, SecretError> {
    match resolve(backend, RAW_PREFIX, value)? {
        (None, passthrough) => Ok(passthrough),
        (Some(payload), name) => {
            String::from_utf8(payload).map_err(|_| SecretError::NotUtf8 { name })
        }
    }
}

/// Resolve a [BASE64_PREFIX] reference
pub fn resolve_base64(backend: &dyn SecretBackend, value: &str) -> Result<String, SecretError> {
    match resolve(backend, BASE64_PREFIX, value)? {
        (None, passthrough) => Ok(passthrough),
        (Some(payload), _) => Ok(base64::engine::general_purpose::STANDARD.encode(payload)),
    }
}

/// Run both resolvers in their fixed order
///
/// The prefixes are disjoint (`gcp-secret://` is not a prefix of `gcp-secret-base64://`) so at most one fetches.
pub fn resolve_all(backend: &dyn SecretBackend, value: &str) -> Result<String, SecretError> {
    let value = resolve_raw(backend, value)?;
    resolve_base64(backend, &value)
}

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("Unable to obtain an access token for secret manager")]
    Credentials(#[source] std::io::Error),
    #[error("`gcloud auth print-access-token` failed: {0}")]
    CredentialsCommand(String),
    #[error("Failed to fetch secret from {name}")]
    Request {
        name: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to fetch secret from {name}: HTTP {status}")]
    Status {
        name: String,
        status: reqwest::StatusCode,
    },
    #[error("Unexpected secret manager response for {name}")]
    Response {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Secret payload of {name} is not valid base64")]
    Payload {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Secret {name} is not valid utf-8, reference it with gcp-secret-base64:// instead")]
    NotUtf8 { name: String },
    #[error("Secret {name} not found")]
    NotFound { name: String },
}

/// Google Cloud Secret Manager over its REST api
///
/// Each fetch is a single blocking request without retries. No client is kept between fetches.
#[derive(Default, Debug, Clone, Copy)]
pub struct GcpSecretManager;

#[derive(serde::Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(serde::Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

impl GcpSecretManager {
    fn access_token(&self) -> Result<String, SecretError> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }

        let output = std::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .map_err(SecretError::Credentials)?;

        if !output.status.success() {
            return Err(SecretError::CredentialsCommand(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SecretBackend for GcpSecretManager {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        let token = self.access_token()?;
        let url = format!("{SECRET_MANAGER_ENDPOINT}/{name}:access");
        tracing::debug!(%url, "accessing secret version");

        let request_error = |source| SecretError::Request {
            name: name.to_string(),
            source,
        };

        let response = reqwest::blocking::Client::new()
            .get(&url)
            .bearer_auth(token)
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SecretError::Status {
                name: name.to_string(),
                status,
            });
        }

        let body = response.bytes().map_err(request_error)?;
        let parsed: AccessSecretVersionResponse =
            serde_json::from_slice(&body).map_err(|source| SecretError::Response {
                name: name.to_string(),
                source,
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(parsed.payload.data)
            .map_err(|source| SecretError::Payload {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory backend that records every requested name
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub secrets: HashMap<String, Vec<u8>>,
        pub requested: RefCell<Vec<String>>,
    }

    impl FakeBackend {
        pub fn with(name: &str, payload: &[u8]) -> Self {
            let mut backend = Self::default();
            backend.secrets.insert(name.to_string(), payload.to_vec());
            backend
        }
    }

    impl SecretBackend for FakeBackend {
        fn fetch(&self, name: &str) -> Result<Vec<u8>, SecretError> {
            self.requested.borrow_mut().push(name.to_string());
            self.secrets
                .get(name)
                .cloned()
                .ok_or_else(|| SecretError::NotFound {
                    name: name.to_string(),
                })
        }
    }

    #[test]
    fn passthrough_without_prefix() {
        let backend = FakeBackend::default();

        let (payload, value) = resolve(&backend, RAW_PREFIX, "plain value").unwrap();
        assert!(payload.is_none());
        assert_eq!(value, "plain value");
        assert!(backend.requested.borrow().is_empty());
    }

    #[test]
    fn raw_secret_appends_version() {
        let backend = FakeBackend::with("projects/p/secrets/db/versions/latest", b"hunter2");

        let value = resolve_all(&backend, "gcp-secret://projects/p/secrets/db").unwrap();
        assert_eq!(value, "hunter2");
        assert_eq!(
            backend.requested.borrow().as_slice(),
            &["projects/p/secrets/db/versions/latest".to_string()]
        );
    }

    #[test]
    fn base64_secret_is_encoded() {
        let backend = FakeBackend::with("projects/p/secrets/cert/versions/latest", b"\x00\x01binary");

        let value = resolve_all(&backend, "gcp-secret-base64://projects/p/secrets/cert").unwrap();
        assert_eq!(value, "AAFiaW5hcnk=");
        assert_eq!(backend.requested.borrow().len(), 1);
    }

    #[test]
    fn prefixes_are_exclusive() {
        let backend = FakeBackend::default();

        // the raw resolver must not claim a base64 reference
        let (payload, _) = resolve(&backend, RAW_PREFIX, "gcp-secret-base64://x").unwrap();
        assert!(payload.is_none());
        let (payload, _) = resolve(&backend, BASE64_PREFIX, "gcp-secret://x").unwrap();
        assert!(payload.is_none());
    }

    #[test]
    fn fetch_failure_propagates() {
        let backend = FakeBackend::default();

        let err = resolve_all(&backend, "gcp-secret://projects/p/secrets/missing").unwrap_err();
        assert!(matches!(err, SecretError::NotFound { .. }));
    }

    #[test]
    fn raw_secret_must_be_utf8() {
        let backend = FakeBackend::with("bin/versions/latest", &[0xff, 0xfe]);

        let err = resolve_raw(&backend, "gcp-secret://bin").unwrap_err();
        assert!(matches!(err, SecretError::NotUtf8 { .. }));
    }
}
