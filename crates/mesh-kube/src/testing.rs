//! Test helpers.

use kube::Client;

/// A client pointing at a closed local port. Must be created inside a Tokio
/// runtime.
pub(crate) fn offline_client() -> Client {
    let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
    Client::try_from(config).unwrap()
}
