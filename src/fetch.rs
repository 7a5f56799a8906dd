//! Minimal HTTP client behind the script's `fetch`.
//!
//! The contract is deliberately forgiving: any failure, including a timeout,
//! yields an empty body instead of an error.

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;

use crate::options::FetchOptions;

fn client() -> Option<&'static Client> {
    static CLIENT: OnceLock<Option<Client>> = OnceLock::new();
    CLIENT
        .get_or_init(|| match Client::builder().build() {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!(error = %e, "failed to build HTTP client");
                None
            }
        })
        .as_ref()
}

/// Perform the request on the calling thread and return the response body.
///
/// Non-success statuses still return their body; only transport failures
/// produce `""`.
pub fn fetch_text(url: &str, options: &FetchOptions) -> String {
    match try_fetch(url, options) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(url, error = %e, "fetch failed");
            String::new()
        }
    }
}

/// Run [`fetch_text`] on a worker thread and hand the body to `done`.
pub fn fetch_in_background<F>(url: String, options: FetchOptions, done: F)
where
    F: FnOnce(String) + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("native-host-fetch".into())
        .spawn(move || done(fetch_text(&url, &options)));
    if let Err(e) = spawned {
        tracing::error!(error = %e, "could not start fetch worker");
    }
}

fn try_fetch(url: &str, options: &FetchOptions) -> anyhow::Result<String> {
    let client = client().ok_or_else(|| anyhow::anyhow!("HTTP client unavailable"))?;
    let method = match options.method.as_deref() {
        Some(name) if !name.trim().is_empty() => {
            Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())?
        }
        _ => Method::GET,
    };
    tracing::debug!(url, %method, "fetching");

    let mut request = client.request(method, url);
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &options.body {
        request = request.body(body.clone());
    }
    if let Some(ms) = options.timeout_ms {
        request = request.timeout(Duration::from_millis(ms));
    }

    let response = request.send()?;
    tracing::debug!(url, status = %response.status(), "fetch response");
    Ok(response.text()?)
}
