//! Backend call abstraction.

use async_trait::async_trait;

use crate::core::endpoint::Endpoint;

/// Performs one backend call against a selected endpoint.
///
/// This is the `operation(endpoint)` contract the pool retries and fails over.
/// Implementations raise on failure; the pool applies the request timeout, so
/// an implementation does not need its own. When endpoints of one capability
/// speak different wire formats, normalising the response belongs here, not
/// in the pool.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use adaptive_dispatch::core::{BackendExecutor, Endpoint};
///
/// struct Completion;
///
/// #[async_trait]
/// impl BackendExecutor<String, String> for Completion {
///     async fn call(&self, endpoint: &Endpoint, prompt: &String) -> anyhow::Result<String> {
///         let url = format!("{}/api/generate", endpoint.url);
///         let body = reqwest::Client::new()
///             .post(url)
///             .json(&serde_json::json!({ "prompt": prompt, "stream": false }))
///             .send()
///             .await?
///             .error_for_status()?
///             .text()
///             .await?;
///         Ok(body)
///     }
/// }
/// ```
#[async_trait]
pub trait BackendExecutor<P, T>: Send + Sync
where
    P: Send + Sync,
    T: Send,
{
    /// Run the call against `endpoint`.
    async fn call(&self, endpoint: &Endpoint, payload: &P) -> anyhow::Result<T>;
}
