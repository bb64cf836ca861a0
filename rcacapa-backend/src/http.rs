use reqwest::Client;
use std::time::Duration;

/// Build the process-wide HTTP client.
///
/// Built once at startup and handed to every remote client, so all agent and
/// host-model calls reuse a single connection pool.
///
/// The request timeout is an upper bound only; dispatch deadlines are enforced
/// by the callers and are always shorter.
pub fn build_shared_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(120))
        .build()
}
