use std::time::Duration;

use reqwest::ClientBuilder;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn has_proxy_env() -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|k| std::env::var(k).is_ok_and(|v| !v.trim().is_empty()))
}

fn should_bypass_proxy_impl(url: &str, proxy_env_present: bool) -> bool {
    if !proxy_env_present {
        return false;
    }

    // Escape hatch for setups that intentionally route local mock servers through a proxy.
    if std::env::var("LLM_BENCH_PROXY_LOCALHOST")
        .is_ok_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES"))
    {
        return false;
    }

    let Ok(u) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = u.host_str() else {
        return false;
    };

    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1") || host.ends_with(".localhost")
}

pub fn should_bypass_proxy_for_url(url: &str) -> bool {
    should_bypass_proxy_impl(url, has_proxy_env())
}

pub fn maybe_disable_proxy(builder: ClientBuilder, url: &str) -> ClientBuilder {
    if should_bypass_proxy_for_url(url) {
        builder.no_proxy()
    } else {
        builder
    }
}

/// Streaming client for one backend endpoint. No overall request timeout: the runner owns
/// the per-call deadline, so only connection setup is bounded here.
pub fn client_for_url(url: &str) -> Result<reqwest::Client, reqwest::Error> {
    let builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    maybe_disable_proxy(builder, url).build()
}
