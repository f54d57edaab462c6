//! Candidate endpoint discovery.
//!
//! The resolver ranks every way of reaching the relay for the context the
//! client runs in, fastest-to-succeed first, and keeps every other path as a
//! fallback. The list is rebuilt at the start of every reconnection cycle.

use crate::error::Error;
use log::*;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Environment variable holding the client's own origin, e.g. the page URL.
pub const ORIGIN_ENV: &str = "STREAM_ORIGIN";

/// Public relay/tunnel host suffixes recognised out of the box.
pub const TUNNEL_SUFFIXES: &[&str] = &[
    "ngrok.io",
    "ngrok-free.app",
    "ngrok.app",
    "trycloudflare.com",
    "loca.lt",
    "devtunnels.ms",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Running against a loopback host.
    Local,
    /// Running behind a public relay or tunnel hostname.
    Tunneled,
    Remote,
}

/// Signals about where the client itself runs.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub origin: Option<String>,
}

impl RunContext {
    pub fn from_env() -> Self {
        Self {
            origin: std::env::var(ORIGIN_ENV).ok(),
        }
    }

    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Statically configured primary endpoint (full URL including the stream path).
    pub primary: Option<String>,
    /// Externally configured fallbacks, tried last in the given order.
    pub fallbacks: Vec<String>,
    /// Port the relay listens on when reached over loopback.
    pub loopback_port: u16,
    /// Path of the streaming endpoint, appended to origins.
    pub stream_path: String,
    /// Extra tunnel host suffixes on top of [`TUNNEL_SUFFIXES`].
    pub tunnel_suffixes: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallbacks: Vec::new(),
            loopback_port: 4000,
            stream_path: "/events".to_string(),
            tunnel_suffixes: Vec::new(),
        }
    }
}

/// Anything that can produce the ordered candidate list for a cycle.
pub trait EndpointSource: Send + Sync {
    fn endpoints(&self) -> Vec<String>;
}

/// A fixed list, still deduplicated and cleaned.
impl EndpointSource for Vec<String> {
    fn endpoints(&self) -> Vec<String> {
        dedup_endpoints(self.iter().cloned())
    }
}

/// Resolver bound to a context and configuration.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    context: RunContext,
    config: ResolverConfig,
}

impl EndpointResolver {
    pub fn new(context: RunContext, config: ResolverConfig) -> Self {
        Self { context, config }
    }
}

impl EndpointSource for EndpointResolver {
    fn endpoints(&self) -> Vec<String> {
        resolve(&self.context, &self.config)
    }
}

/// Ordered, deduplicated candidate endpoints for this context.
pub fn resolve(env: &RunContext, config: &ResolverConfig) -> Vec<String> {
    let profile = classify(env, config);

    let own_origin = env
        .origin
        .as_deref()
        .map(|origin| format!("{}{}", origin.trim_end_matches('/'), config.stream_path));
    let primary = config.primary.clone();
    let loopback_direct = Some(format!(
        "http://localhost:{}{}",
        config.loopback_port, config.stream_path
    ));
    let loopback_alternate = Some(format!(
        "http://127.0.0.1:{}{}",
        config.loopback_port, config.stream_path
    ));

    let ranked = match profile {
        Profile::Local => [loopback_direct, own_origin, primary, loopback_alternate],
        Profile::Tunneled => [own_origin, primary, loopback_direct, loopback_alternate],
        Profile::Remote => [primary, own_origin, loopback_direct, loopback_alternate],
    };

    let endpoints = dedup_endpoints(
        ranked
            .into_iter()
            .flatten()
            .chain(config.fallbacks.iter().cloned()),
    );
    debug!("Resolved {profile:?} endpoints: {endpoints:?}");
    endpoints
}

/// Determine the run profile from the client's own origin.
pub fn classify(env: &RunContext, config: &ResolverConfig) -> Profile {
    let Some(host) = env.origin.as_deref().and_then(parse_host) else {
        return Profile::Remote;
    };

    if host_is_loopback(&host) {
        return Profile::Local;
    }

    if let Host::Domain(domain) = &host {
        let domain = domain.to_ascii_lowercase();
        let is_tunnel = TUNNEL_SUFFIXES
            .iter()
            .copied()
            .chain(config.tunnel_suffixes.iter().map(String::as_str))
            .any(|suffix| domain == suffix || domain.ends_with(&format!(".{suffix}")));
        if is_tunnel {
            return Profile::Tunneled;
        }
    }

    Profile::Remote
}

impl ResolverConfig {
    /// Reject configured endpoints that are not http(s) URLs and a stream
    /// path that is not absolute.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.stream_path.starts_with('/') {
            return Err(Error::config(format!(
                "stream path {:?} must start with '/'",
                self.stream_path
            )));
        }

        let configured = self.primary.iter().chain(self.fallbacks.iter());
        for endpoint in configured.filter(|endpoint| !endpoint.trim().is_empty()) {
            match Url::parse(endpoint.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(Error::config(format!(
                        "endpoint {endpoint} uses unsupported scheme {}",
                        url.scheme()
                    )))
                }
                Err(e) => {
                    return Err(Error::config(format!(
                        "endpoint {endpoint} is not a URL: {e}"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// True when `endpoint` points at this machine.
pub fn is_loopback(endpoint: &str) -> bool {
    parse_host(endpoint).is_some_and(|host| host_is_loopback(&host))
}

/// Drop empty entries and repeats, keeping the first occurrence in place.
pub fn dedup_endpoints<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|candidate| candidate.trim().trim_end_matches('/').to_string())
        .filter(|candidate| !candidate.is_empty())
        .filter(|candidate| seen.insert(candidate.clone()))
        .collect()
}

fn parse_host(url: &str) -> Option<Host<String>> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host().map(|host| host.to_owned()))
}

fn host_is_loopback(host: &Host<String>) -> bool {
    match host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.is_loopback() || *ip == Ipv4Addr::UNSPECIFIED,
        Host::Ipv6(ip) => ip.is_loopback() || *ip == Ipv6Addr::UNSPECIFIED,
    }
}
