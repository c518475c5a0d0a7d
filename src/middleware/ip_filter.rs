//! Source-address allowlist for the payment gateway webhook.

use std::net::{IpAddr, SocketAddr};
use std::task::{Context, Poll};

use axum::extract::connect_info::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use crate::config::AllowedIps;

/// Resolves the caller address. With `trusted_proxy_depth` proxies in front
/// of the service, the client is the entry that many hops from the right
/// of `x-forwarded-for`; otherwise the socket peer is used.
#[derive(Clone, Debug)]
pub struct ClientIpResolver {
    trusted_proxy_depth: usize,
}

impl ClientIpResolver {
    pub fn new(trusted_proxy_depth: usize) -> Self {
        Self { trusted_proxy_depth }
    }

    pub fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        if self.trusted_proxy_depth > 0 {
            if let Some(ip) = self.from_forwarded_chain(headers) {
                return Some(ip);
            }
        }
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }

    fn from_forwarded_chain(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
        let chain: Vec<IpAddr> = raw
            .split(',')
            .map(str::trim)
            .filter_map(|entry| {
                entry
                    .parse::<IpAddr>()
                    .ok()
                    .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
            })
            .collect();

        if self.trusted_proxy_depth >= chain.len() {
            return None;
        }
        chain.get(chain.len() - 1 - self.trusted_proxy_depth).copied()
    }
}

impl AllowedIps {
    pub fn permits(&self, ip: Option<IpAddr>) -> bool {
        match self {
            AllowedIps::Any => true,
            AllowedIps::Cidrs(cidrs) => ip.is_some_and(|ip| cidrs.iter().any(|cidr| cidr.contains(&ip))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IpFilterLayer {
    allowed: AllowedIps,
    resolver: ClientIpResolver,
}

impl IpFilterLayer {
    pub fn new(allowed: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed,
            resolver: ClientIpResolver::new(trusted_proxy_depth),
        }
    }
}

impl<S> Layer<S> for IpFilterLayer {
    type Service = IpFilter<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IpFilter {
            inner,
            allowed: self.allowed.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IpFilter<S> {
    inner: S,
    allowed: AllowedIps,
    resolver: ClientIpResolver,
}

impl<S, B> Service<Request<B>> for IpFilter<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = futures_util::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let client_ip = self.resolver.resolve(req.headers(), req.extensions());
        if !self.allowed.permits(client_ip) {
            tracing::warn!(client_ip = ?client_ip, path = %req.uri().path(), "webhook blocked: source not allowlisted");
            return Box::pin(async { Ok(StatusCode::FORBIDDEN.into_response()) });
        }

        // Take the readied service and leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
