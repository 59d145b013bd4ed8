//! Client address resolution.

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolve the client address of a request.
///
/// The socket peer is authoritative. The first `x-forwarded-for` entry is
/// used instead only when the daemon is told it sits behind a trusted proxy.
pub fn client_ip(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    let forwarded = trust_forwarded_for.then(|| forwarded_for(headers)).flatten();
    forwarded.or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| v.parse().ok())
}
