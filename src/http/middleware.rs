//! Request-level middleware and extractors.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};

use crate::events::{AppEvent, EventBus};

/// Publish the duration of every routed request on the event bus.
pub async fn record_request_time(State(bus): State<EventBus>, request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let started = Instant::now();

    let response = next.run(request).await;

    bus.publish(AppEvent::RequestTime {
        method,
        path,
        status: response.status().as_u16(),
        elapsed: started.elapsed(),
    });
    response
}

/// Address of the calling client: the first `x-forwarded-for` hop, else the
/// socket peer when served over TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
        if forwarded.is_some() {
            return Ok(Self(forwarded));
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client_ip(request: Request<()>) -> ClientIp {
        let (mut parts, _) = request.into_parts();
        ClientIp::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn forwarded_header_wins_over_peer() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 80))));
        assert_eq!(client_ip(request).await, ClientIp(Some("10.0.0.1".into())));
    }

    #[tokio::test]
    async fn falls_back_to_peer_then_nothing() {
        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 80))));
        assert_eq!(client_ip(request).await, ClientIp(Some("127.0.0.1".into())));

        let bare = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(bare).await, ClientIp(None));
    }
}
