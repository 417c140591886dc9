//! Request forwarding to the backend.

use std::net::SocketAddr;

use http::header::{HeaderName, HeaderValue, HOST};
use http::{Request, Response, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::proxy::http_result::{HttpError, HttpResult};
use crate::proxy::synthetic_response::RespBody;

type HttpClient = Client<HttpConnector, Incoming>;

// RFC 9110 §7.6.1: never forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// Forwards requests to a single configured backend over plain HTTP.
pub struct Forwarder {
    client: HttpClient,
    forward_url: Uri,
    preserve_host: bool,
}

impl Forwarder {
    pub fn new(forward_url: Uri, preserve_host: bool) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, forward_url, preserve_host }
    }

    pub async fn forward(
        &self,
        mut req: Request<Incoming>,
        peer: SocketAddr,
    ) -> HttpResult<Response<RespBody>> {
        let inbound_host = request_host(&req);

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = Uri::builder()
            .scheme(self.forward_url.scheme_str().unwrap_or("http"))
            .authority(
                self.forward_url
                    .authority()
                    .map(|a| a.as_str())
                    .unwrap_or("localhost"),
            )
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| HttpError::UpstreamRequest(e.to_string()))?;
        *req.uri_mut() = uri;

        // the backend speaks plain HTTP/1.1 regardless of the inbound version
        *req.version_mut() = Version::HTTP_11;

        for name in HOP_BY_HOP_HEADERS {
            req.headers_mut().remove(name);
        }

        set_forwarded_headers(&mut req, peer, inbound_host.as_deref());

        if self.preserve_host {
            if let Some(host) = inbound_host.as_deref().and_then(|h| HeaderValue::from_str(h).ok())
            {
                req.headers_mut().insert(HOST, host);
            }
        } else {
            // let the client derive Host from the rewritten URI
            req.headers_mut().remove(HOST);
        }

        match self.client.request(req).await {
            Ok(resp) => Ok(resp.map(|b| b.boxed())),
            Err(e) if is_timeout(&e) => Err(HttpError::GatewayTimeout(e.to_string())),
            Err(e) => Err(HttpError::BadGateway(e.to_string())),
        }
    }
}

fn request_host(req: &Request<Incoming>) -> Option<String> {
    req.uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
}

fn set_forwarded_headers(req: &mut Request<Incoming>, peer: SocketAddr, host: Option<&str>) {
    let xff = HeaderName::from_static("x-forwarded-for");
    let client_ip = peer.ip().to_string();
    let value = match req.headers().get(&xff).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(v) = HeaderValue::from_str(&value) {
        req.headers_mut().insert(xff, v);
    }

    if let Some(host) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        req.headers_mut()
            .insert(HeaderName::from_static("x-forwarded-host"), host);
    }

    req.headers_mut().insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("https"),
    );
}

fn is_timeout(e: &hyper_util::client::legacy::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        if let Some(h) = err.downcast_ref::<hyper::Error>() {
            if h.is_timeout() {
                return true;
            }
        }
        source = err.source();
    }
    false
}
