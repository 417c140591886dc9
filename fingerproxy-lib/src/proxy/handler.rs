//! Request handling: probe short-circuit, fingerprint header injection,
//! forwarding, synthetic error responses.

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{HeaderValue, USER_AGENT};
use http::{Request, StatusCode};
use hyper::body::Incoming;
use hyper::Response;
use tracing::{debug, error};

use crate::fingerprint::HeaderInjector;
use crate::metadata::Metadata;
use crate::proxy::forwarding::Forwarder;
use crate::proxy::synthetic_response::{synthetic_error_response, text_response, RespBody};

const PROBE_USER_AGENT_PREFIX: &str = "kube-probe/";
const PROBE_RESPONSE: &str = "OK";

/// Per-request entry point shared by both HTTP engines.
pub struct ProxyHandler {
    forwarder: Forwarder,
    injectors: Vec<Arc<dyn HeaderInjector>>,
    kubernetes_probe: bool,
}

impl ProxyHandler {
    pub fn new(
        forwarder: Forwarder,
        injectors: Vec<Arc<dyn HeaderInjector>>,
        kubernetes_probe: bool,
    ) -> Self {
        Self { forwarder, injectors, kubernetes_probe }
    }

    pub async fn handle(
        &self,
        mut req: Request<Incoming>,
        peer: SocketAddr,
        metadata: Arc<Metadata>,
    ) -> Response<RespBody> {
        if self.kubernetes_probe && is_kubernetes_probe(&req) {
            return text_response(StatusCode::OK, PROBE_RESPONSE);
        }

        req.extensions_mut().insert(metadata);
        self.inject_headers(&mut req, peer);

        match self.forwarder.forward(req, peer).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(%peer, error = %e, "forwarding failed");
                synthetic_error_response(StatusCode::from(e))
            }
        }
    }

    /// Sets one header per injector on the request about to be forwarded.
    /// Empty values skip the header; errors are logged and skipped, the
    /// request is forwarded either way.
    fn inject_headers(&self, req: &mut Request<Incoming>, peer: SocketAddr) {
        for injector in &self.injectors {
            let name = injector.header_name().clone();
            match injector.header_value(req.extensions()) {
                Ok(value) if value.is_empty() => {
                    debug!(%peer, header = %name, "empty fingerprint, header omitted");
                }
                Ok(value) => match HeaderValue::from_str(&value) {
                    Ok(value) => {
                        req.headers_mut().insert(name, value);
                    }
                    Err(e) => {
                        error!(%peer, header = %name, error = %e, "fingerprint is not a valid header value");
                    }
                },
                Err(e) => {
                    error!(%peer, header = %name, error = %e, "failed to compute fingerprint");
                }
            }
        }
    }
}

fn is_kubernetes_probe(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .is_some_and(|ua| ua.starts_with(PROBE_USER_AGENT_PREFIX))
}
