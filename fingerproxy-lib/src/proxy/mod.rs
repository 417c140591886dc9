pub mod bridge;
pub mod capture;
pub mod forwarding;
pub mod handler;
pub mod http_result;
pub mod recorder;
pub mod server;
pub mod synthetic_response;

pub use bridge::{BridgeConn, BridgeError, BridgeListener};
pub use capture::{CaptureError, ClientHelloCapture};
pub use handler::ProxyHandler;
pub use http_result::HttpError;
pub use recorder::Http2FrameRecorder;
pub use server::Server;
