use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

pub(crate) type RespBody = BoxBody<Bytes, hyper::Error>;

/// Build an HTTP response with a 4xx or 5xx status code
pub(crate) fn synthetic_error_response(status_code: StatusCode) -> Response<RespBody> {
    let mut res = Response::new(empty_body());
    *res.status_mut() = status_code;
    res
}

pub(crate) fn text_response(status_code: StatusCode, body: &'static str) -> Response<RespBody> {
    let mut res = Response::new(
        Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| match never {})
            .boxed(),
    );
    *res.status_mut() = status_code;
    res
}

fn empty_body() -> RespBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}
