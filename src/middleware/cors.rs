use super::{BoxFuture, Middleware, Next};
use crate::{Method, Request, Response, StatusCode};

/// Permissive CORS layer.
///
/// - Every response carries `Access-Control-Allow-Origin` (`*` by default).
/// - `OPTIONS` preflights are answered directly with `204 No Content`, the
///   allowed methods, and the headers the client asked for in
///   `Access-Control-Request-Headers`; they never reach the cache.
#[derive(Debug, Clone)]
pub struct Cors {
    allow_origin: String,
    allow_methods: Vec<String>,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_owned(),
            allow_methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

impl Cors {
    /// Restricts responses to a single origin instead of `*`.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    fn preflight(&self, req: &Request) -> Response {
        let mut resp = Response::new(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", &self.allow_origin)
            .header("Access-Control-Allow-Methods", self.allow_methods.join(","));
        if let Some(requested) = req.headers().get("access-control-request-headers") {
            resp.add_header("Access-Control-Allow-Headers", requested);
            resp.add_header("Vary", "Access-Control-Request-Headers");
        }
        if self.allow_origin != "*" {
            resp.add_header("Vary", "Origin");
        }
        resp
    }
}

impl Middleware for Cors {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if req.method() == &Method::Options {
            let resp = self.preflight(&req);
            return Box::pin(async move { resp });
        }

        let allow_origin = self.allow_origin.clone();
        Box::pin(async move {
            let mut resp = next.run(req).await;
            if allow_origin != "*" {
                resp.add_header("Vary", "Origin");
            }
            resp.add_header("Access-Control-Allow-Origin", allow_origin);
            resp
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Pipeline;

    fn handler(cors: Cors) -> impl Fn(Request) -> BoxFuture {
        Pipeline::new(|_req| async { Response::new(StatusCode::OK).body("cached") })
            .layer(cors)
            .into_handler()
    }

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[tokio::test]
    async fn adds_wildcard_origin_to_every_response() {
        let resp = handler(Cors::default())(request("GET /a.json HTTP/1.1\r\nHost: a\r\n\r\n")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("access-control-allow-origin"), Some("*"));
        assert!(!resp.headers().contains("vary"));
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let resp = handler(Cors::default())(request(
            "OPTIONS /a.json HTTP/1.1\r\nHost: a\r\nOrigin: https://x.test\r\n\
             Access-Control-Request-Headers: x-token\r\n\r\n",
        ))
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.body_ref().is_empty());
        assert_eq!(
            resp.headers().get("access-control-allow-methods"),
            Some("GET,HEAD,PUT,PATCH,POST,DELETE")
        );
        assert_eq!(resp.headers().get("access-control-allow-headers"), Some("x-token"));
        assert_eq!(resp.headers().get("vary"), Some("Access-Control-Request-Headers"));
    }

    #[tokio::test]
    async fn specific_origin_varies_on_origin() {
        let cors = Cors::default().allow_origin("https://viewer.test");
        let resp = handler(cors)(request("GET / HTTP/1.1\r\nHost: a\r\n\r\n")).await;
        assert_eq!(
            resp.headers().get("access-control-allow-origin"),
            Some("https://viewer.test")
        );
        assert_eq!(resp.headers().get("vary"), Some("Origin"));
    }
}
