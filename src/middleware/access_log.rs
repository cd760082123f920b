use tokio::time::Instant;

use super::{BoxFuture, Middleware, Next};
use crate::Request;
use crate::proxy::CACHE_STATUS_HEADER;

/// Logs one line per request once the downstream response is ready:
///
/// ```text
/// GET /modelviewer/tbc/meta/armor/1/15372.json 200 3.41ms 56B HIT
/// ```
///
/// `AccessLog` never short-circuits.
pub struct AccessLog;

impl Middleware for AccessLog {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().to_string();
            let target = req.target().to_owned();

            let response = next.run(req).await;

            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            let status = response.status().as_u16();
            let bytes = response.body_ref().len();
            let cache = response.headers().get(CACHE_STATUS_HEADER).unwrap_or("-");

            tracing::info!("{method} {target} {status} {elapsed_ms:.2}ms {bytes}B {cache}");

            response
        })
    }
}
