use crate::http::request::split_query;

/// Infers a `Content-Type` from the file extension of the target's path.
pub fn content_type_for(target: &str) -> &'static str {
    let path = split_query(target).0;
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return "application/octet-stream";
    };

    match ext.to_ascii_lowercase().as_str() {
        "json" => "application/json; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
