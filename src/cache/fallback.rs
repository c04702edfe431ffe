//! Placeholder responses for when neither network nor cache can answer.

use serde_json::json;

use super::request::{HttpRequest, HttpResponse};

const IMAGE_SUFFIXES: &[&str] = &[
  ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".avif",
];

const OFFLINE_MESSAGE: &str = "You appear to be offline and this content is not cached yet.";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline - Casa Concierge</title>
  <style>
    body { font-family: system-ui, sans-serif; display: flex; align-items: center;
           justify-content: center; min-height: 100vh; margin: 0; background: #f8fafc; color: #0f172a; }
    main { text-align: center; max-width: 28rem; padding: 2rem; }
    button { margin-top: 1rem; padding: 0.5rem 1.25rem; border: 0; border-radius: 0.375rem;
             background: #0f172a; color: #fff; cursor: pointer; }
  </style>
</head>
<body>
  <main>
    <h1>You're offline</h1>
    <p>Casa Concierge can't reach the server right now. This page will reload
       automatically once your connection is back.</p>
    <button onclick="location.reload()">Try again</button>
  </main>
  <script>
    window.addEventListener('online', function () { location.reload(); });
  </script>
</body>
</html>
"#;

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150">
  <rect width="200" height="150" fill="#e2e8f0"/>
  <text x="100" y="80" font-family="sans-serif" font-size="14" fill="#64748b" text-anchor="middle">Image offline</text>
</svg>
"##;

/// Build an offline response by content negotiation.
///
/// First match wins: HTML page, JSON error, SVG placeholder, plain text.
pub fn synthesize(request: &HttpRequest) -> HttpResponse {
  let accept = request.accept().to_ascii_lowercase();

  if accept.contains("text/html") {
    return HttpResponse::new(200, "text/html; charset=utf-8", OFFLINE_PAGE);
  }

  if accept.contains("application/json") {
    let body = json!({
      "error": "offline",
      "message": OFFLINE_MESSAGE,
      "cached": false,
    });
    return HttpResponse::new(503, "application/json", body.to_string());
  }

  if is_image(request) {
    return HttpResponse::new(200, "image/svg+xml", PLACEHOLDER_SVG);
  }

  HttpResponse::new(503, "text/plain; charset=utf-8", "Offline")
}

fn is_image(request: &HttpRequest) -> bool {
  let path = request.url.path().to_ascii_lowercase();
  IMAGE_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> HttpRequest {
    HttpRequest::get(Url::parse(&format!("https://casa.test{}", path)).unwrap())
  }

  #[test]
  fn test_html_navigation() {
    let response = synthesize(&request("/bookings").with_header("Accept", "text/html,*/*"));
    assert_eq!(response.status, 200);
    assert!(response.content_type().unwrap().starts_with("text/html"));
    assert!(response.text().contains("offline"));
    assert!(response.text().contains("'online'"));
  }

  #[test]
  fn test_json_api_call() {
    let response =
      synthesize(&request("/rest/v1/invoices").with_header("Accept", "application/json"));
    assert_eq!(response.status, 503);

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "offline");
    assert_eq!(body["cached"], false);
    assert!(body["message"].is_string());
  }

  #[test]
  fn test_accept_matching_ignores_case() {
    let response = synthesize(&request("/bookings").with_header("Accept", "Text/HTML"));
    assert!(response.content_type().unwrap().starts_with("text/html"));

    let response =
      synthesize(&request("/rest/v1/invoices").with_header("Accept", "Application/JSON"));
    assert_eq!(response.status, 503);
    assert_eq!(response.content_type(), Some("application/json"));
  }

  #[test]
  fn test_image_placeholder() {
    let response = synthesize(&request("/media/photo.png"));
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("image/svg+xml"));
    assert!(response.text().starts_with("<svg"));

    // Query strings and case don't hide the suffix
    let response = synthesize(&request("/media/PHOTO.JPG?w=200"));
    assert_eq!(response.content_type(), Some("image/svg+xml"));
  }

  #[test]
  fn test_html_wins_over_image_suffix() {
    let response = synthesize(&request("/photo.png").with_header("Accept", "text/html"));
    assert!(response.content_type().unwrap().starts_with("text/html"));
  }

  #[test]
  fn test_plain_text_last_resort() {
    let response = synthesize(&request("/fonts/inter.woff2"));
    assert_eq!(response.status, 503);
    assert_eq!(response.text(), "Offline");
  }
}
