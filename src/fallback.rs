//! Synthesized offline fallback for failed navigations.
//!
//! Last resort when a page load has no network and no cached shell. The
//! document is fully self-contained (inline styles, no scripts, no external
//! references) so it renders without any further fetches.

use crate::http::Response;

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline</title>
  <style>
    body {
      font-family: system-ui, -apple-system, sans-serif;
      display: flex;
      align-items: center;
      justify-content: center;
      min-height: 100vh;
      margin: 0;
      background: #f4f4f2;
      color: #26221a;
      text-align: center;
      padding: 20px;
    }
    .offline-container {
      max-width: 400px;
    }
    h1 {
      font-size: 2rem;
      margin-bottom: 1rem;
    }
    p {
      font-size: 1.1rem;
      line-height: 1.6;
    }
  </style>
</head>
<body>
  <div class="offline-container">
    <h1>You're offline</h1>
    <p>Please check your internet connection and try again.</p>
  </div>
</body>
</html>
"#;

/// Build the substitute response for an offline navigation.
///
/// Cannot fail: no I/O, no allocation beyond the body copy.
pub fn offline_response() -> Response {
  Response {
    status: 200,
    headers: vec![(
      "Content-Type".to_string(),
      "text/html; charset=utf-8".to_string(),
    )],
    body: OFFLINE_PAGE.as_bytes().to_vec(),
  }
}
