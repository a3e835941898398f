//! Request and response types shared across the interception layer.
//!
//! These are deliberately plain data types: the dispatcher, the cache store
//! and the network client all speak in terms of them, so tests can build
//! requests and canned responses without any transport machinery.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP method of an intercepted request.
///
/// Only GET requests are ever cached; the rest exist so the dispatcher can
/// recognize and decline them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

/// What kind of resource a request is for, mirroring the destination
/// metadata a browser attaches to sub-resource loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  /// Top-level document (HTML page)
  Document,
  Script,
  Style,
  Image,
  Font,
  /// Anything else: API calls, manifests, media, ...
  Other,
}

impl Destination {
  /// Infer a destination from a URL path by extension.
  ///
  /// Used by the CLI, where no browser is around to annotate the request.
  pub fn from_path(path: &str) -> Self {
    let ext = path
      .rsplit('/')
      .next()
      .and_then(|name| name.rsplit_once('.'))
      .map(|(_, ext)| ext.to_lowercase());

    match ext.as_deref() {
      Some("html") | Some("htm") => Destination::Document,
      Some("js") | Some("mjs") => Destination::Script,
      Some("css") => Destination::Style,
      Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("webp") | Some("avif")
      | Some("svg") | Some("ico") => Destination::Image,
      Some("woff") | Some("woff2") | Some("ttf") | Some("otf") => Destination::Font,
      _ => Destination::Other,
    }
  }

  /// Whether this destination is a static sub-resource (image/font/style/script).
  pub fn is_static_asset(&self) -> bool {
    matches!(
      self,
      Destination::Image | Destination::Font | Destination::Style | Destination::Script
    )
  }
}

/// An intercepted request, reduced to the facts the cache cares about.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  /// True for top-level page loads (the browser's `mode: navigate`).
  pub navigation: bool,
}

impl Request {
  /// A plain GET request with no particular destination.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      destination: Destination::Other,
      navigation: false,
    }
  }

  /// A top-level navigation request for a document.
  pub fn navigation(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      destination: Destination::Document,
      navigation: true,
    }
  }

  /// Stable cache key for this request's identity (method + URL).
  ///
  /// SHA256 hash for stable, fixed-length keys.
  pub fn cache_key(&self) -> String {
    cache_key(self.method, &self.url)
  }
}

/// Compute the cache key for a method + URL pair without building a `Request`.
pub fn cache_key(method: Method, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A captured response: status, headers and body at time of observation.
///
/// Serializable so storage backends can persist it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Whether the status indicates success (2xx).
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value by name, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_destination_from_path() {
    assert_eq!(Destination::from_path("/index.html"), Destination::Document);
    assert_eq!(Destination::from_path("/assets/app.js"), Destination::Script);
    assert_eq!(Destination::from_path("/assets/site.css"), Destination::Style);
    assert_eq!(Destination::from_path("/logo.dim_512x512.png"), Destination::Image);
    assert_eq!(Destination::from_path("/fonts/serif.woff2"), Destination::Font);
    assert_eq!(Destination::from_path("/manifest.webmanifest"), Destination::Other);
    assert_eq!(Destination::from_path("/"), Destination::Other);
  }

  #[test]
  fn test_static_asset_destinations() {
    assert!(Destination::Image.is_static_asset());
    assert!(Destination::Font.is_static_asset());
    assert!(Destination::Style.is_static_asset());
    assert!(Destination::Script.is_static_asset());
    assert!(!Destination::Document.is_static_asset());
    assert!(!Destination::Other.is_static_asset());
  }

  #[test]
  fn test_cache_key_depends_on_method_and_url() {
    let a = cache_key(Method::Get, &url("https://example.com/a"));
    let b = cache_key(Method::Get, &url("https://example.com/b"));
    let c = cache_key(Method::Post, &url("https://example.com/a"));

    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, cache_key(Method::Get, &url("https://example.com/a")));
    // hex-encoded SHA256
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response {
      status: 200,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: Vec::new(),
    };

    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/html"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_success_statuses() {
    let mut response = Response {
      status: 200,
      headers: Vec::new(),
      body: Vec::new(),
    };
    assert!(response.is_success());

    response.status = 299;
    assert!(response.is_success());

    response.status = 304;
    assert!(!response.is_success());

    response.status = 500;
    assert!(!response.is_success());
  }
}
