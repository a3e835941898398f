//! Request classification: the single policy decision point.
//!
//! Classification is a pure function from request facts to a class; the
//! worker maps each class to a caching strategy. Keeping it side-effect
//! free makes the whole routing table testable without any I/O.

use crate::http::{Method, Request};

/// Which caching strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
  /// Top-level page load: network-first with shell/offline fallback.
  Navigation,
  /// Image, font, style or script sub-resource: cache-first.
  StaticAsset,
  /// Any other GET: network-first, cache as read-only fallback.
  Other,
}

/// Classify an intercepted request, or decline it.
///
/// `None` means the request is not intercepted at all: non-GET methods are
/// never safe to cache, and non-http(s) schemes (extension-internal URLs
/// and the like) are not network traffic this layer owns.
pub fn classify(request: &Request) -> Option<Class> {
  if request.method != Method::Get {
    return None;
  }

  if !matches!(request.url.scheme(), "http" | "https") {
    return None;
  }

  if request.navigation {
    return Some(Class::Navigation);
  }

  if request.destination.is_static_asset() {
    return Some(Class::StaticAsset);
  }

  Some(Class::Other)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Destination;
  use url::Url;

  fn request(method: Method, url: &str, destination: Destination, navigation: bool) -> Request {
    Request {
      method,
      url: Url::parse(url).unwrap(),
      destination,
      navigation,
    }
  }

  #[test]
  fn test_non_get_methods_are_declined() {
    for method in [
      Method::Post,
      Method::Put,
      Method::Patch,
      Method::Delete,
      Method::Head,
      Method::Options,
    ] {
      let req = request(method, "https://example.com/api/checkout", Destination::Other, false);
      assert_eq!(classify(&req), None, "{:?} must not be intercepted", method);
    }
  }

  #[test]
  fn test_non_network_schemes_are_declined() {
    let req = request(
      Method::Get,
      "chrome-extension://abcdef/content.js",
      Destination::Script,
      false,
    );
    assert_eq!(classify(&req), None);

    let req = request(Method::Get, "data:text/plain,hi", Destination::Other, false);
    assert_eq!(classify(&req), None);
  }

  #[test]
  fn test_navigation_wins_over_destination() {
    let req = request(Method::Get, "https://example.com/posts/42", Destination::Document, true);
    assert_eq!(classify(&req), Some(Class::Navigation));
  }

  #[test]
  fn test_static_asset_destinations() {
    for destination in [
      Destination::Image,
      Destination::Font,
      Destination::Style,
      Destination::Script,
    ] {
      let req = request(Method::Get, "https://example.com/assets/x", destination, false);
      assert_eq!(classify(&req), Some(Class::StaticAsset));
    }
  }

  #[test]
  fn test_everything_else_is_other() {
    let api = request(Method::Get, "https://example.com/api/feed", Destination::Other, false);
    assert_eq!(classify(&api), Some(Class::Other));

    // A document fetched outside a navigation is not the shell path
    let doc = request(Method::Get, "https://example.com/page.html", Destination::Document, false);
    assert_eq!(classify(&doc), Some(Class::Other));
  }

  #[test]
  fn test_http_scheme_is_accepted() {
    let req = request(Method::Get, "http://localhost:3000/", Destination::Other, true);
    assert_eq!(classify(&req), Some(Class::Navigation));
  }
}
