//! Page-location script injection
//!
//! The filter needs to know which page of the Octopus web app issued an API
//! call, and that lives in the `#/…` route fragment, which browsers never
//! send (not even in `Referer`). So when the app's HTML document passes
//! through, a `<script>` tag is added at the top of `<head>`. The script patches
//! `XMLHttpRequest` and `fetch` so every same-origin request carries
//! `location.href` in the configured page header.
//!
//! The script is served by the proxy itself at [`PAGE_SCRIPT_PATH`], so it
//! loads from the app's own origin.

use std::sync::LazyLock;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};
use bytes::Bytes;
use regex::Regex;

use super::interceptor::{Exchange, InterceptResult, ResponseInterceptor, Target};
use super::ProxyState;

/// Where the proxy serves the script
pub const PAGE_SCRIPT_PATH: &str = "/_envfilter/page.js";

const SCRIPT_TEMPLATE: &str = r#"// octo-envfilter: report the current page with every API request
(function () {
  "use strict";
  var header = __PAGE_HEADER__;

  function sameOrigin(url) {
    try {
      return new URL(url, window.location.href).origin === window.location.origin;
    } catch (e) {
      return false;
    }
  }

  var open = XMLHttpRequest.prototype.open;
  var send = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__envfilterTagged = sameOrigin(url);
    return open.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    if (this.__envfilterTagged) {
      try {
        this.setRequestHeader(header, window.location.href);
      } catch (e) {}
    }
    return send.apply(this, arguments);
  };

  if (typeof window.fetch === "function") {
    var fetch = window.fetch;
    window.fetch = function (input, init) {
      var url = typeof input === "string" ? input : (input && input.url) || String(input);
      if (!sameOrigin(url)) {
        return fetch.apply(this, arguments);
      }
      init = Object.assign({}, init);
      var base = init.headers || (input instanceof Request ? input.headers : undefined);
      var headers = new Headers(base);
      headers.set(header, window.location.href);
      init.headers = headers;
      return fetch.call(this, input, init);
    };
  }
})();
"#;

/// The app's HTML document: `/app`, `/app/` or `/app/index.html`
static APP_DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://[^/]+(?:/[^?#]*)?/app/?(?:index\.html)?(?:[?#].*)?$")
        .unwrap_or_else(|e| panic!("bad built-in route pattern: {e}"))
});

/// Opening `<head>` tag (not `<header>`)
static HEAD_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<head(?:\s[^>]*)?>")
        .unwrap_or_else(|e| panic!("bad built-in markup pattern: {e}"))
});

/// JavaScript for the given page header name
pub fn render_script(page_header: &str) -> String {
    // A JSON string literal is a valid JS string literal
    let quoted = serde_json::Value::String(page_header.to_string()).to_string();
    SCRIPT_TEMPLATE.replace("__PAGE_HEADER__", &quoted)
}

/// Insert the script tag right after `<head>`, so it runs before the app's
/// own scripts. `None` when there is no head or the tag is already there.
pub fn inject_script_tag(html: &str) -> Option<String> {
    if html.contains(PAGE_SCRIPT_PATH) {
        return None;
    }
    let head = HEAD_OPEN.find(html)?;
    let tag = format!(r#"<script src="{PAGE_SCRIPT_PATH}"></script>"#);

    let mut out = String::with_capacity(html.len() + tag.len());
    out.push_str(&html[..head.end()]);
    out.push_str(&tag);
    out.push_str(&html[head.end()..]);
    Some(out)
}

/// Adds the page-location script to the app document
pub struct PageScriptInjector;

impl ResponseInterceptor for PageScriptInjector {
    fn name(&self) -> &'static str {
        "page-script"
    }

    fn claims(&self, target: &Target) -> bool {
        target.method.eq_ignore_ascii_case("GET") && APP_DOCUMENT.is_match(target.url)
    }

    fn should_apply(&self, exchange: &Exchange) -> bool {
        (200..300).contains(&exchange.status)
    }

    fn on_complete(&self, exchange: &Exchange, body: &Bytes) -> InterceptResult {
        let Ok(html) = std::str::from_utf8(body) else {
            tracing::debug!(url = exchange.response_url, "App document is not UTF-8, leaving it alone");
            return InterceptResult::PassThrough;
        };

        match inject_script_tag(html) {
            Some(html) => {
                tracing::debug!(url = exchange.response_url, "Injected page-location script");
                InterceptResult::Replace(Bytes::from(html))
            }
            None => InterceptResult::PassThrough,
        }
    }
}

/// `GET /_envfilter/page.js`
pub async fn serve_script(State(state): State<ProxyState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        render_script(&state.page_header),
    )
}
