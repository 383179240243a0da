//! Request classification and dispatch.
//!
//! Every outgoing call is matched against an ordered rule table, first match
//! wins. GETs go to the cache layer with the namespace and strategy of their
//! class. Every other method bypasses the cache; mutations among them land in
//! the pending log if the network is unreachable.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info};
use url::{Origin, Url};

use crate::cache::{Fallback, NamespaceFamily, ResourceFamily, Strategy};
use crate::config::Config;
use crate::context::Context;
use crate::error::FetchError;
use crate::http::{Request, Response, OFFLINE_HEADER, SOURCE_HEADER};

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
  Api,
  Static,
  Image,
  Font,
  Navigation,
  /// Non-GET calls, foreign origins, and GETs no rule claims
  Uncacheable,
}

impl ResourceClass {
  pub fn namespace_family(&self) -> Option<NamespaceFamily> {
    match self {
      Self::Api => Some(NamespaceFamily::Api),
      Self::Static => Some(NamespaceFamily::Static),
      Self::Image => Some(NamespaceFamily::Images),
      Self::Font => Some(NamespaceFamily::Fonts),
      Self::Navigation => Some(NamespaceFamily::Shell),
      Self::Uncacheable => None,
    }
  }
}

/// One entry of the rule table.
#[derive(Debug, Clone)]
pub struct RouteRule {
  pub class: ResourceClass,
  pub pattern: Regex,
  pub strategy: Strategy,
}

impl RouteRule {
  fn new(class: ResourceClass, pattern: &str, strategy: Strategy) -> Result<Self> {
    let pattern =
      Regex::new(pattern).map_err(|e| eyre!("Invalid route pattern '{}': {}", pattern, e))?;
    Ok(Self {
      class,
      pattern,
      strategy,
    })
  }
}

/// The decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
  pub class: ResourceClass,
  pub strategy: Strategy,
}

impl Route {
  const PASSTHROUGH: Route = Route {
    class: ResourceClass::Uncacheable,
    strategy: Strategy::NetworkOnly,
  };
}

/// Built-in rules, checked after any configured ones.
const DEFAULT_RULES: &[(ResourceClass, &str, Strategy)] = &[
  (ResourceClass::Api, r"^/api/sync/(upload|check-updates)", Strategy::NetworkOnly),
  (ResourceClass::Api, r"^/api/dashboard/stats", Strategy::StaleWhileRevalidate),
  (ResourceClass::Api, r"^/api/", Strategy::NetworkFirst),
  (
    ResourceClass::Image,
    r"(?i)\.(png|jpe?g|gif|svg|webp|avif|ico)$",
    Strategy::CacheFirst,
  ),
  (ResourceClass::Font, r"(?i)\.(woff2?|ttf|otf|eot)$", Strategy::CacheFirst),
  (
    ResourceClass::Static,
    r"(?i)(\.(js|mjs|css|json|webmanifest)$|^/(static|assets)/)",
    Strategy::CacheFirst,
  ),
  (ResourceClass::Navigation, r"^(/[^.]*)?$", Strategy::NetworkFirst),
];

/// Ordered first-match-wins classifier.
#[derive(Debug, Clone)]
pub struct RequestRouter {
  origin: Origin,
  api_prefix: String,
  rules: Vec<RouteRule>,
}

impl RequestRouter {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?
      .origin();

    let mut rules = Vec::with_capacity(config.routes.len() + DEFAULT_RULES.len());
    for route in &config.routes {
      rules.push(RouteRule::new(route.class, &route.pattern, route.strategy)?);
    }
    for (class, pattern, strategy) in DEFAULT_RULES {
      rules.push(RouteRule::new(*class, pattern, *strategy)?);
    }

    Ok(Self {
      origin,
      api_prefix: config.api_prefix.clone(),
      rules,
    })
  }

  /// Classify a request. Pure: no I/O.
  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET || request.url.origin() != self.origin {
      return Route::PASSTHROUGH;
    }

    let path = request.url.path();
    self
      .rules
      .iter()
      .find(|rule| rule.pattern.is_match(path))
      .map(|rule| Route {
        class: rule.class,
        strategy: rule.strategy,
      })
      .unwrap_or(Route::PASSTHROUGH)
  }

  /// Placeholder family for an API request, if it has one.
  pub fn resource_family(&self, request: &Request) -> Option<ResourceFamily> {
    ResourceFamily::from_url(&request.url, &self.api_prefix)
  }
}

/// Serve one outgoing call.
pub async fn handle(ctx: &Context, request: Request) -> Result<Response, FetchError> {
  if request.method != Method::GET {
    if request.is_mutating() {
      return handle_mutation(ctx, request).await;
    }
    return ctx.layer.network_only(request).await;
  }

  let route = ctx.router.classify(&request);
  let Some(version) = ctx.lifecycle.active_version() else {
    debug!(url = %request.url, "no active version, passing through");
    return ctx.layer.network_only(request).await;
  };

  let Some(family) = route.class.namespace_family() else {
    return ctx.layer.network_only(request).await;
  };

  let namespace = family.namespace_name(&version);
  let fallback = match route.class {
    ResourceClass::Api => ctx
      .router
      .resource_family(&request)
      .map(Fallback::Placeholder)
      .unwrap_or(Fallback::None),
    ResourceClass::Navigation => Fallback::Shell {
      namespace: NamespaceFamily::Shell.namespace_name(&version),
      url: ctx.config.url_for(&ctx.config.install.shell_fallback),
    },
    _ => Fallback::None,
  };

  ctx
    .layer
    .dispatch(route.strategy, request, &namespace, &fallback)
    .await
}

/// Send a mutation; queue it if the network is unreachable.
async fn handle_mutation(ctx: &Context, request: Request) -> Result<Response, FetchError> {
  match ctx.layer.network_only(request.clone()).await {
    Err(e) if e.is_connectivity() => {
      let action = ctx
        .pending
        .enqueue(&request)
        .map_err(|e| FetchError::Storage(e.to_string()))?;
      info!(id = %action.id, method = %action.method, url = %action.url, "queued mutation for sync");

      let body = serde_json::json!({
        "queued": true,
        "id": action.id,
        "offline": true,
        "message": "Saved offline. Changes will sync when connectivity returns.",
      });
      Ok(
        Response::json(202, &body)
          .with_header(OFFLINE_HEADER, "true")
          .with_header(SOURCE_HEADER, "offline"),
      )
    }
    other => other,
  }
}
