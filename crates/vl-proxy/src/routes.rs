//! Which upstream responses get rewritten.
//!
//! Dispatch is an ordered table of anchored regexes over the request path;
//! the first match wins. Emby serves its API both with and without an `/emby`
//! prefix and treats paths case-insensitively, so the patterns do too.

use regex::Regex;
use vl_core::{Error, Result};

/// A response shape the proxy knows how to rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Views { user_id: String },
    LatestItems { user_id: String },
    ItemListing { user_id: String },
    ItemDetail { user_id: String, item_id: String },
    PrimaryImage { item_id: String },
}

impl Route {
    /// User the request was made for, when the path names one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Route::Views { user_id }
            | Route::LatestItems { user_id }
            | Route::ItemListing { user_id }
            | Route::ItemDetail { user_id, .. } => Some(user_id),
            Route::PrimaryImage { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Route::Views { .. } => "views",
            Route::LatestItems { .. } => "latest",
            Route::ItemListing { .. } => "items",
            Route::ItemDetail { .. } => "detail",
            Route::PrimaryImage { .. } => "image",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RouteKind {
    Views,
    LatestItems,
    ItemListing,
    ItemDetail,
    PrimaryImage,
}

const PATTERNS: [(&str, RouteKind); 5] = [
    (r"^(?i)(?:/emby)?/Users/([^/]+)/Views/?$", RouteKind::Views),
    (r"^(?i)(?:/emby)?/Users/([^/]+)/Items/Latest/?$", RouteKind::LatestItems),
    (r"^(?i)(?:/emby)?/Users/([^/]+)/Items/?$", RouteKind::ItemListing),
    (r"^(?i)(?:/emby)?/Users/([^/]+)/Items/(\d+)/?$", RouteKind::ItemDetail),
    (r"^(?i)(?:/emby)?/Items/(\d+)/Images/Primary/?$", RouteKind::PrimaryImage),
];

/// Compiled, ordered route patterns.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(Regex, RouteKind)>,
}

impl RouteTable {
    pub fn new() -> Result<Self> {
        let routes = PATTERNS
            .iter()
            .map(|(pattern, kind)| {
                Regex::new(pattern)
                    .map(|re| (re, *kind))
                    .map_err(|e| Error::Internal(format!("bad route pattern {pattern}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Match a request path (no query string).
    pub fn dispatch(&self, path: &str) -> Option<Route> {
        self.routes.iter().find_map(|(re, kind)| {
            let caps = re.captures(path)?;
            let first = caps.get(1)?.as_str().to_string();
            Some(match kind {
                RouteKind::Views => Route::Views { user_id: first },
                RouteKind::LatestItems => Route::LatestItems { user_id: first },
                RouteKind::ItemListing => Route::ItemListing { user_id: first },
                RouteKind::ItemDetail => Route::ItemDetail {
                    user_id: first,
                    item_id: caps.get(2)?.as_str().to_string(),
                },
                RouteKind::PrimaryImage => Route::PrimaryImage { item_id: first },
            })
        })
    }
}
