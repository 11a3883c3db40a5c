use super::pattern::{bind, compare_specificity, matches, split_path};
use super::{ExecutionMode, Route};
use crate::error::{ServerError, ServerResult};
use crate::http::Method;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Frozen, read-only route table shared by the dispatcher and pool workers.
pub struct RouteTable {
    routes: Vec<Route>,
    by_method: HashMap<Method, Vec<usize>>,
    any: Vec<usize>,
}

/// A resolved route with its bound parameters. Lives no longer than the table.
pub struct RouteMatch<'r> {
    pub route: &'r Route,
    pub route_id: usize,
    pub params: HashMap<String, String>,
}

impl RouteTable {
    pub(crate) fn new(routes: Vec<Route>) -> Self {
        let mut by_method: HashMap<Method, Vec<usize>> = HashMap::new();
        let mut any = Vec::new();
        for (id, route) in routes.iter().enumerate() {
            debug!(route_id = id, method = ?route.method, pattern = %route.pattern, mode = ?route.mode, "Route registered");
            match route.method {
                Some(method) => by_method.entry(method).or_default().push(id),
                None => any.push(id),
            }
        }
        Self {
            routes,
            by_method,
            any,
        }
    }

    pub fn route(&self, route_id: usize) -> Option<&Route> {
        self.routes.get(route_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_pooled_routes(&self) -> bool {
        self.routes.iter().any(|r| r.mode == ExecutionMode::Pooled)
    }

    /// Resolves `(method, path)` to the most specific route.
    ///
    /// `HEAD` falls back to the `GET` route. When only other methods match the
    /// path the error is `MethodNotAllowed`, otherwise `NoMatch`.
    pub fn match_route(&self, method: Method, path: &str) -> ServerResult<RouteMatch<'_>> {
        let segments: Vec<&str> = split_path(path).collect();

        if let Some(found) = self.find(method, &segments) {
            return Ok(found);
        }
        if method == Method::HEAD {
            if let Some(found) = self.find(Method::GET, &segments) {
                return Ok(found);
            }
        }

        let allowed = self.allowed_methods(&segments);
        if allowed.is_empty() {
            Err(ServerError::NoMatch)
        } else {
            Err(ServerError::MethodNotAllowed(allowed))
        }
    }

    fn find(&self, method: Method, segments: &[&str]) -> Option<RouteMatch<'_>> {
        let specific = self.by_method.get(&method).map(Vec::as_slice).unwrap_or(&[]);

        let mut best: Option<usize> = None;
        for &id in specific.iter().chain(self.any.iter()) {
            let route = &self.routes[id];
            if !matches(&route.segments, segments) {
                continue;
            }
            best = Some(match best {
                None => id,
                Some(current) => match compare_specificity(&route.segments, &self.routes[current].segments) {
                    Ordering::Less => id,
                    Ordering::Greater => current,
                    Ordering::Equal => current.min(id),
                },
            });
        }

        let route_id = best?;
        let route = &self.routes[route_id];
        let mut bound = Vec::new();
        bind(&route.segments, segments, &mut bound);
        Some(RouteMatch {
            route,
            route_id,
            params: bound.into_iter().collect(),
        })
    }

    fn allowed_methods(&self, segments: &[&str]) -> Vec<Method> {
        let mut allowed = Vec::new();
        for route in &self.routes {
            if let Some(method) = route.method {
                if !allowed.contains(&method) && matches(&route.segments, segments) {
                    allowed.push(method);
                }
            }
        }
        if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
            allowed.push(Method::HEAD);
        }
        allowed
    }
}
