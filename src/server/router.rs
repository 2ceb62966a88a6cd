use tracing::{debug, error};

use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

pub const MAX_ROUTES: usize = 100;

/// Route handler. An `Err` is logged and answered with a 500.
pub type Handler = Box<dyn Fn(&Request, &mut Response) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("route table full ({max} routes)", max = MAX_ROUTES)]
    TableFull,
}

pub struct Route {
    pattern: String,
    method: Method,
    handler: Handler,
}

impl Route {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Ordered route table. The first route whose method and pattern both
/// match wins.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// Patterns are literal except for `{name}` placeholders, which match
    /// one path segment.
    ///
    /// # Example
    ///
    /// ```
    /// # use netcore::http::request::Method;
    /// # use netcore::server::router::Router;
    /// let mut router = Router::new();
    /// router
    ///     .register("/items/{id}", Method::GET, |req, res| {
    ///         res.set_body(format!("item {}", req.id.unwrap_or_default()))?;
    ///         Ok(())
    ///     })
    ///     .unwrap();
    /// assert_eq!(router.len(), 1);
    /// ```
    pub fn register<F>(
        &mut self,
        pattern: impl Into<String>,
        method: Method,
        handler: F,
    ) -> Result<(), RouterError>
    where
        F: Fn(&Request, &mut Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.routes.len() >= MAX_ROUTES {
            return Err(RouterError::TableFull);
        }

        let pattern = pattern.into();
        debug!(pattern = %pattern, method = method.as_str(), "route registered");
        self.routes.push(Route {
            pattern,
            method,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Runs the first matching handler and returns its response.
    ///
    /// On a match the request's `path_params` and `id` are filled in
    /// first. No match yields `404 Route not found`.
    pub fn dispatch(&self, request: &mut Request) -> Response {
        let mut response = Response::new();

        for route in &self.routes {
            if route.method != request.method {
                continue;
            }
            let Some(captures) = match_route(&route.pattern, &request.path) else {
                continue;
            };

            request.id = captures.last().map(|(_, value)| atoi(value));
            request.path_params = captures;
            debug!(pattern = %route.pattern, path = %request.path, "route matched");

            if let Err(e) = (route.handler)(request, &mut response) {
                error!(pattern = %route.pattern, error = %e, "handler failed");
                return Response::error(
                    StatusCode::InternalServerError.as_u16(),
                    StatusCode::InternalServerError.reason_phrase(),
                );
            }
            return response;
        }

        Response::error(StatusCode::NotFound.as_u16(), "Route not found")
    }
}

/// Matches `path` against `pattern`.
///
/// Literal characters must match exactly. A `{name}` placeholder consumes
/// the longest run of non-`/` characters, possibly empty. Returns the
/// captures in pattern order when the whole of both strings is consumed.
///
/// ```
/// # use netcore::server::router::match_route;
/// let captures = match_route("/items/{id}", "/items/42").unwrap();
/// assert_eq!(captures, vec![("id".to_string(), "42".to_string())]);
/// assert!(match_route("/items/{id}", "/items/42/x").is_none());
/// ```
pub fn match_route(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
    let pat = pattern.as_bytes();
    let bytes = path.as_bytes();
    let (mut i, mut j) = (0, 0);
    let mut captures = Vec::new();

    while i < pat.len() && j < bytes.len() {
        if pat[i] == b'{' {
            let close = pat[i..].iter().position(|&b| b == b'}').map(|k| i + k);
            let name_end = close.unwrap_or(pat.len());
            let name = String::from_utf8_lossy(&pat[i + 1..name_end]).into_owned();
            i = close.map_or(pat.len(), |c| c + 1);

            let start = j;
            while j < bytes.len() && bytes[j] != b'/' {
                j += 1;
            }
            captures.push((name, String::from_utf8_lossy(&bytes[start..j]).into_owned()));
        } else {
            if pat[i] != bytes[j] {
                return None;
            }
            i += 1;
            j += 1;
        }
    }

    (i == pat.len() && j == bytes.len()).then_some(captures)
}

/// Leading optional sign and decimal digits; anything else yields 0.
fn atoi(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.wrapping_mul(10).wrapping_add(i64::from(d - b'0')));

    if negative { value.wrapping_neg() } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_routes() {
        assert!(match_route("/hello", "/hello").is_some());
        assert!(match_route("/hello", "/hello/").is_none());
        assert!(match_route("/hello", "/hell").is_none());
    }

    #[test]
    fn placeholder_stops_at_slash() {
        let captures = match_route("/a/{x}/b", "/a/12/b").unwrap();
        assert_eq!(captures, vec![("x".to_string(), "12".to_string())]);
        assert!(match_route("/a/{x}/b", "/a/12/c").is_none());
    }

    #[test]
    fn placeholder_may_be_empty_mid_path() {
        let captures = match_route("/a/{x}/b", "/a//b").unwrap();
        assert_eq!(captures[0].1, "");
    }

    #[test]
    fn atoi_semantics() {
        assert_eq!(atoi("42"), 42);
        assert_eq!(atoi("-7"), -7);
        assert_eq!(atoi("12abc"), 12);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
    }
}
