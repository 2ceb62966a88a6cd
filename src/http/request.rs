use serde_json::Value;

/// HTTP request methods.
///
/// Anything the parser does not recognise becomes `UNKNOWN`; such requests
/// still reach the router and simply match no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// PATCH - Partial modification of a resource
    PATCH,
    UNKNOWN,
}

impl Method {
    /// Maps a request-line token to a method by prefix, case-sensitive.
    ///
    /// # Example
    ///
    /// ```
    /// # use netcore::http::request::Method;
    /// assert_eq!(Method::from_token("GET"), Method::GET);
    /// assert_eq!(Method::from_token("get"), Method::UNKNOWN);
    /// assert_eq!(Method::from_token("BREW"), Method::UNKNOWN);
    /// ```
    pub fn from_token(token: &str) -> Self {
        const PREFIXES: [(&str, Method); 7] = [
            ("GET", Method::GET),
            ("POST", Method::POST),
            ("PUT", Method::PUT),
            ("DELETE", Method::DELETE),
            ("OPTIONS", Method::OPTIONS),
            ("HEAD", Method::HEAD),
            ("PATCH", Method::PATCH),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| token.starts_with(prefix))
            .map(|(_, method)| *method)
            .unwrap_or(Method::UNKNOWN)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::HEAD => "HEAD",
            Method::PATCH => "PATCH",
            Method::UNKNOWN => "UNKNOWN",
        }
    }
}

/// Represents a parsed HTTP request from a client.
///
/// Headers and query parameters keep their wire order. `path` never
/// includes the query string. `path_params` and `id` are filled in by the
/// router once a route matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Path component of the request target (e.g., "/items/42")
    pub path: String,
    /// HTTP version token from the request line
    pub version: String,
    /// Request headers in wire order
    pub headers: Vec<(String, String)>,
    /// Query parameters in wire order
    pub query_params: Vec<(String, String)>,
    /// Raw body text, when the request carried one
    pub body: Option<String>,
    /// The body parsed as JSON, when it was valid JSON
    pub json_body: Option<Value>,
    /// Captures of the matched route's `{name}` placeholders
    pub path_params: Vec<(String, String)>,
    /// Integer value of the matched route's placeholder
    pub id: Option<i64>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: Vec<(String, String)>,
    query_params: Vec<(String, String)>,
    body: Option<String>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            version: None,
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Sets the raw body; a JSON body is derived from it when it parses.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let json_body = self
            .body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok());

        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            query_params: self.query_params,
            body: self.body,
            json_body,
            path_params: Vec::new(),
            id: None,
        })
    }
}

impl Request {
    /// Retrieves a header value by exact, case-sensitive name. The first
    /// header with that name wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    /// Retrieves a query parameter by exact name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        lookup(&self.query_params, name)
    }

    /// Retrieves the raw text captured by the route placeholder `{name}`.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        lookup(&self.path_params, name)
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}
