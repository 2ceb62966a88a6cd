use serde_json::Value;

use crate::http::MAX_HEADERS;

/// Common HTTP status codes.
///
/// Handlers may still set any numeric code through [`Response::set_status`];
/// this enum only names the ones the server itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use netcore::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("response already has {max} headers", max = MAX_HEADERS)]
    TooManyHeaders,
}

/// An HTTP response under construction by a handler.
///
/// Starts as `200 OK` with no headers and no body. When a JSON body is set
/// it takes precedence over the text body at serialization time.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub status_message: String,
    /// Headers in the order they were added
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub json_body: Option<Value>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: StatusCode::Ok.as_u16(),
            status_message: StatusCode::Ok.reason_phrase().to_string(),
            headers: Vec::new(),
            body: None,
            json_body: None,
        }
    }

    /// A fresh response carrying `message` as both reason phrase and
    /// plain-text body.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            status_code: code,
            status_message: message.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Some(message.to_string()),
            json_body: None,
        }
    }

    /// 400 response for requests the parser rejected.
    pub fn bad_request() -> Self {
        let mut response = Self::error(
            StatusCode::BadRequest.as_u16(),
            "Bad Request: Invalid HTTP Request",
        );
        response.status_message = StatusCode::BadRequest.reason_phrase().to_string();
        response
    }

    pub fn set_status(&mut self, code: u16, message: impl Into<String>) {
        self.status_code = code;
        self.status_message = message.into();
    }

    pub fn set_status_code(&mut self, status: StatusCode) {
        self.set_status(status.as_u16(), status.reason_phrase());
    }

    /// Appends a header. Duplicates are kept.
    pub fn add_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        if self.headers.len() >= MAX_HEADERS {
            return Err(ResponseError::TooManyHeaders);
        }
        self.headers.push((name.into(), value.into()));
        Ok(())
    }

    /// Sets a plain-text body and adds `Content-Type: text/plain`.
    pub fn set_body(&mut self, body: impl Into<String>) -> Result<(), ResponseError> {
        self.add_header("Content-Type", "text/plain")?;
        self.body = Some(body.into());
        Ok(())
    }

    /// Sets a JSON body and adds `Content-Type: application/json`.
    ///
    /// # Example
    ///
    /// ```
    /// # use netcore::http::response::Response;
    /// let mut res = Response::new();
    /// res.set_json_body(serde_json::json!({"id": 42})).unwrap();
    /// assert_eq!(res.body.as_deref(), Some(r#"{"id":42}"#));
    /// ```
    pub fn set_json_body(&mut self, json: Value) -> Result<(), ResponseError> {
        self.add_header("Content-Type", "application/json")?;
        self.body = Some(json.to_string());
        self.json_body = Some(json);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Turns `response` into an error reply: `code`, with `message` as reason
/// phrase and as plain-text body.
pub fn send_error(response: &mut Response, code: u16, message: &str) -> Result<(), ResponseError> {
    response.set_status(code, message);
    response.set_body(message)
}
