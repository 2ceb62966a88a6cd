use crate::http::request::{Method, Request};
use crate::http::{MAX_HEADERS, MAX_QUERY_PARAMS, READ_BUFFER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("request exceeds {max} bytes", max = READ_BUFFER_SIZE)]
    TooLarge,
    #[error("more than {max} headers", max = MAX_HEADERS)]
    TooManyHeaders,
    #[error("more than {max} query parameters", max = MAX_QUERY_PARAMS)]
    TooManyQueryParams,
}

const HTTP_VERSION: &str = "HTTP/1.1";

/// Parses one buffered HTTP/1.1 request.
///
/// The request line must be `METHOD SP TARGET SP HTTP/1.1 CRLF`; any other
/// version token is rejected. Header lines
/// without a colon are skipped. Everything after the first blank line is the
/// body; an empty body is stored as `None`.
pub fn parse_http_request(buf: &[u8]) -> Result<Request, ParseError> {
    if buf.len() > READ_BUFFER_SIZE {
        return Err(ParseError::TooLarge);
    }

    let text = String::from_utf8_lossy(buf);
    // A NUL ends the request text.
    let text = text.split('\0').next().unwrap_or_default();

    let line_end = text.find("\r\n").ok_or(ParseError::InvalidRequestLine)?;
    let (method, target, version) = parse_request_line(&text[..line_end])?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let query_params = match query {
        Some(query) => parse_query(query)?,
        None => Vec::new(),
    };

    let headers = parse_headers(&text[line_end + 2..])?;

    let body = text
        .find("\r\n\r\n")
        .map(|idx| &text[idx + 4..])
        .filter(|body| !body.is_empty())
        .map(str::to_string);

    let json_body = body.as_deref().and_then(|body| match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::trace!(error = %e, "request body is not JSON");
            None
        }
    });

    Ok(Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        query_params,
        body,
        json_body,
        path_params: Vec::new(),
        id: None,
    })
}

fn parse_request_line(line: &str) -> Result<(Method, &str, &str), ParseError> {
    let (method, rest) = line.split_once(' ').ok_or(ParseError::InvalidRequestLine)?;
    let (target, version) = rest.split_once(' ').ok_or(ParseError::InvalidRequestLine)?;

    if target.is_empty() || version != HTTP_VERSION {
        return Err(ParseError::InvalidRequestLine);
    }

    Ok((Method::from_token(method), target, version))
}

/// Splits `query` on `&`. Empty tokens and tokens without `=` are skipped;
/// values are kept undecoded.
pub fn parse_query(query: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut params = Vec::new();

    for (name, value) in query
        .split('&')
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.split_once('='))
    {
        if params.len() == MAX_QUERY_PARAMS {
            return Err(ParseError::TooManyQueryParams);
        }
        params.push((name.to_string(), value.to_string()));
    }

    Ok(params)
}

/// Reads header lines until the blank line. The value is everything after
/// the first colon, minus one optional leading space.
fn parse_headers(mut rest: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut headers = Vec::new();

    while !rest.is_empty() && !rest.starts_with('\r') {
        let Some(line_end) = rest.find("\r\n") else {
            break;
        };
        let line = &rest[..line_end];
        rest = &rest[line_end + 2..];

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }

        let value = value.strip_prefix(' ').unwrap_or(value);
        headers.push((name.to_string(), value.to_string()));
    }

    Ok(headers)
}
