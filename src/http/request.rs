use std::collections::HashMap;
use std::net::IpAddr;

use http::{HeaderMap, Method, Uri, header};
use serde_json::{Map, Value};

/// An uploaded file attached to a request.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The inbound HTTP request, normalized for handlers.
///
/// Constructed once per inbound call and read-only to handlers, except for the
/// path parameters which the dispatcher injects after route matching.
#[derive(Debug, Default)]
pub struct Request {
    method: Method,
    uri: String,
    path: String,
    params: Vec<(String, String)>,
    query: HashMap<String, String>,
    body: Map<String, Value>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
    remote_ip: Option<IpAddr>,
    secure: bool,
    is_ajax: bool,
    is_api: bool,
}

impl Request {
    /// Builds a `Request` from the raw parts of an HTTP transaction.
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method.
    /// * `uri` - The full request URI.
    /// * `headers` - The request headers.
    /// * `body` - The raw request body.
    /// * `remote_ip` - The peer address, if known.
    /// * `secure` - Whether the transport was encrypted.
    /// * `api_prefix` - The URI prefix identifying API routes.
    pub fn from_parts(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: &[u8],
        remote_ip: Option<IpAddr>,
        secure: bool,
        api_prefix: &str,
    ) -> Self {
        let path = uri.path().to_string();

        let query: HashMap<String, String> =
            url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
                .into_owned()
                .collect();

        let body_params = parse_body(&headers, body);

        let cookies = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(parse_cookies)
            .unwrap_or_default();

        let is_ajax = headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

        let is_api = path.starts_with(api_prefix);

        // Forms tunnel PUT/PATCH/DELETE through POST with a _method field.
        let method = if method == Method::POST {
            body_params
                .get("_method")
                .and_then(Value::as_str)
                .and_then(|m| m.to_uppercase().parse::<Method>().ok())
                .unwrap_or(method)
        } else {
            method
        };

        Self {
            method,
            uri: uri.to_string(),
            path,
            params: Vec::new(),
            query,
            body: body_params,
            headers,
            cookies,
            files: HashMap::new(),
            remote_ip,
            secure,
            is_ajax,
            is_api,
        }
    }

    /// Starts building a request by hand, used by tests and embedders.
    pub fn builder(method: Method, uri: &str) -> RequestBuilder {
        RequestBuilder::new(method, uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Injects matched path parameters, in pattern declaration order.
    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// A single path parameter by placeholder name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body_params(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn body_param(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// A body parameter as a trimmed string, if present and textual.
    pub fn body_str(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str).map(str::trim)
    }

    /// Looks an input up across path params, body and query string, in that
    /// order of precedence.
    pub fn input(&self, name: &str) -> Option<String> {
        if let Some(value) = self.param(name) {
            return Some(value.to_string());
        }
        if let Some(value) = self.body.get(name) {
            return Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        self.query.get(name).cloned()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.files
    }

    /// Extracts the bearer token from the `Authorization` header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") {
            let token = token.trim();
            (!token.is_empty()).then_some(token)
        } else {
            None
        }
    }

    /// The client address, preferring `X-Forwarded-For` over the peer address.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip.to_string();
                }
            }
        }
        self.remote_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn is_ajax(&self) -> bool {
        self.is_ajax
    }

    pub fn is_api(&self) -> bool {
        self.is_api
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Parses the body according to its content type into a flat parameter map.
fn parse_body(headers: &HeaderMap, body: &[u8]) -> Map<String, Value> {
    if body.is_empty() {
        return Map::new();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("raw".to_string(), other);
                map
            }
            // Malformed JSON is treated as an empty body; the handler's
            // required-field validation produces the client-facing error.
            Err(_) => Map::new(),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .into_owned()
            .map(|(key, value)| (key, Value::String(value)))
            .collect()
    } else {
        let mut map = Map::new();
        map.insert(
            "raw".to_string(),
            Value::String(String::from_utf8_lossy(body).into_owned()),
        );
        map
    }
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// A by-hand request constructor.
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Vec<u8>,
    remote_ip: Option<IpAddr>,
    secure: bool,
    api_prefix: String,
}

impl RequestBuilder {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            remote_ip: None,
            secure: false,
            api_prefix: "/api/v1".to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Sets a JSON body and the matching content type.
    pub fn json(mut self, body: &Value) -> Self {
        self.body = serde_json::to_vec(body).unwrap_or_default();
        self.header("content-type", "application/json")
    }

    pub fn cookie(self, name: &str, value: &str) -> Self {
        let merged = match self.headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}; {name}={value}"),
            None => format!("{name}={value}"),
        };
        self.header("cookie", &merged)
    }

    pub fn remote_ip(mut self, ip: IpAddr) -> Self {
        self.remote_ip = Some(ip);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn api_prefix(mut self, prefix: &str) -> Self {
        self.api_prefix = prefix.to_string();
        self
    }

    pub fn build(self) -> Request {
        let uri: Uri = self.uri.parse().unwrap_or_else(|_| Uri::from_static("/"));
        Request::from_parts(
            self.method,
            &uri,
            self.headers,
            &self.body,
            self.remote_ip,
            self.secure,
            &self.api_prefix,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_query_and_json_body() {
        let req = Request::builder(Method::POST, "/api/v1/users?page=2&search=ana")
            .json(&json!({"email": "a@b.cl", "password": "secret123"}))
            .build();

        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.body_str("email"), Some("a@b.cl"));
        assert!(req.is_api());
        assert!(!req.is_ajax());
    }

    #[test]
    fn input_prefers_path_params_over_body_and_query() {
        let mut req = Request::builder(Method::POST, "/things?id=from-query")
            .json(&json!({"id": "from-body"}))
            .build();
        assert_eq!(req.input("id").as_deref(), Some("from-body"));

        req.set_params(vec![("id".to_string(), "from-path".to_string())]);
        assert_eq!(req.input("id").as_deref(), Some("from-path"));
    }

    #[test]
    fn bearer_token_requires_bearer_scheme() {
        let req = Request::builder(Method::GET, "/")
            .header("authorization", "Bearer abc.def")
            .build();
        assert_eq!(req.bearer_token(), Some("abc.def"));

        let req = Request::builder(Method::GET, "/")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .build();
        assert_eq!(req.bearer_token(), None);
    }

    #[test]
    fn method_override_applies_to_form_posts_only() {
        let body = b"_method=DELETE&id=4";
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().expect("header"),
        );
        let uri: Uri = "/users/4".parse().expect("uri");
        let req = Request::from_parts(Method::POST, &uri, headers, body, None, false, "/api/v1");
        assert_eq!(req.method(), &Method::DELETE);
    }

    #[test]
    fn cookies_are_split_on_semicolons() {
        let req = Request::builder(Method::GET, "/")
            .cookie("session", "abc")
            .cookie("theme", "dark")
            .build();
        assert_eq!(req.cookie("session"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie("missing"), None);
    }
}
