use std::collections::BTreeMap;

use http::StatusCode;
use serde_json::{Value, json};

/// A cookie queued on the response.
#[derive(Clone, Debug)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; zero or negative expires the cookie client-side.
    pub max_age_secs: i64,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl ResponseCookie {
    pub fn new(name: &str, value: &str, max_age_secs: i64) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age_secs,
            path: "/".to_string(),
            http_only: true,
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Serializes the cookie as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut value = format!(
            "{}={}; Max-Age={}; Path={}; SameSite=Lax",
            self.name, self.value, self.max_age_secs, self.path
        );
        if self.http_only {
            value.push_str("; HttpOnly");
        }
        if self.secure {
            value.push_str("; Secure");
        }
        value
    }
}

/// The outbound HTTP response.
///
/// Handlers mutate status, headers, cookies and body; `send` transitions the
/// response to its final state exactly once, after which every mutation is a
/// no-op.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    cookies: Vec<ResponseCookie>,
    sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "cache-control".to_string(),
            "no-store, no-cache, must-revalidate, max-age=0".to_string(),
        );
        headers.insert("x-frame-options".to_string(), "SAMEORIGIN".to_string());
        headers.insert("x-content-type-options".to_string(), "nosniff".to_string());
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=UTF-8".to_string(),
        );

        Self {
            status: StatusCode::OK,
            headers,
            body: Vec::new(),
            cookies: Vec::new(),
            sent: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        if !self.sent {
            self.status = status;
        }
        self
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if !self.sent {
            self.headers
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        if !self.sent {
            self.headers.remove(&name.to_ascii_lowercase());
        }
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.set_header("content-type", &format!("{content_type}; charset=UTF-8"))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        if !self.sent {
            self.body = body.into();
        }
        self
    }

    pub fn cookies(&self) -> &[ResponseCookie] {
        &self.cookies
    }

    pub fn set_cookie(&mut self, cookie: ResponseCookie) -> &mut Self {
        if !self.sent {
            self.cookies.retain(|c| c.name != cookie.name);
            self.cookies.push(cookie);
        }
        self
    }

    /// Queues a client-side expiry for the named cookie.
    pub fn remove_cookie(&mut self, name: &str) -> &mut Self {
        self.set_cookie(ResponseCookie::new(name, "", 0))
    }

    /// Queues a cookie bypassing the sent guard. Session persistence runs
    /// after handlers and its cookie must land even on finalized responses.
    pub(crate) fn force_set_cookie(&mut self, cookie: ResponseCookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    /// Sets a JSON body, leaving the status code untouched.
    pub fn json(&mut self, data: &Value) -> &mut Self {
        let body = serde_json::to_vec(data).unwrap_or_else(|_| b"{}".to_vec());
        self.set_content_type("application/json");
        self.set_body(body)
    }

    /// A success envelope with optional payload.
    pub fn success(&mut self, data: Option<Value>, message: &str) -> &mut Self {
        let mut envelope = json!({
            "status": "success",
            "message": message,
        });
        if let Some(data) = data {
            envelope["data"] = data;
        }
        self.set_status(StatusCode::OK);
        self.json(&envelope)
    }

    /// An error envelope with the given status code.
    pub fn error(&mut self, message: &str, status: StatusCode) -> &mut Self {
        self.set_status(status);
        self.json(&json!({
            "status": "error",
            "code": status.as_u16(),
            "message": message,
        }))
    }

    /// A 422 envelope carrying per-field validation errors.
    pub fn validation_error(&mut self, errors: Value, message: &str) -> &mut Self {
        self.set_status(StatusCode::UNPROCESSABLE_ENTITY);
        self.json(&json!({
            "status": "error",
            "code": StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
            "message": message,
            "errors": errors,
        }))
    }

    pub fn not_found(&mut self, message: &str) -> &mut Self {
        self.error(message, StatusCode::NOT_FOUND)
    }

    pub fn unauthorized(&mut self, message: &str) -> &mut Self {
        self.error(message, StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden(&mut self, message: &str) -> &mut Self {
        self.error(message, StatusCode::FORBIDDEN)
    }

    pub fn server_error(&mut self, message: &str) -> &mut Self {
        self.error(message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// A plain-text body.
    pub fn text(&mut self, message: &str, status: StatusCode) -> &mut Self {
        self.set_status(status);
        self.set_content_type("text/plain");
        self.set_body(message.as_bytes().to_vec())
    }

    /// Queues a redirect and finalizes the response.
    pub fn redirect(&mut self, url: &str) -> &mut Self {
        self.set_status(StatusCode::FOUND);
        self.set_header("location", url);
        self.set_body(Vec::new());
        self.send();
        self
    }

    /// Finalizes the response. The first call wins; later calls are no-ops.
    pub fn send(&mut self) {
        self.sent = true;
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Parses the body back into JSON, for assertions in tests.
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_after_send_is_ignored() {
        let mut res = Response::new();
        res.success(None, "done");
        res.send();

        res.set_status(StatusCode::IM_A_TEAPOT);
        res.set_body(b"late".to_vec());
        res.set_cookie(ResponseCookie::new("x", "y", 60));

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body_json().expect("json")["message"], "done");
        assert!(res.cookies().is_empty());
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let mut res = Response::new();
        res.error("Invalid credentials", StatusCode::UNAUTHORIZED);
        let body = res.body_json().expect("json");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
        assert_eq!(body["message"], "Invalid credentials");
    }

    #[test]
    fn removing_a_cookie_queues_a_zero_max_age() {
        let mut res = Response::new();
        res.set_cookie(ResponseCookie::new("session", "abc", 3600));
        res.remove_cookie("session");

        assert_eq!(res.cookies().len(), 1);
        let header = res.cookies()[0].to_header_value();
        assert!(header.contains("Max-Age=0"));
        assert!(header.contains("HttpOnly"));
    }
}
