use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use futures::future::BoxFuture;
use http::{Method, StatusCode};
use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::models::user::User;
use crate::session::{SESSION_COOKIE, Session};
use crate::state::AppState;

/// What a handler hands back to the dispatcher.
///
/// An outcome is only rendered when the handler did not finalize the response
/// itself; a response already sent always wins.
pub enum Outcome {
    /// A JSON body, rendered with the response's current status code.
    Json(Value),
    /// A plain-text body, rendered with the response's current status code.
    Text(String),
    /// Nothing to render; the response goes out as the handler left it.
    Empty,
}

/// Everything one dispatch carries: application state, the parsed request,
/// and the shared response, session and authenticated-user slots.
///
/// The locks are plain `std::sync` mutexes; guards are taken for short,
/// synchronous edits and never held across an await point.
#[derive(Clone)]
pub struct Context {
    pub state: AppState,
    pub request: Arc<Request>,
    response: Arc<Mutex<Response>>,
    session: Arc<Mutex<Session>>,
    current_user: Arc<Mutex<Option<User>>>,
}

impl Context {
    fn new(state: AppState, request: Request, session: Session) -> Self {
        Self {
            state,
            request: Arc::new(request),
            response: Arc::new(Mutex::new(Response::new())),
            session: Arc::new(Mutex::new(session)),
            current_user: Arc::new(Mutex::new(None)),
        }
    }

    /// Locks and returns the response.
    pub fn response(&self) -> MutexGuard<'_, Response> {
        self.response.lock().expect("response lock")
    }

    /// Locks and returns the session.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("session lock")
    }

    /// The user set by the authentication middleware, if any.
    pub fn current_user(&self) -> Option<User> {
        self.current_user.lock().expect("current user lock").clone()
    }

    /// Records the authenticated user for downstream middleware and handlers.
    pub fn set_current_user(&self, user: User) {
        *self.current_user.lock().expect("current user lock") = Some(user);
    }
}

type HandlerFuture = BoxFuture<'static, Result<Outcome>>;

/// A type-erased route handler.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

fn into_handler<H, Fut>(handler: H) -> Handler
where
    H: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(handler(ctx)))
}

/// A guard that runs before the handler.
///
/// `Ok(true)` lets the dispatch continue; `Ok(false)` stops it, with the
/// middleware having written the denial onto the response.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool>>;
}

struct Route {
    /// `None` matches every method.
    method: Option<Method>,
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
    handler: Handler,
    middleware: Vec<Arc<dyn Middleware>>,
}

/// The route table and dispatcher.
///
/// Matching is linear and first-match-wins in registration order; there is no
/// specificity ranking. Literal routes must be registered before parameterized
/// ones that would shadow them.
pub struct Router {
    routes: Vec<Route>,
    registry: HashMap<String, Arc<dyn Middleware>>,
    prefix_stack: Vec<String>,
    api_prefix: String,
}

impl Router {
    pub fn new(api_prefix: &str) -> Self {
        Self {
            routes: Vec::new(),
            registry: HashMap::new(),
            prefix_stack: Vec::new(),
            api_prefix: api_prefix.to_string(),
        }
    }

    /// Makes a middleware available to routes under the given name.
    pub fn register_middleware(&mut self, name: &str, middleware: Arc<dyn Middleware>) {
        self.registry.insert(name.to_string(), middleware);
    }

    /// Registers routes under a path prefix.
    pub fn group<F>(&mut self, prefix: &str, register: F) -> Result<()>
    where
        F: FnOnce(&mut Router) -> Result<()>,
    {
        self.prefix_stack.push(prefix.to_string());
        let result = register(self);
        self.prefix_stack.pop();
        result
    }

    /// Registers routes under the configured API prefix.
    pub fn api<F>(&mut self, register: F) -> Result<()>
    where
        F: FnOnce(&mut Router) -> Result<()>,
    {
        let prefix = self.api_prefix.clone();
        self.group(&prefix, register)
    }

    pub fn get<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(Some(Method::GET), path, into_handler(handler), middleware)
    }

    pub fn post<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(Some(Method::POST), path, into_handler(handler), middleware)
    }

    pub fn put<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(Some(Method::PUT), path, into_handler(handler), middleware)
    }

    pub fn patch<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(Some(Method::PATCH), path, into_handler(handler), middleware)
    }

    pub fn delete<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(Some(Method::DELETE), path, into_handler(handler), middleware)
    }

    /// Registers a handler for every HTTP method.
    pub fn any<H, Fut>(&mut self, path: &str, handler: H, middleware: &[&str]) -> Result<()>
    where
        H: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.add(None, path, into_handler(handler), middleware)
    }

    /// Route registration. Middleware names resolve here, so a typo fails at
    /// startup instead of on the first matching request.
    fn add(
        &mut self,
        method: Option<Method>,
        path: &str,
        handler: Handler,
        middleware_names: &[&str],
    ) -> Result<()> {
        let pattern = normalize_path(&format!("{}{}", self.prefix_stack.concat(), path));
        let (regex, param_names) = compile_pattern(&pattern)?;

        let mut middleware = Vec::with_capacity(middleware_names.len());
        for name in middleware_names {
            let resolved = self.registry.get(*name).ok_or_else(|| {
                AppError::Router(format!("Unknown middleware '{name}' on route '{pattern}'"))
            })?;
            middleware.push(resolved.clone());
        }

        self.routes.push(Route {
            method,
            pattern,
            regex,
            param_names,
            handler,
            middleware,
        });
        Ok(())
    }

    /// Runs one request through matching, middleware and the handler, and
    /// returns the finalized response.
    pub async fn dispatch(&self, state: &AppState, mut request: Request) -> Response {
        let path = normalize_path(request.path());

        let matched = self.routes.iter().find_map(|route| {
            if let Some(method) = &route.method {
                if method != request.method() {
                    return None;
                }
            }
            route.regex.captures(&path).map(|captures| {
                let params = route
                    .param_names
                    .iter()
                    .enumerate()
                    .map(|(index, name)| {
                        let value = captures
                            .get(index + 1)
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default();
                        (name.clone(), value)
                    })
                    .collect::<Vec<_>>();
                (route, params)
            })
        });

        let Some((route, params)) = matched else {
            return not_found_response(&request);
        };

        tracing::debug!(
            method = %request.method(),
            path = %path,
            pattern = %route.pattern,
            "Dispatching request"
        );

        request.set_params(params);
        let session = state
            .sessions
            .open(request.cookie(SESSION_COOKIE), request.is_secure());
        let ctx = Context::new(state.clone(), request, session);

        let result = self.run(route, &ctx).await;
        self.finalize(&ctx, result);

        let mut response = std::mem::take(&mut *ctx.response());
        ctx.session().persist(&mut response);
        response
    }

    async fn run(&self, route: &Route, ctx: &Context) -> Result<Option<Outcome>> {
        for middleware in &route.middleware {
            if !middleware.handle(ctx).await? {
                return Ok(None);
            }
        }
        (route.handler)(ctx.clone()).await.map(Some)
    }

    /// Renders the handler result onto the response, unless it was already
    /// finalized. The first send always wins.
    fn finalize(&self, ctx: &Context, result: Result<Option<Outcome>>) {
        let environment = ctx.state.config.environment;
        let mut response = ctx.response();

        match result {
            Ok(Some(outcome)) => {
                if !response.is_sent() {
                    match outcome {
                        Outcome::Json(value) => {
                            response.json(&value);
                        }
                        Outcome::Text(text) => {
                            let status = response.status();
                            response.text(&text, status);
                        }
                        Outcome::Empty => {}
                    }
                }
            }
            // A middleware denied the request, normally writing the refusal
            // itself; a silent denial still gets a generic one.
            Ok(None) => {
                if !response.is_sent() {
                    response.forbidden("Access forbidden");
                }
            }
            Err(err) => {
                if err.is_unexpected() {
                    tracing::error!(
                        error = %err,
                        path = %ctx.request.path(),
                        "❌ Unhandled error during dispatch"
                    );
                } else {
                    tracing::debug!(error = %err, path = %ctx.request.path(), "Request failed");
                }
                if !response.is_sent() {
                    let status = err.status_code();
                    response.error(&err.public_message(environment), status);
                }
            }
        }
        response.send();
    }
}

/// Ensures a leading slash and strips the trailing one, so `/users/` and
/// `/users` register and match identically. The root stays `/`.
fn normalize_path(path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Compiles a route pattern into an anchored regex.
///
/// The pattern is escaped literally, then each `{name}` placeholder becomes a
/// `([^/]+)` capture group. Names are returned in declaration order.
fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>)> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\\\{([A-Za-z_][A-Za-z0-9_]*)\\\}").expect("placeholder regex")
    });

    let escaped = regex::escape(pattern);
    let mut param_names = Vec::new();
    for captures in placeholder.captures_iter(&escaped) {
        param_names.push(captures[1].to_string());
    }
    let body = placeholder.replace_all(&escaped, "([^/]+)");

    let regex = Regex::new(&format!("^{body}$"))
        .map_err(|e| AppError::Router(format!("Invalid route pattern '{pattern}': {e}")))?;
    Ok((regex, param_names))
}

/// The response for an unmatched path: a JSON envelope for API and AJAX
/// callers, a minimal HTML page for everyone else.
fn not_found_response(request: &Request) -> Response {
    let mut response = Response::new();
    if request.is_api() || request.is_ajax() {
        response.not_found("Resource not found");
    } else {
        response.set_status(StatusCode::NOT_FOUND);
        response.set_body(
            "<!DOCTYPE html><html><head><title>404</title></head>\
             <body><h1>404 - Page not found</h1></body></html>"
                .as_bytes()
                .to_vec(),
        );
    }
    response.send();
    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn ok_handler(_ctx: Context) -> Result<Outcome> {
        Ok(Outcome::Json(json!({"ok": true})))
    }

    fn request(method: Method, uri: &str) -> Request {
        Request::builder(method, uri).build()
    }

    #[tokio::test]
    async fn extracts_params_in_declaration_order() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .get(
                "/careers/{career}/students/{student}",
                |ctx: Context| async move {
                    let career = ctx.request.param("career").unwrap_or("").to_string();
                    let student = ctx.request.param("student").unwrap_or("").to_string();
                    Ok(Outcome::Json(json!({"career": career, "student": student})))
                },
                &[],
            )
            .expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/careers/7/students/42"))
            .await;
        let body = response.body_json().expect("json");
        assert_eq!(body["career"], "7");
        assert_eq!(body["student"], "42");
    }

    #[tokio::test]
    async fn first_registered_match_wins_over_later_literals() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .get(
                "/users/{id}",
                |ctx: Context| async move {
                    let id = ctx.request.param("id").unwrap_or("").to_string();
                    Ok(Outcome::Json(json!({"matched": "by-id", "id": id})))
                },
                &[],
            )
            .expect("register");
        router
            .get(
                "/users/new",
                |_ctx: Context| async move { Ok(Outcome::Json(json!({"matched": "new"}))) },
                &[],
            )
            .expect("register");

        // Registration order decides: the parameterized route shadows the
        // literal one registered after it.
        let response = router
            .dispatch(&state, request(Method::GET, "/users/new"))
            .await;
        let body = response.body_json().expect("json");
        assert_eq!(body["matched"], "by-id");
        assert_eq!(body["id"], "new");
    }

    #[tokio::test]
    async fn trailing_slashes_are_equivalent() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router.get("/health", ok_handler, &[]).expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/health/"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn text_outcome_renders_plain_text() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .get(
                "/ping",
                |_ctx: Context| async move { Ok(Outcome::Text("pong".to_string())) },
                &[],
            )
            .expect("register");

        let response = router.dispatch(&state, request(Method::GET, "/ping")).await;
        assert_eq!(response.body(), b"pong");
        assert!(
            response
                .headers()
                .get("content-type")
                .expect("content type")
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn a_sent_response_beats_the_returned_outcome() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .get(
                "/first-wins",
                |ctx: Context| async move {
                    ctx.response().error("already sent", StatusCode::CONFLICT);
                    ctx.response().send();
                    Ok(Outcome::Json(json!({"late": true})))
                },
                &[],
            )
            .expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/first-wins"))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.body_json().expect("json")["message"], "already sent");
    }

    #[tokio::test]
    async fn unmatched_api_path_gets_a_json_envelope() {
        let state = AppState::for_tests().await;
        let router = Router::new("/api/v1");
        let response = router
            .dispatch(&state, request(Method::GET, "/api/v1/nope"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body_json().expect("json")["status"], "error");
    }

    #[tokio::test]
    async fn unmatched_browser_path_gets_html() {
        let state = AppState::for_tests().await;
        let router = Router::new("/api/v1");
        let response = router
            .dispatch(&state, request(Method::GET, "/nope"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(response.body()).contains("<h1>404"));
    }

    #[tokio::test]
    async fn method_mismatch_is_not_found() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router.get("/only-get", ok_handler, &[]).expect("register");

        let response = router
            .dispatch(&state, request(Method::POST, "/only-get"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    struct DenyAll;

    impl Middleware for DenyAll {
        fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async move {
                ctx.response().unauthorized("Authentication required");
                ctx.response().send();
                Ok(false)
            })
        }
    }

    #[tokio::test]
    async fn middleware_denial_short_circuits_the_handler() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router.register_middleware("deny", Arc::new(DenyAll));
        router
            .get(
                "/guarded",
                |_ctx: Context| async move {
                    panic!("handler must not run");
                    #[allow(unreachable_code)]
                    Ok(Outcome::Empty)
                },
                &["deny"],
            )
            .expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/guarded"))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_middleware_fails_at_registration() {
        let mut router = Router::new("/api/v1");
        let err = router
            .get("/guarded", ok_handler, &["no-such-guard"])
            .expect_err("registration must fail");
        assert!(matches!(err, AppError::Router(_)));
        assert!(err.to_string().contains("no-such-guard"));
    }

    #[tokio::test]
    async fn group_prefixes_stack() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .api(|api| {
                api.group("/admin", |admin| admin.get("/stats", ok_handler, &[]))
            })
            .expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/api/v1/admin/stats"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn app_error_becomes_its_envelope() {
        let state = AppState::for_tests().await;
        let mut router = Router::new("/api/v1");
        router
            .get(
                "/api/v1/boom",
                |_ctx: Context| async move {
                    Err::<Outcome, _>(AppError::Validation("name is required".to_string()))
                },
                &[],
            )
            .expect("register");

        let response = router
            .dispatch(&state, request(Method::GET, "/api/v1/boom"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.body_json().expect("json");
        assert_eq!(body["message"], "name is required");
        assert_eq!(body["code"], 400);
    }
}
