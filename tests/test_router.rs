use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use netcore::http::request::{Method, Request, RequestBuilder};
use netcore::server::router::{MAX_ROUTES, Router, RouterError, match_route};

fn request(method: Method, path: &str) -> Request {
    RequestBuilder::new().method(method).path(path).build().unwrap()
}

fn body_of(router: &Router, method: Method, path: &str) -> (u16, Option<String>) {
    let mut req = request(method, path);
    let res = router.dispatch(&mut req);
    (res.status_code, res.body)
}

#[test]
fn test_match_is_pure_and_deterministic() {
    for _ in 0..3 {
        assert_eq!(
            match_route("/u/{name}/posts/{post}", "/u/ana/posts/7"),
            Some(vec![
                ("name".to_string(), "ana".to_string()),
                ("post".to_string(), "7".to_string()),
            ])
        );
    }
}

#[test]
fn test_match_requires_full_consumption() {
    assert!(match_route("/items/{id}", "/items/").is_none());
    assert!(match_route("/items/{id}", "/items").is_none());
    assert!(match_route("/items", "/items/1").is_none());
    assert!(match_route("", "").is_some());
}

#[test]
fn test_unterminated_placeholder_matches_rest_of_segment() {
    let captures = match_route("/items/{id", "/items/9").unwrap();
    assert_eq!(captures, vec![("id".to_string(), "9".to_string())]);
}

#[test]
fn test_dispatch_first_registered_wins() {
    let mut router = Router::new();
    router
        .register("/items/{id}", Method::GET, |_, res| {
            res.set_body("first")?;
            Ok(())
        })
        .unwrap();
    router
        .register("/items/{id}", Method::GET, |_, res| {
            res.set_body("second")?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body_of(&router, Method::GET, "/items/1").1.as_deref(), Some("first"));
}

#[test]
fn test_dispatch_skips_method_mismatch() {
    let mut router = Router::new();
    router
        .register("/thing", Method::POST, |_, res| {
            res.set_body("post")?;
            Ok(())
        })
        .unwrap();
    router
        .register("/thing", Method::GET, |_, res| {
            res.set_body("get")?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body_of(&router, Method::GET, "/thing").1.as_deref(), Some("get"));
    assert_eq!(body_of(&router, Method::PUT, "/thing").0, 404);
}

#[test]
fn test_route_miss_is_404() {
    let router = Router::new();
    let (status, body) = body_of(&router, Method::GET, "/nowhere");

    assert_eq!(status, 404);
    assert_eq!(body.as_deref(), Some("Route not found"));
}

#[test]
fn test_dispatch_fills_path_params_and_id() {
    let mut router = Router::new();
    router
        .register("/items/{id}", Method::GET, |req, res| {
            res.set_body(format!("id={} raw={}", req.id.unwrap(), req.path_param("id").unwrap()))?;
            Ok(())
        })
        .unwrap();

    let mut req = request(Method::GET, "/items/42");
    let res = router.dispatch(&mut req);

    assert_eq!(res.body.as_deref(), Some("id=42 raw=42"));
    assert_eq!(req.id, Some(42));
    assert_eq!(req.path_param("id"), Some("42"));
}

#[test]
fn test_non_numeric_capture_gives_zero_id() {
    let mut router = Router::new();
    router.register("/users/{name}", Method::GET, |_, _| Ok(())).unwrap();

    let mut req = request(Method::GET, "/users/ana");
    router.dispatch(&mut req);

    assert_eq!(req.id, Some(0));
    assert_eq!(req.path_param("name"), Some("ana"));
}

#[test]
fn test_literal_route_leaves_id_unset() {
    let mut router = Router::new();
    router.register("/hello", Method::GET, |_, _| Ok(())).unwrap();

    let mut req = request(Method::GET, "/hello");
    let res = router.dispatch(&mut req);

    assert_eq!(res.status_code, 200);
    assert_eq!(req.id, None);
}

#[test]
fn test_handler_error_becomes_500() {
    let mut router = Router::new();
    router
        .register("/boom", Method::GET, |_, res| {
            res.set_body("partial")?;
            anyhow::bail!("database unavailable")
        })
        .unwrap();

    let (status, body) = body_of(&router, Method::GET, "/boom");
    assert_eq!(status, 500);
    assert_eq!(body.as_deref(), Some("Internal Server Error"));
}

#[test]
fn test_only_matching_handler_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();

    let counter = Arc::clone(&calls);
    router
        .register("/a", Method::GET, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    router.register("/b", Method::GET, |_, _| Ok(())).unwrap();

    body_of(&router, Method::GET, "/b");
    body_of(&router, Method::GET, "/a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_route_table_limit() {
    let mut router = Router::new();
    for i in 0..MAX_ROUTES {
        router.register(format!("/r{i}"), Method::GET, |_, _| Ok(())).unwrap();
    }

    let err = router.register("/overflow", Method::GET, |_, _| Ok(())).unwrap_err();
    assert_eq!(err, RouterError::TableFull);
    assert_eq!(router.len(), MAX_ROUTES);
}
