use server_proxy::config::{RouteConfig, ServerConfig};
use server_proxy::http::Method;
use server_proxy::router::RoutingError;

fn route(path: &str, methods: &[Method]) -> RouteConfig {
    RouteConfig {
        path: path.to_string(),
        methods: methods.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

fn server(routes: Vec<RouteConfig>) -> ServerConfig {
    ServerConfig {
        routes,
        ..Default::default()
    }
}

#[test]
fn test_router_simple_match() {
    let cfg = server(vec![route("/", &[Method::GET])]);
    let result = cfg.find_route("/", &Method::GET);
    assert!(result.is_ok());
    assert_eq!(result.unwrap().path, "/");
}

#[test]
fn test_router_falls_back_to_shortest_covering_prefix() {
    let cfg = server(vec![route("/", &[Method::GET])]);
    // "/" still matches anything, since it's a prefix of every path.
    let result = cfg.find_route("/unconfigured", &Method::GET);
    assert!(result.is_ok());
    assert_eq!(result.unwrap().path, "/");
}

#[test]
fn test_router_longest_prefix_match() {
    let cfg = server(vec![
        route("/a", &[Method::GET]),
        route("/a/b", &[Method::GET]),
    ]);
    let result = cfg.find_route("/a/b/c", &Method::GET);
    assert!(result.is_ok());
    assert_eq!(result.unwrap().path, "/a/b");
}

#[test]
fn test_router_method_not_allowed() {
    let cfg = server(vec![route("/", &[Method::GET])]);
    let result = cfg.find_route("/", &Method::POST);
    assert!(result.is_err());
    assert!(matches!(result.unwrap_err(), RoutingError::MethodNotAllowed));
}

#[test]
fn test_router_path_not_found() {
    let cfg = server(vec![route("/a", &[Method::GET])]);
    let result = cfg.find_route("/b", &Method::GET);
    assert!(result.is_err());
    assert!(matches!(result.unwrap_err(), RoutingError::NotFound));
}

#[test]
fn test_router_method_not_allowed_beats_shorter_match() {
    // "/api" only allows GET, "/api/admin" only allows POST. A GET on
    // "/api/admin" must report MethodNotAllowed on the longest prefix,
    // not silently fall back to "/api".
    let cfg = server(vec![
        route("/api", &[Method::GET]),
        route("/api/admin", &[Method::POST]),
    ]);
    let result = cfg.find_route("/api/admin/users", &Method::GET);
    assert!(result.is_err());
    assert!(matches!(result.unwrap_err(), RoutingError::MethodNotAllowed));
}
