use crate::prelude::*;

#[derive(Debug, PartialEq, Eq)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed,
}

/// Picks the route whose `path` is the longest prefix of `url`, the
/// longest-match rule ordinary web servers apply to nested location blocks.
pub fn find_route<'a>(
    routes: &'a [RouteConfig],
    url: &str,
) -> Result<&'a RouteConfig, RoutingError> {
    routes
        .iter()
        .filter(|r| url.starts_with(r.path.as_str()))
        .max_by_key(|r| r.path.len())
        .ok_or(RoutingError::NotFound)
}

impl ServerConfig {
    /// Resolves `url`/`method` against this server's route table.
    ///
    /// A prefix match with no matching method yields `MethodNotAllowed`
    /// rather than falling through to a shorter prefix, matching the
    /// per-location `Allow` semantics of nginx-style configs.
    pub fn find_route(&self, url: &str, method: &Method) -> Result<&RouteConfig, RoutingError> {
        let r_cfg = find_route(&self.routes, url)?;
        if !method.is_allowed(&r_cfg.methods) {
            return Err(RoutingError::MethodNotAllowed);
        }
        Ok(r_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, methods: &[&str]) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
            ..RouteConfig::default()
        }
    }

    fn server(routes: Vec<RouteConfig>) -> ServerConfig {
        ServerConfig {
            routes,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn picks_longest_prefix() {
        let cfg = server(vec![
            route("/", &["GET"]),
            route("/api", &["GET"]),
            route("/api/v1", &["GET"]),
        ]);
        let r = cfg.find_route("/api/v1/users", &Method::GET).unwrap();
        assert_eq!(r.path, "/api/v1");
    }

    #[test]
    fn missing_route_is_not_found() {
        let cfg = server(vec![route("/static", &["GET"])]);
        assert_eq!(
            cfg.find_route("/other", &Method::GET).unwrap_err(),
            RoutingError::NotFound
        );
    }

    #[test]
    fn method_not_allowed_on_matched_prefix() {
        let cfg = server(vec![route("/upload", &["POST"])]);
        assert_eq!(
            cfg.find_route("/upload", &Method::GET).unwrap_err(),
            RoutingError::MethodNotAllowed
        );
    }
}
