use axum::http::HeaderMap;

/// An empty `api_keys` list means the deployment has opted out of auth
/// entirely (local/dev use) — every request passes (§7).
pub fn check_http(api_keys: &[String], headers: &HeaderMap, query_api_key: Option<&str>) -> bool {
    if api_keys.is_empty() {
        return true;
    }
    let header_key = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    match header_key.or(query_api_key) {
        Some(key) => api_keys.iter().any(|k| k == key),
        None => false,
    }
}

/// WebSocket upgrades can't set custom headers from a browser, so the key is
/// also accepted as a `?api_key=` query parameter (§4.9).
pub fn check_ws(api_keys: &[String], query_api_key: Option<&str>) -> bool {
    if api_keys.is_empty() {
        return true;
    }
    match query_api_key {
        Some(key) => api_keys.iter().any(|k| k == key),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_list_means_unauthenticated_deployment() {
        assert!(check_http(&[], &HeaderMap::new(), None));
    }

    #[test]
    fn rejects_missing_key_when_keys_configured() {
        let keys = vec!["secret".to_string()];
        assert!(!check_http(&keys, &HeaderMap::new(), None));
    }

    #[test]
    fn accepts_matching_query_param_for_websocket() {
        let keys = vec!["secret".to_string()];
        assert!(check_ws(&keys, Some("secret")));
        assert!(!check_ws(&keys, Some("wrong")));
    }
}
