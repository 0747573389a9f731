use dealflow_core::config::{ApiKeyRole, GatewayConfig};

/// User id for the legacy token and for unauthenticated setups.
pub const DEFAULT_USER: &str = "default";

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Whose profile and emails the request acts on.
    pub user_id: String,
    pub role: ApiKeyRole,
}

/// Bearer header -> api_keys -> legacy token -> anonymous.
///
/// Returns `None` on auth failure.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>) -> Option<AuthResult> {
    let auth_configured = config.token.is_some() || !config.api_keys.is_empty();

    let Some(bearer) = bearer else {
        // No auth configured = anonymous admin
        return (!auth_configured).then(|| AuthResult {
            user_id: DEFAULT_USER.into(),
            role: ApiKeyRole::Admin,
        });
    };

    if let Some(ak) = config.api_keys.iter().find(|ak| ak.key == bearer) {
        return Some(AuthResult {
            user_id: ak.name.clone(),
            role: ak.role.clone(),
        });
    }

    if config.token.as_deref() == Some(bearer) {
        return Some(AuthResult {
            user_id: DEFAULT_USER.into(),
            role: ApiKeyRole::Admin,
        });
    }

    None
}

/// Check if a role has at least viewer-level access.
pub fn has_viewer_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Viewer | ApiKeyRole::Operator | ApiKeyRole::Admin)
}

/// Check if a role has at least operator-level access.
pub fn has_operator_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Operator | ApiKeyRole::Admin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealflow_core::config::ApiKeyConfig;

    fn gateway(token: Option<&str>, api_keys: Vec<ApiKeyConfig>) -> GatewayConfig {
        GatewayConfig {
            bind: "127.0.0.1:18790".to_string(),
            token: token.map(|s| s.to_string()),
            api_keys,
        }
    }

    fn key(name: &str, key: &str, role: ApiKeyRole) -> ApiKeyConfig {
        ApiKeyConfig {
            name: name.to_string(),
            key: key.to_string(),
            role,
        }
    }

    #[test]
    fn test_no_auth_is_anonymous_admin() {
        let config = gateway(None, vec![]);
        let auth = validate_auth(&config, None).unwrap();
        assert_eq!(auth.user_id, DEFAULT_USER);
        assert_eq!(auth.role, ApiKeyRole::Admin);
        // Bearer with no match
        assert!(validate_auth(&config, Some("anything")).is_none());
    }

    #[test]
    fn test_token_auth() {
        let config = gateway(Some("secret"), vec![]);
        assert!(validate_auth(&config, None).is_none());
        assert!(validate_auth(&config, Some("wrong")).is_none());
        assert_eq!(validate_auth(&config, Some("secret")).unwrap().user_id, DEFAULT_USER);
    }

    #[test]
    fn test_api_key_names_the_user() {
        let config = gateway(
            Some("legacy"),
            vec![key("creator-42", "dk_test123", ApiKeyRole::Operator)],
        );

        let auth = validate_auth(&config, Some("dk_test123")).unwrap();
        assert_eq!(auth.user_id, "creator-42");
        assert_eq!(auth.role, ApiKeyRole::Operator);

        // Legacy token still accepted alongside api_keys
        assert_eq!(validate_auth(&config, Some("legacy")).unwrap().role, ApiKeyRole::Admin);
        assert!(validate_auth(&config, None).is_none());
    }

    #[test]
    fn test_role_levels() {
        assert!(has_viewer_access(&ApiKeyRole::Viewer));
        assert!(!has_operator_access(&ApiKeyRole::Viewer));
        assert!(has_operator_access(&ApiKeyRole::Operator));
        assert!(has_operator_access(&ApiKeyRole::Admin));
    }
}
