use crate::model::UserRole;
use serde::{Deserialize, Serialize};

/// Acting user extracted from request headers. The store's access rules
/// decide what this user may write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub role: UserRole,
}

impl UserContext {
    pub fn new(user_id: String, role: UserRole) -> Self {
        Self {
            user_id,
            user_email: None,
            user_name: None,
            role,
        }
    }

    pub fn with_details(
        user_id: String,
        email: Option<String>,
        name: Option<String>,
        role: UserRole,
    ) -> Self {
        Self {
            user_id,
            user_email: email,
            user_name: name,
            role,
        }
    }

    /// Create a system user context for internal operations
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_email: Some("system@school-admin.internal".to_string()),
            user_name: Some("System".to_string()),
            role: UserRole::SuperAdmin,
        }
    }

    /// Create a default user context for development/testing
    pub fn default_user() -> Self {
        Self {
            user_id: "dev-user".to_string(),
            user_email: Some("dev@localhost".to_string()),
            user_name: Some("Development User".to_string()),
            role: UserRole::Admin,
        }
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::default_user()
    }
}
