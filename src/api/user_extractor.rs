use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use crate::config::AuthConfig;
use crate::model::{UserContext, UserRole};

/// Axum extractor for UserContext from request headers
///
/// This extractor looks for user information in request headers:
/// - X-User-Id: user identifier (required)
/// - X-User-Role: role name (`admin`, `staff`, ...); defaults to `student`
/// - X-User-Email: Optional user email
/// - X-User-Name: Optional user display name
///
/// A request without X-User-Id is rejected with 401, unless the router was
/// built with `AuthConfig::allow_dev_user`, in which case it runs as the
/// development admin.
#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let Some(user_id) = extract_header_value(headers, "x-user-id") else {
            let allow_dev_user = parts
                .extensions
                .get::<AuthConfig>()
                .map_or(false, |auth| auth.allow_dev_user);
            if allow_dev_user {
                return Ok(UserContext::default_user());
            }
            return Err(StatusCode::UNAUTHORIZED);
        };

        let role = match extract_header_value(headers, "x-user-role") {
            Some(value) => UserRole::parse(&value).ok_or(StatusCode::BAD_REQUEST)?,
            None => UserRole::Student,
        };
        let user_email = extract_header_value(headers, "x-user-email");
        let user_name = extract_header_value(headers, "x-user-name");

        Ok(UserContext::with_details(user_id, user_email, user_name, role))
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}
