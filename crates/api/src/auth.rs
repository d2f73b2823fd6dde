//! Principal and client address extraction.
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the verified caller as `x-user-id` and `x-user-role`.

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::UserId;
use domain::{Principal, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn principal_from_headers(headers: &HeaderMap) -> Result<Option<Principal>, ApiError> {
    let Some(raw_id) = header(headers, USER_ID_HEADER) else {
        return Ok(None);
    };
    let user_id: UserId = raw_id
        .parse()
        .map_err(|e| ApiError::Unauthorized(format!("{e}")))?;
    let role = match header(headers, USER_ROLE_HEADER) {
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
        None => Role::Customer,
    };
    Ok(Some(Principal { user_id, role }))
}

/// The signed-in caller. Rejects with 401 when absent.
#[derive(Debug, Clone, Copy)]
pub struct Auth(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers)?
            .map(Auth)
            .ok_or_else(|| ApiError::Unauthorized("sign-in required".to_string()))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(principal_from_headers(&parts.headers)?.map(Auth))
    }
}

/// The caller's address as reported by the reverse proxy.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = header(&parts.headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .or_else(|| header(&parts.headers, "x-real-ip"))
            .map(str::to_string);
        Ok(ClientIp(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_principal_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(principal_from_headers(&headers).unwrap().is_none());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("7"));
        let principal = principal_from_headers(&headers).unwrap().unwrap();
        assert_eq!(principal, Principal::customer(UserId::new(7)));

        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert!(principal_from_headers(&headers).unwrap().unwrap().is_admin());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(principal_from_headers(&headers).is_err());
    }
}
