use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, header, request::Parts},
    response::Response,
};
use uuid::Uuid;

pub const CART_COOKIE: &str = "cart_id";
const CART_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 30;

/// Anonymous cart id presented by the browser, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartSession {
    pub cookie_cart_id: Option<Uuid>,
}

impl<S> FromRequestParts<S> for CartSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie_cart_id = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(cart_id_from_cookie_header);
        Ok(CartSession { cookie_cart_id })
    }
}

pub fn cart_id_from_cookie_header(raw: &str) -> Option<Uuid> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CART_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn cart_cookie(cart_id: Uuid, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{CART_COOKIE}={cart_id}; HttpOnly; SameSite=Lax; Path=/; Max-Age={CART_COOKIE_MAX_AGE}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    // Only ASCII goes into the cookie string.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Attach `Set-Cookie` when a new cart was created for this request.
pub fn with_cart_cookie(mut response: Response, issued: Option<Uuid>, secure: bool) -> Response {
    if let Some(cart_id) = issued {
        response
            .headers_mut()
            .append(header::SET_COOKIE, cart_cookie(cart_id, secure));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_cart_id_among_cookies() {
        let id = Uuid::new_v4();
        let raw = format!("theme=dark; {CART_COOKIE}={id}; other=1");
        assert_eq!(cart_id_from_cookie_header(&raw), Some(id));
    }

    #[test]
    fn ignores_malformed_cart_id() {
        assert_eq!(cart_id_from_cookie_header("cart_id=not-a-uuid"), None);
        assert_eq!(cart_id_from_cookie_header("xcart_id=1"), None);
        assert_eq!(cart_id_from_cookie_header(""), None);
    }

    #[test]
    fn builds_cookie_attributes() {
        let id = Uuid::nil();
        let cookie = cart_cookie(id, true);
        let text = cookie.to_str().unwrap();
        assert!(text.starts_with(&format!("cart_id={id}; HttpOnly")));
        assert!(text.contains("Max-Age=2592000"));
        assert!(text.ends_with("; Secure"));
        assert!(!cart_cookie(id, false).to_str().unwrap().contains("Secure"));
    }
}
