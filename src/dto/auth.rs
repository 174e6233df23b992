use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims carried by the identity provider's access tokens.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}
