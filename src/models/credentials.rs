use serde::{Deserialize, Serialize};
use validator::Validate;

/// Seller API credentials. One set identifies one marketplace account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct Credentials {
    #[validate(length(min = 1, message = "Client ID must not be empty"))]
    pub client_id: String,
    #[validate(length(min = 1, message = "Api-Key must not be empty"))]
    pub api_key: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }
}
