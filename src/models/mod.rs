pub mod conversation;
pub mod message;

use serde::{Deserialize, Serialize};

/// Projection of a user as resolved by the identity directory. Used only to
/// shape responses; user records are owned by an external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub first_name: Option<String>,
    pub email: String,
}

impl UserProfile {
    /// First name, falling back to the contact address.
    pub fn display_name(&self) -> &str {
        self.first_name.as_deref().unwrap_or(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_email() {
        let named = UserProfile {
            id: 1,
            first_name: Some("Ada".into()),
            email: "ada@example.com".into(),
        };
        assert_eq!(named.display_name(), "Ada");

        let unnamed = UserProfile {
            id: 2,
            first_name: None,
            email: "grace@example.com".into(),
        };
        assert_eq!(unnamed.display_name(), "grace@example.com");
    }
}
