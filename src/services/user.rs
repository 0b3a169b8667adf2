use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ResilientResource;
use crate::fallback::ServiceResponse;
use crate::outcome::Operation;

pub const USERS_PATH: &[&str] = &["api", "users"];

/// User as exchanged with the user service. Fields the gateway does not
/// look at are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type UserService = ResilientResource<UserDto>;

impl ResilientResource<UserDto> {
    /// Lookup used by authentication flows.
    pub async fn find_by_username(&self, username: &str) -> ServiceResponse<Option<UserDto>> {
        let path = self.at(&["username", username]);
        self.lookup(Operation::FindByUsername, &path, username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_a_pass_through() {
        let raw = serde_json::json!({
            "userId": 3,
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "phone": "+44",
            "credential": { "username": "ada" }
        });
        let dto: UserDto = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(dto.user_id, Some(3));
        assert_eq!(serde_json::to_value(&dto).unwrap(), raw);
    }
}
