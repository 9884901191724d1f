use serde::{Deserialize, Deserializer, Serialize};

/// The signed-in user, as reported by the gateway at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub company_domain: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl UserProfile {
    /// First name for greetings ("Welcome back, Dana").
    pub fn first_name(&self) -> &str {
        self.full_name
            .split_whitespace()
            .next()
            .unwrap_or(self.email.as_str())
    }

    pub fn role_display(&self) -> &'static str {
        if self.is_admin {
            "Administrator"
        } else {
            "User"
        }
    }
}

/// Some gateway deployments issue numeric user ids, others UUID strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
