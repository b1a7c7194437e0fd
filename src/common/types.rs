use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Marketplace role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Provider,
    Admin,
}

impl Role {
    fn from_lenient(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("provider") => Role::Provider,
            Some("admin") => Role::Admin,
            _ => Role::Customer,
        }
    }
}

/// User profile as cached in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(
        default,
        alias = "user_type",
        deserialize_with = "lenient_role"
    )]
    pub role: Role,
}

impl User {
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return full.to_string();
        }
        let joined = format!("{} {}", self.first_name, self.last_name);
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
        self.email
            .clone()
            .or_else(|| self.phone.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Access/refresh pair minted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

/// Local delivery bookkeeping for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Pending,
    #[default]
    Sent,
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default, alias = "chatroom", deserialize_with = "id_as_string")]
    pub room: String,
    #[serde(default, deserialize_with = "id_as_string")]
    pub sender: String,
    #[serde(rename = "content", alias = "body", alias = "message")]
    pub body: String,
    #[serde(default = "Utc::now", alias = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Correlation id generated by the sender for optimistic echoes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub delivery: Delivery,
}

/// A chat room summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default)]
    pub last_message: Option<Value>,
}

/// A notification pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "notification_type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

/// List envelope returned by paginated endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl<'de, T> Deserialize<'de> for Page<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Envelope<T> {
            results: Vec<T>,
            #[serde(default)]
            count: Option<u64>,
            #[serde(default)]
            next: Option<String>,
            #[serde(default)]
            previous: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Either<T> {
            Envelope(Envelope<T>),
            Bare(Vec<T>),
        }

        Ok(match Either::<T>::deserialize(deserializer)? {
            Either::Envelope(page) => Page {
                count: page.count.unwrap_or(page.results.len() as u64),
                results: page.results,
                next: page.next,
                previous: page.previous,
            },
            Either::Bare(results) => Page {
                count: results.len() as u64,
                results,
                next: None,
                previous: None,
            },
        })
    }
}

/// Latest polled unread counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnreadCounts {
    pub notifications: u64,
    pub chat: u64,
}

pub(crate) fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        // nested objects like {"id": 4, "name": ...}
        Value::Object(map) => match map.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        },
        other => other.to_string(),
    })
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Role, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(Role::from_lenient(value.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_accepts_envelope_and_bare_list() {
        let page: Page<u32> =
            serde_json::from_value(json!({"results": [1, 2], "count": 9, "next": "n"})).unwrap();
        assert_eq!(page.results, vec![1, 2]);
        assert_eq!(page.count, 9);
        assert_eq!(page.next.as_deref(), Some("n"));

        let bare: Page<u32> = serde_json::from_value(json!([3, 4, 5])).unwrap();
        assert_eq!(bare.count, 3);
        assert!(bare.next.is_none());
    }

    #[test]
    fn message_accepts_backend_field_names() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "id": 17,
            "chatroom": 4,
            "sender": {"id": 2, "full_name": "Rahim"},
            "content": "hello",
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.id, "17");
        assert_eq!(msg.room, "4");
        assert_eq!(msg.sender, "2");
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.delivery, Delivery::Sent);
    }

    #[test]
    fn unknown_role_defaults_to_customer() {
        let user: User =
            serde_json::from_value(json!({"id": 1, "user_type": "superhero"})).unwrap();
        assert_eq!(user.role, Role::Customer);

        let user: User = serde_json::from_value(json!({"id": 1, "role": "Provider"})).unwrap();
        assert_eq!(user.role, Role::Provider);
    }

    #[test]
    fn display_name_falls_back_to_contact() {
        let user = User {
            phone: Some("+8801700000000".to_string()),
            ..User::default()
        };
        assert_eq!(user.display_name(), "+8801700000000");
    }
}
