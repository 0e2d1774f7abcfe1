use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::query::FilterOption;

/// Ids arrive as JSON numbers from one service and strings from another.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn optional_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(id_string(deserializer)?).filter(|id| !id.is_empty()))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Company {
    #[serde(rename = "CompanyID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "CompanyName", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreLocation {
    #[serde(rename = "StoreLocationID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "StoreName", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Functionality {
    #[serde(rename = "FunctionalityID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "FunctionalityName", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventType {
    #[serde(rename = "EventTypeID", deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "EventTypeName", default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuditEvent {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub event_timestamp: String,
    #[serde(default)]
    pub functionality: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(
        rename = "StoreLocationID",
        default,
        deserialize_with = "optional_id_string"
    )]
    pub store_location_id: Option<String>,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub company_id: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub additional_data: Option<Value>,
}

/// Records that feed a dropdown filter's options.
pub trait AsFilterOption {
    fn to_option(&self) -> FilterOption;
}

impl AsFilterOption for Company {
    fn to_option(&self) -> FilterOption {
        FilterOption::new(&self.name, &self.id)
    }
}

impl AsFilterOption for StoreLocation {
    fn to_option(&self) -> FilterOption {
        FilterOption::new(&self.name, &self.id)
    }
}

impl AsFilterOption for Functionality {
    fn to_option(&self) -> FilterOption {
        FilterOption::new(&self.name, &self.id)
    }
}

impl AsFilterOption for EventType {
    fn to_option(&self) -> FilterOption {
        FilterOption::new(&self.name, &self.id)
    }
}

pub fn to_options<T: AsFilterOption>(records: &[T]) -> Vec<FilterOption> {
    records.iter().map(AsFilterOption::to_option).collect()
}

/// Application-level wrapper; `StatusCode` is independent of the HTTP status.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "StatusCode")]
    pub status_code: u16,
    #[serde(rename = "Data")]
    pub data: Option<Vec<T>>,
    pub events: Option<Vec<T>>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body of the login service, e.g. `{"detail": "Invalid credentials"}`.
#[derive(Debug, Deserialize)]
pub struct LoginFailure {
    #[serde(default)]
    pub detail: Option<String>,
}
