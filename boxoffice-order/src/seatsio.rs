use async_trait::async_trait;
use boxoffice_core::inventory::{HoldGrant, InventoryObject, SeatInventoryGateway};
use boxoffice_core::models::ObjectType;
use boxoffice_core::{CoreError, CoreResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// seats.io REST client.
pub struct SeatsIoClient {
    base_url: String,
    secret_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldTokenRequest {
    expires_in_minutes: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldTokenResponse {
    hold_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectsAction<'a> {
    objects: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    hold_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChangeStatusAction<'a> {
    events: [&'a str; 1],
    objects: &'a [String],
    status: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectInfo {
    label: String,
    status: String,
    #[serde(default = "default_available")]
    is_available: bool,
    object_type: String,
    #[serde(default)]
    num_seats: Option<u32>,
    #[serde(default)]
    capacity: Option<u32>,
    #[serde(default)]
    category_key: Option<serde_json::Value>,
}

fn default_available() -> bool {
    true
}

impl ObjectInfo {
    fn into_object(self, key: &str) -> CoreResult<InventoryObject> {
        let object_type: ObjectType = self.object_type.parse()?;
        let capacity = match object_type {
            ObjectType::Table => self.num_seats.or(self.capacity).unwrap_or(1),
            ObjectType::Seat => 1,
        };
        let category_key = match self.category_key {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Ok(InventoryObject {
            key: key.to_string(),
            label: self.label,
            status: self.status,
            is_available: self.is_available,
            object_type,
            capacity,
            category_key,
        })
    }
}

impl SeatsIoClient {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::ExternalService(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            http,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, workspace_key: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, None::<&str>);
        match workspace_key {
            Some(key) if !key.is_empty() => builder.header("X-Workspace-Key", key),
            _ => builder,
        }
    }

    /// Send and map failures. A 400 on a state-changing action means the
    /// objects are not in the status the action needs.
    async fn send(&self, action: &str, builder: reqwest::RequestBuilder) -> CoreResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::ExternalService(format!("seats.io {} failed: {}", action, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("seats.io {} returned {}: {}", action, status, body);
        match status {
            StatusCode::BAD_REQUEST => Err(CoreError::SeatConflict(format!("seats.io rejected {}: {}", action, body))),
            StatusCode::NOT_FOUND => Err(CoreError::NotFound(format!("seats.io {}: {}", action, body))),
            _ => Err(CoreError::ExternalService(format!("seats.io {} returned {}", action, status))),
        }
    }

    async fn read<R: DeserializeOwned>(action: &str, response: reqwest::Response) -> CoreResult<R> {
        response
            .json::<R>()
            .await
            .map_err(|e| CoreError::ExternalService(format!("seats.io {} response unreadable: {}", action, e)))
    }
}

#[async_trait]
impl SeatInventoryGateway for SeatsIoClient {
    async fn retrieve_objects(&self, event_key: &str, object_keys: &[String]) -> CoreResult<HashMap<String, InventoryObject>> {
        let query: Vec<(&str, &str)> = object_keys.iter().map(|k| ("label", k.as_str())).collect();
        let builder = self
            .request(reqwest::Method::GET, &format!("/events/{}/objects", event_key), None)
            .query(&query);
        let response = self.send("object info", builder).await?;
        let infos: HashMap<String, ObjectInfo> = Self::read("object info", response).await?;

        let mut objects = HashMap::with_capacity(infos.len());
        for (key, info) in infos {
            let object = info.into_object(&key)?;
            objects.insert(key, object);
        }
        debug!(event_key, requested = object_keys.len(), found = objects.len(), "Retrieved seat objects");
        Ok(objects)
    }

    async fn hold(&self, event_key: &str, workspace_key: &str, ttl_minutes: i32, object_keys: &[String]) -> CoreResult<HoldGrant> {
        let builder = self
            .request(reqwest::Method::POST, "/hold-tokens", Some(workspace_key))
            .json(&HoldTokenRequest { expires_in_minutes: ttl_minutes });
        let response = self.send("create hold token", builder).await?;
        let token: HoldTokenResponse = Self::read("create hold token", response).await?;

        let builder = self
            .request(reqwest::Method::POST, &format!("/events/{}/actions/hold", event_key), Some(workspace_key))
            .json(&ObjectsAction {
                objects: object_keys,
                hold_token: Some(&token.hold_token),
                order_id: None,
            });
        self.send("hold", builder).await?;

        let per_object = object_keys
            .iter()
            .map(|k| (k.clone(), token.hold_token.clone()))
            .collect();
        Ok(HoldGrant {
            hold_token: token.hold_token,
            per_object,
        })
    }

    async fn book(
        &self,
        event_key: &str,
        workspace_key: &str,
        hold_token: &str,
        object_keys: &[String],
        order_id: &str,
    ) -> CoreResult<()> {
        let builder = self
            .request(reqwest::Method::POST, &format!("/events/{}/actions/book", event_key), Some(workspace_key))
            .json(&ObjectsAction {
                objects: object_keys,
                hold_token: Some(hold_token),
                order_id: Some(order_id),
            });
        self.send("book", builder).await?;
        Ok(())
    }

    async fn free(&self, event_key: &str, workspace_key: &str, object_keys: &[String]) -> CoreResult<()> {
        self.change_status(event_key, workspace_key, object_keys, boxoffice_core::inventory::STATUS_FREE)
            .await
    }

    async fn change_status(&self, event_key: &str, workspace_key: &str, object_keys: &[String], status: &str) -> CoreResult<()> {
        let builder = self
            .request(reqwest::Method::POST, "/events/actions/change-object-status", Some(workspace_key))
            .json(&ChangeStatusAction {
                events: [event_key],
                objects: object_keys,
                status,
            });
        self.send("change object status", builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_info_table_capacity() {
        let info: ObjectInfo = serde_json::from_value(serde_json::json!({
            "label": "T1",
            "status": "free",
            "objectType": "table",
            "numSeats": 6,
            "categoryKey": "b3b8e4f6-6a41-4c1e-9d0f-1a7f2a1c9c11"
        }))
        .unwrap();
        let object = info.into_object("T1").unwrap();
        assert_eq!(object.object_type, ObjectType::Table);
        assert_eq!(object.capacity, 6);
        assert!(object.is_free());
    }

    #[test]
    fn test_object_info_numeric_category_and_status() {
        let info: ObjectInfo = serde_json::from_value(serde_json::json!({
            "label": "A-1",
            "status": "reservedByToken",
            "isAvailable": false,
            "objectType": "seat",
            "categoryKey": 3
        }))
        .unwrap();
        let object = info.into_object("A-1").unwrap();
        assert_eq!(object.capacity, 1);
        assert_eq!(object.category_key, "3");
        assert!(!object.is_free());
    }

    #[test]
    fn test_hold_action_body() {
        let keys = vec!["A-1".to_string()];
        let body = serde_json::to_value(ObjectsAction {
            objects: &keys,
            hold_token: Some("tok"),
            order_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "objects": ["A-1"], "holdToken": "tok" }));
    }
}
