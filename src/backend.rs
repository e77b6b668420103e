use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::InstanceRef;
use crate::error::Image360Error;
use crate::query::{Branch, QueryRequest, ViewRef};

/// Properties of one row: view space, then `"externalId/version"`, then the
/// view's own property object.
pub type PropertyMap = HashMap<String, HashMap<String, Map<String, Value>>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    pub space: String,
    pub external_id: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

fn default_instance_type() -> String {
    "node".to_string()
}

impl NodeRow {
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            instance_type: default_instance_type(),
            space: space.into(),
            external_id: external_id.into(),
            properties: PropertyMap::new(),
        }
    }

    /// Attaches `properties` under `view`, replacing anything already there.
    pub fn with_view_properties(mut self, view: &ViewRef, properties: Map<String, Value>) -> Self {
        self.properties
            .entry(view.space.clone())
            .or_default()
            .insert(view.property_key(), properties);
        self
    }

    pub fn instance(&self) -> InstanceRef {
        InstanceRef::new(&self.space, &self.external_id)
    }

    /// Decodes the properties this row carries for `view`. A row without
    /// that view yields `None`; a row whose properties do not match `P` is
    /// schema drift and fails.
    pub fn view_properties<P: DeserializeOwned>(
        &self,
        view: &ViewRef,
    ) -> Result<Option<P>, Image360Error> {
        let Some(raw) = self
            .properties
            .get(&view.space)
            .and_then(|views| views.get(&view.property_key()))
        else {
            return Ok(None);
        };
        serde_json::from_value(Value::Object(raw.clone()))
            .map(Some)
            .map_err(|err| {
                Image360Error::Schema(format!(
                    "{view} properties of {}:{}: {err}",
                    self.space, self.external_id
                ))
            })
    }
}

/// Properties of the 360° image view. A relation that is not a node
/// reference reads as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProperties {
    #[serde(default, deserialize_with = "relation")]
    pub front: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub back: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub left: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub right: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub top: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub bottom: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub collection360: Option<InstanceRef>,
    #[serde(default, deserialize_with = "relation")]
    pub station360: Option<InstanceRef>,
    pub translation_x: Option<Value>,
    pub translation_y: Option<Value>,
    pub translation_z: Option<Value>,
    pub euler_rotation_x: Option<Value>,
    pub euler_rotation_y: Option<Value>,
    pub euler_rotation_z: Option<Value>,
    pub taken_at: Option<Value>,
}

fn relation<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<InstanceRef>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}

/// Properties of the 360° image collection view.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CollectionProperties {
    pub name: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub items: HashMap<String, Vec<NodeRow>>,
    #[serde(default)]
    pub next_cursor: HashMap<String, String>,
}

impl QueryResponse {
    pub fn take_rows(&mut self, branch: Branch) -> Vec<NodeRow> {
        self.items.remove(branch.name()).unwrap_or_default()
    }

    pub fn cursor(&self, branch: Branch) -> Option<&str> {
        self.next_cursor.get(branch.name()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.items.values().all(Vec::is_empty)
    }
}

pub trait GraphQueryClient: Send + Sync {
    fn query(
        &self,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<QueryResponse, Image360Error>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub base_url: String,
    pub project: String,
    pub timeout: Duration,
    /// Pre-issued bearer token, passed through as is.
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct GraphQueryHttpClient {
    client: Client,
    url: String,
}

impl GraphQueryHttpClient {
    pub fn new(settings: &BackendSettings) -> Result<Self, Image360Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("image360-loader/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| Image360Error::BackendHttp(err.to_string()))?,
        );
        if let Some(token) = &settings.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| Image360Error::BackendHttp(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| Image360Error::BackendHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: Self::query_url(&settings.base_url, &settings.project),
        })
    }

    pub fn query_url(base_url: &str, project: &str) -> String {
        format!(
            "{}/api/v1/projects/{}/models/instances/query",
            base_url.trim_end_matches('/'),
            project
        )
    }

    async fn handle_status(response: Response) -> Result<Response, Image360Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "graph query failed".to_string());
        Err(Image360Error::BackendStatus { status, message })
    }
}

impl GraphQueryClient for GraphQueryHttpClient {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, Image360Error> {
        debug!(url = %self.url, cursors = request.cursors().len(), "posting graph query");
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| Image360Error::BackendHttp(err.to_string()))?;
        let response = Self::handle_status(response).await?;
        response
            .json::<QueryResponse>()
            .await
            .map_err(|err| Image360Error::BackendHttp(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::query::ViewSettings;

    #[test]
    fn query_url_tolerates_trailing_slash() {
        assert_eq!(
            GraphQueryHttpClient::query_url("https://api.example.com/", "site"),
            "https://api.example.com/api/v1/projects/site/models/instances/query"
        );
    }

    #[test]
    fn decodes_backend_response() {
        let response: QueryResponse = serde_json::from_value(json!({
            "items": {
                "images": [{
                    "instanceType": "node",
                    "space": "site",
                    "externalId": "img-1",
                    "version": 3,
                    "properties": {
                        "cdf_cdm": {
                            "Cognite360Image/v1": {
                                "front": {"space": "files", "externalId": "f"},
                                "translationX": "1.5",
                                "takenAt": "2024-05-01T10:00:00Z"
                            }
                        }
                    }
                }],
                "stations": []
            },
            "nextCursor": {"images": "abc"}
        }))
        .unwrap();

        assert_eq!(response.cursor(Branch::Images), Some("abc"));
        assert_eq!(response.cursor(Branch::Stations), None);
        assert!(!response.is_empty());

        let mut response = response;
        let images = response.take_rows(Branch::Images);
        assert_eq!(images.len(), 1);
        assert!(response.take_rows(Branch::ImageCollections).is_empty());

        let views = ViewSettings::default();
        let image: ImageProperties = images[0]
            .view_properties(&views.image)
            .unwrap()
            .unwrap();
        assert_eq!(image.front, Some(InstanceRef::new("files", "f")));
        assert_eq!(image.back, None);
        assert_eq!(image.translation_x, Some(json!("1.5")));
    }

    #[test]
    fn missing_view_is_none() {
        let row = NodeRow::new("site", "c1");
        let properties: Option<CollectionProperties> =
            row.view_properties(&ViewSettings::default().collection).unwrap();
        assert_eq!(properties, None);
    }

    #[test]
    fn mistyped_relation_reads_as_absent() {
        let views = ViewSettings::default();
        let row = NodeRow::new("site", "img").with_view_properties(
            &views.image,
            json!({
                "front": "not-a-reference",
                "back": {"space": "files", "externalId": "b"},
                "station360": 7
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let image = row
            .view_properties::<ImageProperties>(&views.image)
            .unwrap()
            .unwrap();
        assert_eq!(image.front, None);
        assert_eq!(image.back, Some(InstanceRef::new("files", "b")));
        assert_eq!(image.station360, None);
    }

    #[test]
    fn undecodable_properties_are_schema_error() {
        #[derive(Debug, Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }

        let views = ViewSettings::default();
        let row = NodeRow::new("site", "c1").with_view_properties(
            &views.collection,
            json!({"name": 5}).as_object().cloned().unwrap(),
        );
        assert_matches!(
            row.view_properties::<Named>(&views.collection),
            Err(Image360Error::Schema(message)) if message.contains("site:c1")
        );
    }

    #[test]
    fn response_without_rows_is_empty() {
        let response: QueryResponse = serde_json::from_value(json!({
            "items": {"image_collections": [], "images": [], "stations": []},
            "nextCursor": {"images": "still-here"}
        }))
        .unwrap();
        assert!(response.is_empty());
    }
}
