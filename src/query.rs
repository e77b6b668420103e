use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::InstanceRef;

/// Largest `limit` the backend accepts for a single result set.
pub const MAX_LIMIT: usize = 10_000;
pub const DEFAULT_IMAGES_PER_COLLECTION: usize = 200;

/// Named result sets of the collection query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    ImageCollections,
    Images,
    Stations,
}

impl Branch {
    pub fn name(self) -> &'static str {
        match self {
            Branch::ImageCollections => "image_collections",
            Branch::Images => "images",
            Branch::Stations => "stations",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A versioned view in the data model, e.g. `cdf_cdm:Cognite360Image/v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRef {
    pub space: String,
    pub external_id: String,
    pub version: String,
}

impl ViewRef {
    pub fn new(
        space: impl Into<String>,
        external_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            version: version.into(),
        }
    }

    /// Key under which the backend nests this view's properties inside the
    /// view's space.
    pub fn property_key(&self) -> String {
        format!("{}/{}", self.external_id, self.version)
    }
}

impl fmt::Display for ViewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.space, self.external_id, self.version)
    }
}

/// Property on the image view pointing at its collection.
pub const COLLECTION_RELATION: &str = "collection360";
/// Property on the image view pointing at its station.
pub const STATION_RELATION: &str = "station360";

/// Views the collection query reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub collection: ViewRef,
    pub image: ViewRef,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            collection: ViewRef::new("cdf_cdm", "Cognite360ImageCollection", "v1"),
            image: ViewRef::new("cdf_cdm", "Cognite360Image", "v1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum SourceKind {
    View,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSource {
    #[serde(rename = "type")]
    kind: SourceKind,
    space: String,
    external_id: String,
    version: String,
}

impl From<&ViewRef> for ViewSource {
    fn from(view: &ViewRef) -> Self {
        Self {
            kind: SourceKind::View,
            space: view.space.clone(),
            external_id: view.external_id.clone(),
            version: view.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Or(Vec<Filter>),
    And(Vec<Filter>),
    Equals { property: Vec<String>, value: Value },
}

impl Filter {
    fn node_is(instance: &InstanceRef) -> Self {
        Filter::And(vec![
            Filter::Equals {
                property: vec!["node".to_string(), "externalId".to_string()],
                value: Value::String(instance.external_id.clone()),
            },
            Filter::Equals {
                property: vec!["node".to_string(), "space".to_string()],
                value: Value::String(instance.space.clone()),
            },
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inwards,
    Outwards,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Through {
    pub source: ViewSource,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NodeExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Branch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub through: Option<Through>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSetExpression {
    pub nodes: NodeExpression,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSelector {
    pub source: ViewSource,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SelectExpression {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSelector>,
}

/// Cursor for the next page of exactly one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub branch: Branch,
    pub cursor: String,
}

/// Body of the backend's query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub with: BTreeMap<Branch, ResultSetExpression>,
    pub select: BTreeMap<Branch, SelectExpression>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    cursors: BTreeMap<Branch, String>,
}

impl QueryRequest {
    pub fn limit(&self, branch: Branch) -> Option<usize> {
        self.with.get(&branch).map(|expression| expression.limit)
    }

    pub fn cursors(&self) -> &BTreeMap<Branch, String> {
        &self.cursors
    }

    /// Copy of this query continuing at `cursor`. Any previously attached
    /// cursor is replaced, so a request never carries more than one.
    pub fn with_cursor(&self, cursor: PageCursor) -> Self {
        let mut next = self.clone();
        next.cursors = BTreeMap::from([(cursor.branch, cursor.cursor)]);
        next
    }
}

/// Builds the three-branch collection query: collections by identifier, their
/// images, and the stations those images belong to.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    views: ViewSettings,
    images_per_collection: usize,
}

impl QueryBuilder {
    pub fn new(views: ViewSettings, images_per_collection: usize) -> Self {
        Self {
            views,
            images_per_collection: images_per_collection.max(1),
        }
    }

    pub fn views(&self) -> &ViewSettings {
        &self.views
    }

    pub fn collections_limit(&self, collections: usize) -> usize {
        collections.clamp(1, MAX_LIMIT)
    }

    pub fn images_limit(&self, collections: usize) -> usize {
        collections
            .saturating_mul(self.images_per_collection)
            .clamp(1, MAX_LIMIT)
    }

    pub fn build(&self, collections: &[InstanceRef]) -> QueryRequest {
        let image_source = ViewSource::from(&self.views.image);
        let collection_source = ViewSource::from(&self.views.collection);
        let images_limit = self.images_limit(collections.len());

        let with = BTreeMap::from([
            (
                Branch::ImageCollections,
                ResultSetExpression {
                    nodes: NodeExpression {
                        filter: Some(Filter::Or(
                            collections.iter().map(Filter::node_is).collect(),
                        )),
                        ..NodeExpression::default()
                    },
                    limit: self.collections_limit(collections.len()),
                },
            ),
            (
                Branch::Images,
                ResultSetExpression {
                    nodes: NodeExpression {
                        from: Some(Branch::ImageCollections),
                        through: Some(Through {
                            source: image_source.clone(),
                            identifier: COLLECTION_RELATION.to_string(),
                        }),
                        direction: Some(Direction::Inwards),
                        filter: None,
                    },
                    limit: images_limit,
                },
            ),
            (
                Branch::Stations,
                ResultSetExpression {
                    nodes: NodeExpression {
                        from: Some(Branch::Images),
                        through: Some(Through {
                            source: image_source.clone(),
                            identifier: STATION_RELATION.to_string(),
                        }),
                        direction: Some(Direction::Outwards),
                        filter: None,
                    },
                    limit: images_limit,
                },
            ),
        ]);

        let select = BTreeMap::from([
            (
                Branch::ImageCollections,
                SelectExpression {
                    sources: vec![SourceSelector {
                        source: collection_source,
                        properties: vec!["name".to_string()],
                    }],
                },
            ),
            (
                Branch::Images,
                SelectExpression {
                    sources: vec![SourceSelector {
                        source: image_source,
                        properties: vec!["*".to_string()],
                    }],
                },
            ),
            (Branch::Stations, SelectExpression::default()),
        ]);

        QueryRequest {
            with,
            select,
            cursors: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn builder() -> QueryBuilder {
        QueryBuilder::new(ViewSettings::default(), DEFAULT_IMAGES_PER_COLLECTION)
    }

    #[test]
    fn limits_scale_with_collection_count() {
        let builder = builder();
        assert_eq!(builder.images_limit(1), 200);
        assert_eq!(builder.images_limit(10), 2_000);
        assert_eq!(builder.images_limit(500), MAX_LIMIT);
        assert_eq!(builder.collections_limit(3), 3);
        assert_eq!(builder.collections_limit(20_000), MAX_LIMIT);
    }

    #[test]
    fn serializes_backend_query_shape() {
        let query = builder().build(&[InstanceRef::new("site", "c1"), InstanceRef::new("site", "c2")]);
        let body = serde_json::to_value(&query).unwrap();

        assert_eq!(
            body["with"]["image_collections"],
            json!({
                "nodes": {
                    "filter": {
                        "or": [
                            {"and": [
                                {"equals": {"property": ["node", "externalId"], "value": "c1"}},
                                {"equals": {"property": ["node", "space"], "value": "site"}}
                            ]},
                            {"and": [
                                {"equals": {"property": ["node", "externalId"], "value": "c2"}},
                                {"equals": {"property": ["node", "space"], "value": "site"}}
                            ]}
                        ]
                    }
                },
                "limit": 2
            })
        );
        assert_eq!(
            body["with"]["images"],
            json!({
                "nodes": {
                    "from": "image_collections",
                    "through": {
                        "source": {
                            "type": "view",
                            "space": "cdf_cdm",
                            "externalId": "Cognite360Image",
                            "version": "v1"
                        },
                        "identifier": "collection360"
                    },
                    "direction": "inwards"
                },
                "limit": 400
            })
        );
        assert_eq!(body["with"]["stations"]["nodes"]["from"], json!("images"));
        assert_eq!(body["with"]["stations"]["nodes"]["direction"], json!("outwards"));
        assert_eq!(body["select"]["stations"], json!({}));
        assert_eq!(
            body["select"]["images"]["sources"][0]["properties"],
            json!(["*"])
        );
        assert!(body.get("cursors").is_none());
    }

    #[test]
    fn attaching_a_cursor_replaces_the_previous_one() {
        let query = builder().build(&[InstanceRef::new("site", "c1")]);
        let first = query.with_cursor(PageCursor {
            branch: Branch::Stations,
            cursor: "s-1".to_string(),
        });
        let second = first.with_cursor(PageCursor {
            branch: Branch::Images,
            cursor: "i-2".to_string(),
        });

        assert_eq!(second.cursors().len(), 1);
        assert_eq!(second.cursors().get(&Branch::Images).map(String::as_str), Some("i-2"));
        assert_eq!(
            serde_json::to_value(&second).unwrap()["cursors"],
            json!({"images": "i-2"})
        );
    }

    #[test]
    fn property_key_joins_external_id_and_version() {
        assert_eq!(ViewSettings::default().image.property_key(), "Cognite360Image/v1");
    }
}
