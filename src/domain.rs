use std::fmt;
use std::str::FromStr;

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::error::Image360Error;

/// A node reference in the graph backend: the `{space, externalId}` pair.
///
/// Collections are requested by it, images point back to their collection
/// and station with it, and face relations target file nodes with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    pub space: String,
    pub external_id: String,
}

/// Collections are requested by their instance reference.
pub type CollectionIdentifier = InstanceRef;

impl InstanceRef {
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.external_id)
    }
}

impl FromStr for InstanceRef {
    type Err = Image360Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (space, external_id) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| Image360Error::InvalidIdentifier(value.to_string()))?;
        let space = space.trim();
        let external_id = external_id.trim();
        if space.is_empty() || external_id.is_empty() {
            return Err(Image360Error::InvalidIdentifier(value.to_string()));
        }
        Ok(Self::new(space, external_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Face {
    Front,
    Back,
    Left,
    Right,
    Top,
    Bottom,
}

impl Face {
    /// Cube-map order used for every revision's descriptors.
    pub const ALL: [Face; 6] = [
        Face::Front,
        Face::Back,
        Face::Left,
        Face::Right,
        Face::Top,
        Face::Bottom,
    ];
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Face::Front => write!(f, "front"),
            Face::Back => write!(f, "back"),
            Face::Left => write!(f, "left"),
            Face::Right => write!(f, "right"),
            Face::Top => write!(f, "top"),
            Face::Bottom => write!(f, "bottom"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptor {
    pub face: Face,
    pub file: InstanceRef,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRevision {
    pub id: InstanceRef,
    pub timestamp: Option<String>,
    pub face_descriptors: [FaceDescriptor; 6],
    pub transform: DMat4,
}

/// All revisions captured at one station, or a single image without one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalImageSet {
    pub collection_id: String,
    pub collection_label: String,
    pub id: InstanceRef,
    pub station: Option<InstanceRef>,
    pub label: String,
    pub image_revisions: Vec<ImageRevision>,
    /// Placement of the first revision, column-major, in the renderer's axis
    /// convention.
    pub transform: DMat4,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_instance_ref() {
        let id: InstanceRef = " site_a : collection-1 ".parse().unwrap();
        assert_eq!(id.space, "site_a");
        assert_eq!(id.external_id, "collection-1");
        assert_eq!(id.to_string(), "site_a:collection-1");
    }

    #[test]
    fn external_id_may_contain_colons() {
        let id: InstanceRef = "space:urn:image:1".parse().unwrap();
        assert_eq!(id.external_id, "urn:image:1");
    }

    #[test]
    fn parse_instance_ref_invalid() {
        assert_matches!(
            "no-separator".parse::<InstanceRef>(),
            Err(Image360Error::InvalidIdentifier(_))
        );
        assert_matches!(
            ":missing-space".parse::<InstanceRef>(),
            Err(Image360Error::InvalidIdentifier(_))
        );
    }
}
