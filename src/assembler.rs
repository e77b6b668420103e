use std::collections::{HashMap, HashSet};

use glam::DVec3;
use serde_json::Value;
use tracing::{trace, warn};

use crate::backend::{CollectionProperties, ImageProperties, NodeRow};
use crate::domain::{Face, FaceDescriptor, HistoricalImageSet, ImageRevision, InstanceRef};
use crate::error::Image360Error;
use crate::fetcher::RawQueryResult;
use crate::query::ViewSettings;
use crate::transform::{RawPose, numeric_property};

pub const DEFAULT_FACE_MIME_TYPE: &str = "image/jpeg";

/// Joins the flat rows of one batch into historical image sets per requested
/// collection.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    views: ViewSettings,
    face_mime_type: String,
}

struct Capture {
    station: Option<InstanceRef>,
    revision: ImageRevision,
}

impl ResultAssembler {
    pub fn new(views: ViewSettings, face_mime_type: impl Into<String>) -> Self {
        Self {
            views,
            face_mime_type: face_mime_type.into(),
        }
    }

    /// Every requested identifier gets an entry; collections without any
    /// complete image map to an empty list. Malformed rows are skipped so the
    /// rest of the batch still resolves.
    pub fn assemble(
        &self,
        requested: &[InstanceRef],
        raw: &RawQueryResult,
    ) -> HashMap<InstanceRef, Vec<HistoricalImageSet>> {
        let wanted: HashSet<&InstanceRef> = requested.iter().collect();

        let mut buckets: HashMap<InstanceRef, Vec<Capture>> = HashMap::new();
        for row in &raw.images {
            let properties = match row.view_properties::<ImageProperties>(&self.views.image) {
                Ok(Some(properties)) => properties,
                Ok(None) => {
                    trace!(image = %row.instance(), "image row without image view properties");
                    continue;
                }
                Err(err) => {
                    warn!(image = %row.instance(), error = %err, "skipping undecodable image");
                    continue;
                }
            };
            let Some(collection) = properties.collection360.clone() else {
                trace!(image = %row.instance(), "image without collection reference");
                continue;
            };
            if !wanted.contains(&collection) {
                trace!(image = %row.instance(), %collection, "image of an unrequested collection");
                continue;
            }
            let Some(face_descriptors) = self.face_descriptors(&properties) else {
                trace!(image = %row.instance(), "dropping image with incomplete faces");
                continue;
            };
            let pose = match raw_pose(&properties) {
                Ok(pose) => pose,
                Err(err) => {
                    warn!(image = %row.instance(), error = %err, "skipping image without a usable pose");
                    continue;
                }
            };
            let revision = ImageRevision {
                id: row.instance(),
                timestamp: text(properties.taken_at.as_ref()),
                face_descriptors,
                transform: pose.to_matrix(),
            };
            buckets.entry(collection).or_default().push(Capture {
                station: properties.station360,
                revision,
            });
        }

        let labels = self.collection_labels(&raw.collections);
        let mut assembled = HashMap::with_capacity(requested.len());
        for collection in requested {
            let captures = buckets.remove(collection).unwrap_or_default();
            let label = labels
                .get(collection)
                .cloned()
                .unwrap_or_else(|| collection.external_id.clone());
            assembled.insert(
                collection.clone(),
                historical_sets(&collection.external_id, &label, captures),
            );
        }
        assembled
    }

    fn face_descriptors(&self, properties: &ImageProperties) -> Option<[FaceDescriptor; 6]> {
        let relations = [
            &properties.front,
            &properties.back,
            &properties.left,
            &properties.right,
            &properties.top,
            &properties.bottom,
        ];
        let descriptors: Vec<FaceDescriptor> = Face::ALL
            .into_iter()
            .zip(relations)
            .filter_map(|(face, file)| {
                file.clone().map(|file| FaceDescriptor {
                    face,
                    file,
                    mime_type: self.face_mime_type.clone(),
                })
            })
            .collect();
        descriptors.try_into().ok()
    }

    fn collection_labels(&self, collections: &[NodeRow]) -> HashMap<InstanceRef, String> {
        let mut labels = HashMap::new();
        for row in collections {
            let properties = row
                .view_properties::<CollectionProperties>(&self.views.collection)
                .unwrap_or_else(|err| {
                    warn!(collection = %row.instance(), error = %err, "ignoring undecodable collection name");
                    None
                });
            if let Some(name) = properties.and_then(|properties| text(properties.name.as_ref())) {
                labels.insert(row.instance(), name);
            }
        }
        labels
    }
}

fn historical_sets(
    collection_id: &str,
    collection_label: &str,
    captures: Vec<Capture>,
) -> Vec<HistoricalImageSet> {
    let mut stations: Vec<(InstanceRef, Vec<ImageRevision>)> = Vec::new();
    let mut station_index: HashMap<InstanceRef, usize> = HashMap::new();
    let mut standalone = Vec::new();

    for capture in captures {
        match capture.station {
            Some(station) => match station_index.get(&station) {
                Some(&index) => stations[index].1.push(capture.revision),
                None => {
                    station_index.insert(station.clone(), stations.len());
                    stations.push((station, vec![capture.revision]));
                }
            },
            None => standalone.push(capture.revision),
        }
    }

    stations
        .into_iter()
        .map(|(station, revisions)| (Some(station), revisions))
        .chain(standalone.into_iter().map(|revision| (None, vec![revision])))
        .map(|(station, image_revisions)| {
            let id = image_revisions[0].id.clone();
            let transform = image_revisions[0].transform;
            HistoricalImageSet {
                collection_id: collection_id.to_string(),
                collection_label: collection_label.to_string(),
                id,
                station,
                label: String::new(),
                image_revisions,
                transform,
            }
        })
        .collect()
}

fn raw_pose(properties: &ImageProperties) -> Result<RawPose, Image360Error> {
    let number = |name: &str, value: &Option<Value>| numeric_property(name, value.as_ref());
    Ok(RawPose {
        translation: DVec3::new(
            number("translationX", &properties.translation_x)?,
            number("translationY", &properties.translation_y)?,
            number("translationZ", &properties.translation_z)?,
        ),
        rotation: DVec3::new(
            number("eulerRotationX", &properties.euler_rotation_x)?,
            number("eulerRotationY", &properties.euler_rotation_y)?,
            number("eulerRotationZ", &properties.euler_rotation_z)?,
        ),
    })
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}
