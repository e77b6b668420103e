use std::io::{self, Write};

use serde::Serialize;

use crate::annotation::AnnotationPolygon;
use crate::domain::{HistoricalImageSet, InstanceRef};
use crate::version::FormatVersion;

#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub identifier: InstanceRef,
    pub sets: Vec<HistoricalImageSet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub loaded_at: String,
    pub collections: Vec<CollectionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolygonResult {
    pub format_version: FormatVersion,
    pub polygons: Vec<AnnotationPolygon>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_load(result: &LoadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_polygons(result: &PolygonResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
