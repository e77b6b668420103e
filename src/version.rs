use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::annotation::PolygonEncoding;
use crate::error::Image360Error;
use crate::transform::EulerOrder;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)$").unwrap()
});

/// `major.minor.patch` version tag stored alongside annotation geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FormatVersion {
    pub const DEFAULT: FormatVersion = FormatVersion::new(1, 0, 0);
    /// From here on, annotation rotations apply Euler angles in XZY order.
    pub const ROTATION_ORDER_XZY: FormatVersion = FormatVersion::new(1, 0, 1);
    /// From here on, payloads hold several vertex-counted polygons.
    pub const MULTI_POLYGON: FormatVersion = FormatVersion::new(2, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Lenient parse used when reading stored annotations: absent or malformed
    /// tags are treated as the first format version.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value
            .and_then(|value| value.parse().ok())
            .unwrap_or(Self::DEFAULT)
    }

    pub fn rotation_order(self) -> EulerOrder {
        if self >= Self::ROTATION_ORDER_XZY {
            EulerOrder::Xzy
        } else {
            EulerOrder::Xyz
        }
    }

    pub fn polygon_encoding(self) -> PolygonEncoding {
        if self >= Self::MULTI_POLYGON {
            PolygonEncoding::VertexCounted
        } else {
            PolygonEncoding::SinglePolygon
        }
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FormatVersion {
    type Err = Image360Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = VERSION_PATTERN
            .captures(value)
            .ok_or_else(|| Image360Error::InvalidVersion(value.to_string()))?;
        let component = |index: usize| {
            captures[index]
                .parse::<u32>()
                .map_err(|_| Image360Error::InvalidVersion(value.to_string()))
        };
        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }
}
