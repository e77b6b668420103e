use glam::{DMat4, DQuat, DVec3};
use serde_json::Value;

use crate::error::Image360Error;

/// Axis order for intrinsic Euler rotations. Each angle always belongs to its
/// own axis; the order only decides how the three rotations are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EulerOrder {
    Xyz,
    Xzy,
}

impl EulerOrder {
    pub fn quat(self, angles: DVec3) -> DQuat {
        let x = DQuat::from_rotation_x(angles.x);
        let y = DQuat::from_rotation_y(angles.y);
        let z = DQuat::from_rotation_z(angles.z);
        match self {
            EulerOrder::Xyz => x * y * z,
            EulerOrder::Xzy => x * z * y,
        }
    }
}

/// Raw placement of one image as stored in the backend, in the backend's
/// Z-up axis convention.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawPose {
    pub translation: DVec3,
    pub rotation: DVec3,
}

impl RawPose {
    /// Placement in the renderer's Y-up convention: backend `(x, y, z)`
    /// becomes `(x, z, -y)` for both translation and Euler angles, and the
    /// result is translation applied after rotation.
    pub fn to_matrix(self) -> DMat4 {
        let translation = remap_axes(self.translation);
        let rotation = EulerOrder::Xyz.quat(remap_axes(self.rotation));
        DMat4::from_translation(translation) * DMat4::from_quat(rotation)
    }
}

fn remap_axes(v: DVec3) -> DVec3 {
    DVec3::new(v.x, v.z, -v.y)
}

/// Reads a transformation property that may be stored either as a JSON
/// number or as a numeric string.
pub fn numeric_property(name: &str, value: Option<&Value>) -> Result<f64, Image360Error> {
    let invalid = || Image360Error::InvalidProperty {
        property: name.to_string(),
        value: value.map_or_else(|| "undefined".to_string(), Value::to_string),
    };
    let number = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite()).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn assert_vec_close(actual: DVec3, expected: DVec3) {
        assert!(
            actual.abs_diff_eq(expected, 1e-9),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn translation_is_remapped_to_y_up() {
        let pose = RawPose {
            translation: DVec3::new(1.0, 2.0, 3.0),
            rotation: DVec3::ZERO,
        };
        let matrix = pose.to_matrix();
        assert_vec_close(matrix.w_axis.truncate(), DVec3::new(1.0, 3.0, -2.0));
        assert_vec_close(matrix.transform_vector3(DVec3::X), DVec3::X);
    }

    #[test]
    fn backend_z_rotation_turns_about_renderer_y() {
        let pose = RawPose {
            translation: DVec3::ZERO,
            rotation: DVec3::new(0.0, 0.0, FRAC_PI_2),
        };
        let rotated = pose.to_matrix().transform_vector3(DVec3::X);
        assert_vec_close(rotated, DVec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn rotation_happens_before_translation() {
        let pose = RawPose {
            translation: DVec3::new(10.0, 0.0, 0.0),
            rotation: DVec3::new(0.0, 0.0, FRAC_PI_2),
        };
        let point = pose.to_matrix().transform_point3(DVec3::X);
        assert_vec_close(point, DVec3::new(10.0, 0.0, -1.0));
    }

    #[test]
    fn euler_orders_differ_when_axes_interact() {
        let angles = DVec3::new(0.3, 0.5, 0.7);
        let xyz = EulerOrder::Xyz.quat(angles);
        let xzy = EulerOrder::Xzy.quat(angles);
        assert!(!xyz.abs_diff_eq(xzy, 1e-6));

        let single_axis = DVec3::new(0.0, 0.4, 0.0);
        assert!(
            EulerOrder::Xyz
                .quat(single_axis)
                .abs_diff_eq(EulerOrder::Xzy.quat(single_axis), 1e-12)
        );
    }

    #[test]
    fn numeric_property_accepts_numbers_and_numeric_strings() {
        assert_eq!(numeric_property("translationX", Some(&json!(1.5))).unwrap(), 1.5);
        assert_eq!(numeric_property("translationX", Some(&json!("-2.25"))).unwrap(), -2.25);
    }

    #[test]
    fn numeric_property_rejects_other_values() {
        assert_matches!(
            numeric_property("eulerRotationZ", Some(&json!("north"))),
            Err(Image360Error::InvalidProperty { property, .. }) if property == "eulerRotationZ"
        );
        assert_matches!(
            numeric_property("eulerRotationZ", None),
            Err(Image360Error::InvalidProperty { value, .. }) if value == "undefined"
        );
        assert_matches!(
            numeric_property("eulerRotationZ", Some(&json!({"space": "s"}))),
            Err(Image360Error::InvalidProperty { .. })
        );
        assert_matches!(
            numeric_property("eulerRotationZ", Some(&json!("inf"))),
            Err(Image360Error::InvalidProperty { .. })
        );
    }
}
