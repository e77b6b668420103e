use assert_matches::assert_matches;
use glam::{DQuat, DVec3};

use image360_loader::annotation::{reconstruct, unit_from_spherical};
use image360_loader::error::Image360Error;

const TRIANGLE: [f64; 7] = [3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6];

fn assert_close(actual: DVec3, expected: DVec3) {
    assert!(
        actual.abs_diff_eq(expected, 1e-12),
        "expected {expected:?}, got {actual:?}"
    );
}

#[test]
fn one_vertex_counted_polygon() {
    let polygons = reconstruct(Some("2.0.0"), DVec3::ZERO, &TRIANGLE).unwrap();

    assert_eq!(polygons.len(), 1);
    assert_eq!(polygons[0].len(), 3);
    assert_close(polygons[0].vertices()[0], unit_from_spherical(0.1, 0.2));
    assert_close(polygons[0].vertices()[2], unit_from_spherical(0.5, 0.6));
}

#[test]
fn several_vertex_counted_polygons_in_order() {
    let raw = [
        3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 4.0, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3, 1.4,
    ];
    let polygons = reconstruct(Some("2.0.0"), DVec3::ZERO, &raw).unwrap();

    let lengths: Vec<usize> = polygons.iter().map(|polygon| polygon.len()).collect();
    assert_eq!(lengths, vec![3, 4]);
    assert_close(polygons[1].vertices()[0], unit_from_spherical(0.7, 0.8));
}

#[test]
fn versions_above_two_parse_the_same_way() {
    let v2 = reconstruct(Some("2.0.0"), DVec3::ZERO, &TRIANGLE).unwrap();
    let v3 = reconstruct(Some("3.1.4"), DVec3::ZERO, &TRIANGLE).unwrap();
    assert_eq!(v2, v3);
}

#[test]
fn count_beyond_payload_is_out_of_bounds() {
    let raw = [10.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
    assert_matches!(
        reconstruct(Some("2.0.0"), DVec3::ZERO, &raw),
        Err(Image360Error::AnnotationFormat(message)) if message.contains("out of bounds")
    );
}

#[test]
fn huge_vertex_count_is_out_of_bounds() {
    let raw = [1e300, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
    assert_matches!(
        reconstruct(Some("2.0.0"), DVec3::ZERO, &raw),
        Err(Image360Error::AnnotationFormat(message)) if message.contains("out of bounds")
    );
}

#[test]
fn vertex_counted_payload_needs_seven_numbers() {
    assert_matches!(
        reconstruct(Some("2.0.0"), DVec3::ZERO, &[3.0, 0.1, 0.2, 0.3, 0.4, 0.5]),
        Err(Image360Error::AnnotationFormat(message))
            if message.contains("format version 2.0.0 requires at least 7 numbers")
    );
}

#[test]
fn polygon_needs_three_vertices() {
    let raw = [2.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
    assert_matches!(
        reconstruct(Some("2.0.0"), DVec3::ZERO, &raw),
        Err(Image360Error::AnnotationFormat(message))
            if message.contains("number of vertices must be at least 3")
    );
}

#[test]
fn legacy_payload_is_a_single_polygon() {
    let raw = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
    let polygons = reconstruct(Some("1.0.0"), DVec3::ZERO, &raw).unwrap();

    assert_eq!(polygons.len(), 1);
    assert_eq!(polygons[0].len(), 4);
    assert_close(polygons[0].vertices()[3], unit_from_spherical(0.7, 0.8));
}

#[test]
fn legacy_payload_with_odd_length_fails() {
    assert_matches!(
        reconstruct(None, DVec3::ZERO, &[0.1, 0.2, 0.3]),
        Err(Image360Error::AnnotationFormat(_))
    );
}

#[test]
fn malformed_version_reads_as_legacy() {
    // Eight numbers: a legacy polygon of four vertices, not a vertex-counted
    // triangle with a dangling value.
    let raw = [3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
    for version in [None, Some("2.0"), Some("02.0.0"), Some("2.0.0-rc1")] {
        let polygons = reconstruct(version, DVec3::ZERO, &raw).unwrap();
        assert_eq!(polygons.len(), 1, "{version:?}");
        assert_eq!(polygons[0].len(), 4, "{version:?}");
    }
}

#[test]
fn vectors_stay_unit_length_after_rotation() {
    let raw = [
        3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 4.0, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.3, 1.4,
    ];
    let polygons = reconstruct(Some("2.0.0"), DVec3::new(0.3, -1.2, 2.5), &raw).unwrap();
    for vertex in polygons.iter().flat_map(|polygon| polygon.vertices()) {
        assert!((vertex.length() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn rotation_order_depends_on_version() {
    let rotation = DVec3::new(0.3, 0.5, 0.7);
    let raw = [0.4, 1.1];
    let unit = unit_from_spherical(0.4, 1.1);
    let (x, y, z) = (
        DQuat::from_rotation_x(rotation.x),
        DQuat::from_rotation_y(rotation.y),
        DQuat::from_rotation_z(rotation.z),
    );

    let xyz = reconstruct(Some("1.0.0"), rotation, &raw).unwrap();
    assert_close(xyz[0].vertices()[0], x * y * z * unit);

    let xzy = reconstruct(Some("1.0.1"), rotation, &raw).unwrap();
    assert_close(xzy[0].vertices()[0], x * z * y * unit);

    assert!(!xyz[0].vertices()[0].abs_diff_eq(xzy[0].vertices()[0], 1e-6));
}
