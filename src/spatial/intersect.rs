use crate::types::geometry::{BoundingBox, Triangle, Vector3, v_sub};

/// Conservative triangle-AABB intersection.
///
/// Test order: AABB-AABB reject, any-vertex-inside accept, any-edge-crosses
/// accept (slab clipping), otherwise reject. False positives are acceptable;
/// false negatives are not -- the tolerance pads every stage, and the engine
/// relies on the query layer to have padded small boxes already.
pub fn triangle_intersects_aabb(triangle: &Triangle, aabb: &BoundingBox, tolerance: f64) -> bool {
    // 1. Cheap reject on the triangle's own box.
    if !triangle.aabb().intersects(aabb, tolerance) {
        return false;
    }

    // 2. Any vertex inside the padded box.
    for v in &triangle.vertices {
        if aabb.contains_point(*v, tolerance) {
            return true;
        }
    }

    // 3. Any edge crossing the padded box.
    let padded = aabb.padded(tolerance);
    let [a, b, c] = triangle.vertices;
    segment_intersects_aabb(a, b, &padded)
        || segment_intersects_aabb(b, c, &padded)
        || segment_intersects_aabb(c, a, &padded)
}

/// Segment-AABB intersection via slab clipping.
pub fn segment_intersects_aabb(p0: Vector3, p1: Vector3, aabb: &BoundingBox) -> bool {
    let d = v_sub(p1, p0);
    let mut t_min = 0.0_f64;
    let mut t_max = 1.0_f64;

    for axis in 0..3 {
        if d[axis].abs() < 1e-15 {
            // Parallel to the slab: inside or nothing.
            if p0[axis] < aabb.min[axis] || p0[axis] > aabb.max[axis] {
                return false;
            }
        } else {
            let inv = 1.0 / d[axis];
            let mut t0 = (aabb.min[axis] - p0[axis]) * inv;
            let mut t1 = (aabb.max[axis] - p0[axis]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
    }

    true
}
