use crate::types::geometry::{Vector3, v_add, v_cross, v_dot, v_length, v_normalize, v_scale, v_sub};
use crate::types::tile::TileRecord;

/// Camera state for runtime visibility queries.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub position: Vector3,
    /// Unit view direction.
    pub direction: Vector3,
    /// Full field of view in radians.
    pub fov: f64,
    pub near: f64,
    pub far: f64,
    /// Pixel height of the output surface, for screen-size rejection.
    pub viewport_height: u32,
}

/// Prediction horizon for prefetching.
const PREDICTION_SECONDS: f64 = 2.0;

/// Coarser-LOD preference kicks in beyond this multiple of the level's
/// distance band.
const LOD_OVERLAP_FACTOR: f64 = 1.5;

/// Select the tiles visible from `viewport`.
///
/// Rejection order: distance band, view-cone angle, six-plane frustum test
/// against the eight AABB corners, sub-pixel screen size, and coarser-LOD
/// overlap for deep levels. Deterministic: input order is preserved.
pub fn frustum_cull<'a>(viewport: &Viewport, tiles: &'a [TileRecord]) -> Vec<&'a TileRecord> {
    let planes = frustum_planes(viewport);
    let pixel_angle = viewport.fov / f64::from(viewport.viewport_height.max(1));

    tiles
        .iter()
        .filter(|tile| {
            let center = tile.bounds.center();
            let radius = tile.bounds.diagonal() * 0.5;
            let to_center = v_sub(center, viewport.position);
            let d = v_length(to_center);
            let level = tile.coord.level;

            // 1. Distance band, shrinking with depth.
            if d < viewport.near || d > viewport.far * 0.75_f64.powi(level as i32) {
                return false;
            }

            // 2. View-cone rejection, widened by the bounding sphere.
            if d > 1e-12 {
                let cos_angle =
                    (v_dot(to_center, viewport.direction) / d).clamp(-1.0, 1.0);
                let angle = cos_angle.acos();
                if angle > viewport.fov * 0.5 + (radius / d).atan() {
                    return false;
                }
            }

            // 3. Six-plane frustum test: out iff every corner is outside
            // any single plane.
            let corners = aabb_corners(&tile.bounds);
            for plane in &planes {
                let all_outside = corners
                    .iter()
                    .all(|c| v_dot(plane.normal, v_sub(*c, plane.point)) < 0.0);
                if all_outside {
                    return false;
                }
            }

            // 4. Screen-size rejection: below one pixel.
            let angular_size = 2.0 * (radius / d.max(1e-12)).atan();
            if angular_size * angular_size < pixel_angle * pixel_angle {
                return false;
            }

            // 5. LOD overlap: far-away deep tiles yield to coarser levels.
            if level > 2 && d > (viewport.far / f64::from(1u32 << level)) * LOD_OVERLAP_FACTOR {
                return false;
            }

            true
        })
        .collect()
}

/// Predictive prefetch: translate the camera along `motion` for the
/// prediction horizon, then cull at the predicted viewport.
pub fn predict_loading<'a>(
    viewport: &Viewport,
    motion: Vector3,
    tiles: &'a [TileRecord],
) -> Vec<&'a TileRecord> {
    let predicted = Viewport {
        position: v_add(viewport.position, v_scale(motion, PREDICTION_SECONDS)),
        ..*viewport
    };
    frustum_cull(&predicted, tiles)
}

struct Plane {
    point: Vector3,
    /// Inward-facing.
    normal: Vector3,
}

/// Near/far/left/right/top/bottom planes with inward normals. Right and up
/// derive from the view direction and world-up `(0, 0, 1)`; a vertical view
/// falls back to `(0, 1, 0)`.
fn frustum_planes(viewport: &Viewport) -> [Plane; 6] {
    let dir = v_normalize(viewport.direction);
    let world_up = [0.0, 0.0, 1.0];
    let mut right = v_cross(dir, world_up);
    if v_length(right) < 1e-9 {
        right = v_cross(dir, [0.0, 1.0, 0.0]);
    }
    let right = v_normalize(right);
    let up = v_normalize(v_cross(right, dir));

    let h = viewport.fov * 0.5;
    let (sin_h, cos_h) = h.sin_cos();

    let side = |axis: Vector3| Plane {
        point: viewport.position,
        normal: v_add(v_scale(axis, cos_h), v_scale(dir, sin_h)),
    };

    [
        Plane {
            point: v_add(viewport.position, v_scale(dir, viewport.near)),
            normal: dir,
        },
        Plane {
            point: v_add(viewport.position, v_scale(dir, viewport.far)),
            normal: v_scale(dir, -1.0),
        },
        side(right),                // left boundary
        side(v_scale(right, -1.0)), // right boundary
        side(up),                   // bottom boundary
        side(v_scale(up, -1.0)),    // top boundary
    ]
}

fn aabb_corners(bounds: &crate::types::geometry::BoundingBox) -> [Vector3; 8] {
    let mut out = [[0.0; 3]; 8];
    for (i, corner) in out.iter_mut().enumerate() {
        *corner = [
            if i & 1 != 0 { bounds.max[0] } else { bounds.min[0] },
            if i & 2 != 0 { bounds.max[1] } else { bounds.min[1] },
            if i & 4 != 0 { bounds.max[2] } else { bounds.min[2] },
        ];
    }
    out
}
