use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};

/// Model-space position or direction.
pub type Vector3 = [f64; 3];

/// Degenerate-geometry threshold: triangle area and edge lengths below this
/// are rejected on ingest.
pub const GEOMETRY_EPSILON: f64 = 1e-10;

pub fn v_sub(a: Vector3, b: Vector3) -> Vector3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn v_add(a: Vector3, b: Vector3) -> Vector3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn v_scale(a: Vector3, s: f64) -> Vector3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn v_dot(a: Vector3, b: Vector3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn v_cross(a: Vector3, b: Vector3) -> Vector3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn v_length(a: Vector3) -> f64 {
    v_dot(a, a).sqrt()
}

/// Normalize, returning the zero vector unchanged when below epsilon.
pub fn v_normalize(a: Vector3) -> Vector3 {
    let len = v_length(a);
    if len > GEOMETRY_EPSILON {
        v_scale(a, 1.0 / len)
    } else {
        a
    }
}

pub fn v_is_finite(a: Vector3) -> bool {
    a.iter().all(|c| c.is_finite())
}

/// Axis-aligned bounding box in 3-D.
///
/// The empty box is the sentinel `min = +inf, max = -inf`; merging anything
/// into it yields the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vector3,
    pub max: Vector3,
}

impl BoundingBox {
    /// The empty sentinel box.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Centre point of the box.
    pub fn center(&self) -> Vector3 {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Half-extents along each axis.
    pub fn half_extents(&self) -> Vector3 {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    /// Edge lengths along each axis.
    pub fn size(&self) -> Vector3 {
        v_sub(self.max, self.min)
    }

    /// Length of the space diagonal.
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        v_length(self.size())
    }

    /// Longest edge length.
    pub fn longest_edge(&self) -> f64 {
        let s = self.size();
        s[0].max(s[1]).max(s[2])
    }

    /// Axis (0=X, 1=Y, 2=Z) with the longest edge; ties break X, Y, Z.
    pub fn longest_axis(&self) -> usize {
        let s = self.size();
        let mut axis = 0;
        for i in 1..3 {
            if s[i] > s[axis] {
                axis = i;
            }
        }
        axis
    }

    /// Whether a point lies inside the box, padded by `tolerance` on all sides.
    pub fn contains_point(&self, p: Vector3, tolerance: f64) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] - tolerance && p[i] <= self.max[i] + tolerance)
    }

    /// Whether two boxes overlap, each padded by `tolerance`.
    pub fn intersects(&self, other: &BoundingBox, tolerance: f64) -> bool {
        (0..3).all(|i| {
            self.min[i] - tolerance <= other.max[i] && self.max[i] + tolerance >= other.min[i]
        })
    }

    /// Return the smallest box that contains both `self` and `other`.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    /// Grow the box to contain a point.
    pub fn expand(&mut self, p: Vector3) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow the box by `amount` on every side.
    pub fn padded(&self, amount: f64) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0] - amount,
                self.min[1] - amount,
                self.min[2] - amount,
            ],
            max: [
                self.max[0] + amount,
                self.max[1] + amount,
                self.max[2] + amount,
            ],
        }
    }

    /// Clip this box to `other`, returning the intersection box.
    pub fn clipped_to(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0].max(other.min[0]),
                self.min[1].max(other.min[1]),
                self.min[2].max(other.min[2]),
            ],
            max: [
                self.max[0].min(other.max[0]),
                self.max[1].min(other.max[1]),
                self.max[2].min(other.max[2]),
            ],
        }
    }

    /// Bounding box of a triangle set; empty sentinel for an empty slice.
    pub fn of_triangles(triangles: &[Triangle]) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for tri in triangles {
            for v in &tri.vertices {
                bb.expand(*v);
            }
        }
        bb
    }
}

/// One triangle of the source mesh: three vertices, optional per-vertex
/// normals and UVs, optional material reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub vertices: [Vector3; 3],
    pub normals: Option<[Vector3; 3]>,
    pub uvs: Option<[[f64; 2]; 3]>,
    pub material_index: Option<usize>,
}

impl Triangle {
    /// Validating constructor. Rejects non-finite coordinates, edges shorter
    /// than the geometry epsilon, and near-zero area. Normals, if present,
    /// are renormalized on ingest.
    pub fn new(
        vertices: [Vector3; 3],
        normals: Option<[Vector3; 3]>,
        uvs: Option<[[f64; 2]; 3]>,
        material_index: Option<usize>,
    ) -> Result<Self> {
        for v in &vertices {
            if !v_is_finite(*v) {
                return Err(TilerError::InvalidGeometry(format!(
                    "non-finite vertex {v:?}"
                )));
            }
        }
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let edge = v_length(v_sub(vertices[b], vertices[a]));
            if edge <= GEOMETRY_EPSILON {
                return Err(TilerError::InvalidGeometry(format!(
                    "edge {a}-{b} has near-zero length {edge:e}"
                )));
            }
        }
        let area = triangle_area(&vertices);
        if area < GEOMETRY_EPSILON {
            return Err(TilerError::InvalidGeometry(format!(
                "degenerate triangle, area {area:e}"
            )));
        }

        let normals = normals.map(|ns| ns.map(v_normalize));

        Ok(Self {
            vertices,
            normals,
            uvs,
            material_index,
        })
    }

    pub fn centroid(&self) -> Vector3 {
        let [a, b, c] = self.vertices;
        [
            (a[0] + b[0] + c[0]) / 3.0,
            (a[1] + b[1] + c[1]) / 3.0,
            (a[2] + b[2] + c[2]) / 3.0,
        ]
    }

    pub fn area(&self) -> f64 {
        triangle_area(&self.vertices)
    }

    pub fn aabb(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for v in &self.vertices {
            bb.expand(*v);
        }
        bb
    }

    /// Face normal from the winding order (unit length).
    pub fn face_normal(&self) -> Vector3 {
        let e1 = v_sub(self.vertices[1], self.vertices[0]);
        let e2 = v_sub(self.vertices[2], self.vertices[0]);
        v_normalize(v_cross(e1, e2))
    }
}

fn triangle_area(vertices: &[Vector3; 3]) -> f64 {
    let e1 = v_sub(vertices[1], vertices[0]);
    let e2 = v_sub(vertices[2], vertices[0]);
    v_length(v_cross(e1, e2)) * 0.5
}
