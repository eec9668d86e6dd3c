use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// Bounding sphere in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Signed distance from the plane `xyz·p + w = 0` to the closest point of
    /// the sphere. Negative means the sphere lies entirely behind the plane.
    pub fn plane_distance(&self, plane: Vec4) -> f32 {
        plane.truncate().dot(self.center) + plane.w + self.radius
    }
}

/// Spatial extent of a hierarchy node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundingVolume {
    Sphere(BoundingSphere),
    Box(Aabb),
}

impl BoundingVolume {
    /// A volume that contains everything. Used for the hierarchy root.
    pub fn unbounded() -> Self {
        Self::Sphere(BoundingSphere::new(Vec3::ZERO, f32::INFINITY))
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::Sphere(BoundingSphere::new(center, radius))
    }

    pub fn aabb(min: Vec3, max: Vec3) -> Self {
        Self::Box(Aabb::new(min, max))
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        match self {
            Self::Sphere(s) => *s,
            Self::Box(b) => BoundingSphere::new(b.center(), b.half_extents().length()),
        }
    }

    /// Transform into another space. Spheres take the largest axis scale.
    pub fn transformed(&self, m: &Mat4) -> Self {
        match self {
            Self::Sphere(s) => {
                let scale = m
                    .x_axis
                    .truncate()
                    .length()
                    .max(m.y_axis.truncate().length())
                    .max(m.z_axis.truncate().length());
                Self::Sphere(BoundingSphere::new(
                    m.transform_point3(s.center),
                    s.radius * scale,
                ))
            }
            Self::Box(b) => {
                let center = m.transform_point3(b.center());
                let h = b.half_extents();
                let extent = m.x_axis.truncate().abs() * h.x
                    + m.y_axis.truncate().abs() * h.y
                    + m.z_axis.truncate().abs() * h.z;
                Self::Box(Aabb::new(center - extent, center + extent))
            }
        }
    }
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::sphere(Vec3::ZERO, 0.0)
    }
}
