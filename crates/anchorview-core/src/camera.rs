//! Camera and damped orbit navigation

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

use crate::transform::Transform;

/// Smallest polar angle kept away from the poles
const MIN_POLAR: f32 = 1e-3;
/// Pending deltas below this are dropped instead of decaying forever
const REST_EPSILON: f32 = 1e-6;

/// Perspective camera settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Vertical field of view in degrees
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    /// Fraction of the pending orbit motion applied per frame (0 disables damping)
    #[serde(default = "default_damping")]
    pub damping: f32,
}

fn default_fov() -> f32 {
    60.0
}

fn default_near() -> f32 {
    0.01
}

fn default_far() -> f32 {
    20.0
}

fn default_damping() -> f32 {
    0.05
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_degrees: default_fov(),
            near: default_near(),
            far: default_far(),
            damping: default_damping(),
        }
    }
}

/// Camera handed to the renderer together with the scene graph
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub projection: Mat4,
    pub transform: Transform,
}

impl Camera {
    pub fn perspective(settings: &CameraSettings, aspect: f32) -> Self {
        Self {
            projection: Mat4::perspective_rh_gl(
                settings.fov_degrees.to_radians(),
                aspect,
                settings.near,
                settings.far,
            ),
            transform: Transform::IDENTITY,
        }
    }

    /// Replace the projection, e.g. with the one derived from camera calibration
    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.transform.to_matrix().inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }
}

/// Orbit controller with damping and panning disabled.
///
/// Input accumulates into pending deltas; every [`OrbitControls::update`] applies
/// `damping` of what is pending and keeps the rest for later frames.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub damping: f32,
    radius: f32,
    azimuth: f32,
    polar: f32,
    pending_azimuth: f32,
    pending_polar: f32,
    pending_scale: f32,
}

impl OrbitControls {
    /// Start orbiting `target` from the camera's current position
    pub fn new(camera: &Camera, target: Vec3, damping: f32) -> Self {
        let offset = camera.transform.translation - target;
        let radius = offset.length();
        let (azimuth, polar) = if radius > REST_EPSILON {
            (
                offset.x.atan2(offset.z),
                (offset.y / radius).clamp(-1.0, 1.0).acos(),
            )
        } else {
            (0.0, FRAC_PI_2)
        };

        Self {
            target,
            damping: damping.clamp(0.0, 1.0),
            radius,
            azimuth,
            polar: polar.clamp(MIN_POLAR, PI - MIN_POLAR),
            pending_azimuth: 0.0,
            pending_polar: 0.0,
            pending_scale: 1.0,
        }
    }

    pub fn rotate_left(&mut self, angle: f32) {
        self.pending_azimuth -= angle;
    }

    pub fn rotate_up(&mut self, angle: f32) {
        self.pending_polar -= angle;
    }

    /// Scale the orbit radius (values below 1 move closer)
    pub fn dolly(&mut self, scale: f32) {
        if scale.is_finite() && scale > 0.0 {
            self.pending_scale *= scale;
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn is_at_rest(&self) -> bool {
        self.pending_azimuth == 0.0 && self.pending_polar == 0.0 && self.pending_scale == 1.0
    }

    /// Advance one step and write the resulting pose into `camera`.
    /// Returns whether the camera moved.
    pub fn update(&mut self, camera: &mut Camera) -> bool {
        let step = if self.damping > 0.0 { self.damping } else { 1.0 };
        let moved = !self.is_at_rest();

        self.azimuth += self.pending_azimuth * step;
        self.polar = (self.polar + self.pending_polar * step).clamp(MIN_POLAR, PI - MIN_POLAR);
        self.radius *= self.pending_scale;
        self.pending_scale = 1.0;

        if self.damping > 0.0 {
            self.pending_azimuth *= 1.0 - self.damping;
            self.pending_polar *= 1.0 - self.damping;
        } else {
            self.pending_azimuth = 0.0;
            self.pending_polar = 0.0;
        }
        if self.pending_azimuth.abs() < REST_EPSILON {
            self.pending_azimuth = 0.0;
        }
        if self.pending_polar.abs() < REST_EPSILON {
            self.pending_polar = 0.0;
        }

        let rotation = Quat::from_euler(EulerRot::YXZ, self.azimuth, self.polar - FRAC_PI_2, 0.0);
        camera.transform = Transform {
            translation: self.target + rotation * Vec3::new(0.0, 0.0, self.radius),
            rotation,
            scale: Vec3::ONE,
        };
        moved
    }
}
