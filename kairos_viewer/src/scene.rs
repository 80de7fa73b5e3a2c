use std::{f32::consts::TAU, time::Duration};

/// State that the update thread advances and the render hooks read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    pub tick: u64,
    /// Angle of the camera orbiting around the origin
    pub camera_angle: f32,
    pub camera_distance: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            tick: 0,
            camera_angle: 0.0,
            camera_distance: 1.0,
        }
    }
}

impl Scene {
    /// Radians per second
    const ROTATION_SPEED: f32 = 0.5;

    /// Returns the scene one tick of `dt` later
    pub fn advance(&self, tick: u64, dt: Duration) -> Self {
        let camera_angle = (self.camera_angle + Self::ROTATION_SPEED * dt.as_secs_f32()) % TAU;
        let camera_distance = 1.0 + 0.25 * (tick as f32 * dt.as_secs_f32()).sin();
        Self {
            tick,
            camera_angle,
            camera_distance,
        }
    }

    /// Blends two consecutive states. `alpha` is clamped to `[0, 1]`.
    pub fn interpolate(previous: &Scene, next: &Scene, alpha: f64) -> Self {
        let alpha = alpha.clamp(0.0, 1.0) as f32;
        let mut delta = next.camera_angle - previous.camera_angle;
        // Take the short way when the angle wrapped around
        if delta > TAU / 2.0 {
            delta -= TAU;
        } else if delta < -TAU / 2.0 {
            delta += TAU;
        }
        Self {
            tick: next.tick,
            camera_angle: (previous.camera_angle + alpha * delta).rem_euclid(TAU),
            camera_distance: previous.camera_distance + alpha * (next.camera_distance - previous.camera_distance),
        }
    }

    pub fn camera_position(&self) -> [f32; 3] {
        [
            self.camera_distance * self.camera_angle.sin(),
            0.5,
            self.camera_distance * self.camera_angle.cos(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance() {
        let scene = Scene::default().advance(1, Duration::from_secs(1));
        assert_eq!(scene.tick, 1);
        assert!((scene.camera_angle - 0.5).abs() < 1e-6);
    }

    #[test]
    fn interpolate_halfway() {
        let previous = Scene::default();
        let next = Scene {
            tick: 1,
            camera_angle: 1.0,
            camera_distance: 2.0,
        };
        let scene = Scene::interpolate(&previous, &next, 0.5);
        assert!((scene.camera_angle - 0.5).abs() < 1e-6);
        assert!((scene.camera_distance - 1.5).abs() < 1e-6);
    }

    #[test]
    fn interpolate_across_the_wrap() {
        let previous = Scene {
            camera_angle: TAU - 0.1,
            ..Default::default()
        };
        let next = Scene {
            camera_angle: 0.1,
            ..Default::default()
        };
        let scene = Scene::interpolate(&previous, &next, 0.5);
        assert!(scene.camera_angle < 1e-5 || (TAU - scene.camera_angle) < 1e-5);
    }
}
