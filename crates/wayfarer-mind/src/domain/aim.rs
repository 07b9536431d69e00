//! Head aim interpolation
//!
//! Moves the look direction toward a set point by at most a fixed number of
//! degrees per tick, taking the short way around the ±180° seam for yaw.

use serde::{Deserialize, Serialize};

/// Wrap an angle into (-180, 180]
pub fn wrap_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Step `current` toward `target` by at most `max_step` along the shortest arc
pub fn approach_angle(current: f32, target: f32, max_step: f32) -> f32 {
    let diff = wrap_degrees(target - current);
    if diff.abs() <= max_step {
        return wrap_degrees(target);
    }
    wrap_degrees(current + max_step * diff.signum())
}

/// Head aim state owned by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadAim {
    pub yaw: f32,
    pub pitch: f32,
    pub target_yaw: f32,
    pub target_pitch: f32,
    /// Degrees per tick
    pub speed: f32,
}

impl HeadAim {
    pub fn new(speed: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            target_yaw: 0.0,
            target_pitch: 0.0,
            speed: speed.abs(),
        }
    }

    pub fn set_target(&mut self, yaw: f32, pitch: f32) {
        self.target_yaw = wrap_degrees(yaw);
        self.target_pitch = pitch.clamp(-90.0, 90.0);
    }

    /// Mirror the live head while another layer owns it; the set point
    /// follows so control resumes without a jump.
    pub fn mirror(&mut self, yaw: f32, pitch: f32) {
        self.yaw = wrap_degrees(yaw);
        self.pitch = pitch.clamp(-90.0, 90.0);
        self.target_yaw = self.yaw;
        self.target_pitch = self.pitch;
    }

    /// Advance one tick, returning the new (yaw, pitch)
    pub fn step(&mut self) -> (f32, f32) {
        self.yaw = approach_angle(self.yaw, self.target_yaw, self.speed);
        let dp = self.target_pitch - self.pitch;
        self.pitch = if dp.abs() <= self.speed {
            self.target_pitch
        } else {
            self.pitch + self.speed * dp.signum()
        };
        (self.yaw, self.pitch)
    }

    pub fn settled(&self) -> bool {
        self.yaw == self.target_yaw && self.pitch == self.target_pitch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crosses_seam_the_short_way() {
        let mut aim = HeadAim::new(15.0);
        aim.yaw = 170.0;
        aim.set_target(-170.0, 0.0);

        let (yaw, _) = aim.step();
        assert_eq!(yaw, -175.0);
        let (yaw, _) = aim.step();
        assert_eq!(yaw, -170.0);
        assert!(aim.settled());
    }

    #[test]
    fn test_pitch_clamped_and_interpolated() {
        let mut aim = HeadAim::new(10.0);
        aim.set_target(0.0, 120.0);
        assert_eq!(aim.target_pitch, 90.0);
        assert_eq!(aim.step().1, 10.0);
    }

    #[test]
    fn test_mirror_resets_set_point() {
        let mut aim = HeadAim::new(15.0);
        aim.set_target(90.0, 0.0);
        aim.mirror(-45.0, 20.0);
        assert!(aim.settled());
        assert_eq!(aim.step(), (-45.0, 20.0));
    }

    proptest! {
        #[test]
        fn prop_step_bounded_and_wrapped(
            current in -180.0f32..180.0,
            target in -720.0f32..720.0,
            step in 0.5f32..45.0,
        ) {
            let next = approach_angle(current, target, step);
            prop_assert!(next > -180.0 && next <= 180.0);
            prop_assert!(wrap_degrees(next - current).abs() <= step + 1e-3);
        }
    }
}
