// ── Fan speed mapping ──
//
// Vendor suction levels <-> accessory fan rotation speed percentages.

use vacbridge_api::CleanSpeed;

/// Conversion between vendor suction levels and fan rotation speed.
pub trait SpeedMapping: Send + Sync {
    /// Rotation speed percentage for a suction level.
    fn fan_speed(&self, speed: CleanSpeed) -> f64;

    /// Suction level a rotation speed percentage selects.
    fn clean_speed(&self, fan_speed: f64) -> CleanSpeed;
}

/// Quarter steps: silent 25 %, standard 50 %, strong 75 %, max 100 %.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSpeedMapping;

impl SpeedMapping for LinearSpeedMapping {
    fn fan_speed(&self, speed: CleanSpeed) -> f64 {
        match speed {
            CleanSpeed::Silent => 25.0,
            CleanSpeed::Standard => 50.0,
            CleanSpeed::Strong => 75.0,
            CleanSpeed::Max => 100.0,
        }
    }

    fn clean_speed(&self, fan_speed: f64) -> CleanSpeed {
        if fan_speed <= 25.0 {
            CleanSpeed::Silent
        } else if fan_speed <= 50.0 {
            CleanSpeed::Standard
        } else if fan_speed <= 75.0 {
            CleanSpeed::Strong
        } else {
            CleanSpeed::Max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_consistent_in_both_directions() {
        let mapping = LinearSpeedMapping;
        for speed in [
            CleanSpeed::Silent,
            CleanSpeed::Standard,
            CleanSpeed::Strong,
            CleanSpeed::Max,
        ] {
            assert_eq!(mapping.clean_speed(mapping.fan_speed(speed)), speed);
        }
    }

    #[test]
    fn intermediate_speeds_round_up_to_the_next_level() {
        let mapping = LinearSpeedMapping;
        assert_eq!(mapping.clean_speed(0.0), CleanSpeed::Silent);
        assert_eq!(mapping.clean_speed(26.0), CleanSpeed::Standard);
        assert_eq!(mapping.clean_speed(74.9), CleanSpeed::Strong);
        assert_eq!(mapping.clean_speed(80.0), CleanSpeed::Max);
    }
}
