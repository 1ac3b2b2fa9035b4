use rand::{thread_rng, Rng};
use std::time::Duration;

/// Uniform pick from an inclusive millisecond range
pub fn pick_ms((min, max): (u64, u64)) -> u64 {
    if min >= max {
        return min;
    }
    thread_rng().gen_range(min..=max)
}

/// Random pause drawn from an inclusive millisecond range
pub fn pause(range: (u64, u64)) -> Duration {
    Duration::from_millis(pick_ms(range))
}
