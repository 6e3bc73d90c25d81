//! Simulated station hardware.
//!
//! Each spot has an occupancy sensor and, while a bike is docked, a battery
//! sensor for that bike. Occupancy is sticky: a docked bike stays with
//! probability 0.65, an empty spot gets a bike with probability 0.5.

use chrono::{DateTime, Utc};
use rand::Rng;

use dock_core::{SensorSnapshot, SpotId, SpotPoll, BATTERY_CHARGE_PER_SEC};
use dock_sync::SensorFeed;

const STAY_OCCUPIED: f64 = 0.65;
const BIKE_ARRIVES: f64 = 0.5;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Battery of the bike currently docked on a spot.
#[derive(Debug, Clone, Copy)]
struct Battery {
    level: f64,
    last_sensed: DateTime<Utc>,
}

impl Battery {
    /// A freshly docked bike is never completely empty or full.
    fn docked<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> Self {
        Battery {
            level: round4(rng.gen_range(0.01..=0.99)),
            last_sensed: now,
        }
    }

    fn sense(&mut self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.last_sensed).num_milliseconds().max(0) as f64 / 1000.0;
        self.last_sensed = now;
        if self.level < 1.0 {
            self.level = (self.level + round4(elapsed * BATTERY_CHARGE_PER_SEC)).min(1.0);
        }
        self.level
    }
}

/// Random occupancy, charging batteries and solar production.
pub struct SimulatedSensors<R> {
    rng: R,
    /// One entry per spot; `Some` while a bike is docked.
    spots: Vec<Option<Battery>>,
    peak_production_kw: f64,
}

impl<R: Rng + Send> SimulatedSensors<R> {
    pub fn new(mut rng: R, spot_count: i64, peak_production_kw: f64, now: DateTime<Utc>) -> Self {
        let spots = (0..spot_count)
            .map(|_| rng.gen_bool(0.5).then(|| Battery::docked(&mut rng, now)))
            .collect();
        SimulatedSensors {
            rng,
            spots,
            peak_production_kw,
        }
    }

    fn step_spot(&mut self, index: usize, now: DateTime<Utc>) -> SpotPoll {
        let was_occupied = self.spots[index].is_some();
        let occupied = if was_occupied {
            self.rng.gen_bool(STAY_OCCUPIED)
        } else {
            self.rng.gen_bool(BIKE_ARRIVES)
        };

        let slot = &mut self.spots[index];
        match (was_occupied, occupied) {
            (true, false) => *slot = None,
            (false, true) => *slot = Some(Battery::docked(&mut self.rng, now)),
            _ => {}
        }

        SpotPoll {
            spot_id: index as SpotId,
            is_occupied: occupied,
            battery_level: slot.as_mut().map(|battery| battery.sense(now)),
        }
    }
}

impl<R: Rng + Send> SensorFeed for SimulatedSensors<R> {
    fn poll(&mut self, now: DateTime<Utc>) -> SensorSnapshot {
        let spots = (0..self.spots.len())
            .map(|index| self.step_spot(index, now))
            .collect();
        let production_kw = if self.peak_production_kw > 0.0 {
            round4(self.rng.gen_range(0.0..=self.peak_production_kw))
        } else {
            0.0
        };
        SensorSnapshot {
            spots,
            production_kw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_poll_reports_every_spot_in_order() {
        let mut sensors = SimulatedSensors::new(StdRng::seed_from_u64(7), 5, 5.0, t0());

        for i in 1..=20 {
            let snapshot = sensors.poll(t0() + Duration::seconds(5 * i));
            let ids: Vec<_> = snapshot.spots.iter().map(|s| s.spot_id).collect();
            assert_eq!(ids, vec![0, 1, 2, 3, 4]);
            assert!((0.0..=5.0).contains(&snapshot.production_kw));

            for spot in &snapshot.spots {
                match spot.battery_level {
                    Some(level) => {
                        assert!(spot.is_occupied);
                        assert!((0.01..=1.0).contains(&level));
                    }
                    None => assert!(!spot.is_occupied),
                }
            }
        }
    }

    #[test]
    fn test_docked_bike_charges_and_caps_at_full() {
        // All-zero randomness: every spot is occupied, stays occupied, and
        // each new battery starts at the lower bound.
        let mut sensors = SimulatedSensors::new(StepRng::new(0, 0), 2, 5.0, t0());

        let first = sensors.poll(t0() + Duration::seconds(10));
        let level = first.spots[0].battery_level.unwrap();
        assert!((level - (0.01 + 0.033)).abs() < 1e-9);

        let later = sensors.poll(t0() + Duration::hours(1));
        assert_eq!(later.spots[0].battery_level, Some(1.0));
        assert_eq!(later.occupied_count(), 2);
    }

    #[test]
    fn test_no_production_without_panel() {
        let mut sensors = SimulatedSensors::new(StdRng::seed_from_u64(1), 3, 0.0, t0());
        assert_eq!(sensors.poll(t0()).production_kw, 0.0);
    }
}
