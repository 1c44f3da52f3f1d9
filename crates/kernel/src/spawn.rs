//! Gradual particle birth.
//!
//! Instead of starting with every particle alive, a run can begin with all
//! slots dormant and bring one particle to life at a fixed point after every
//! `interval` ticks. Birth happens outside the stage pipeline, after the last
//! stage of a tick has retired.

use std::collections::VecDeque;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::particle::Particle;

/// Where and how often particles are born.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnSchedule {
    /// Birth point.
    pub point: [f32; 3],
    /// Uniform positional jitter amplitude per axis.
    #[serde(default)]
    pub jitter: f32,
    /// Ticks between births (at least 1).
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Velocity given to every newborn particle.
    #[serde(default)]
    pub initial_velocity: [f32; 3],
    /// Seed of the jitter generator.
    #[serde(default)]
    pub seed: u64,
}

fn default_interval() -> u32 {
    1
}

/// Stateful emitter following a [`SpawnSchedule`].
///
/// Births fill the slots that were dormant at construction, in index order.
/// Particles never die, so a slot that was alive at construction is never
/// handed out.
#[derive(Debug, Clone)]
pub struct GradualSpawner {
    schedule: SpawnSchedule,
    rng: StdRng,
    dormant: VecDeque<usize>,
    ticks_since_birth: u32,
}

impl GradualSpawner {
    /// Emitter over the dormant slots of `particles`.
    pub fn new(schedule: SpawnSchedule, particles: &[Particle]) -> Self {
        let dormant = particles
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_alive())
            .map(|(slot, _)| slot)
            .collect();
        Self {
            rng: StdRng::seed_from_u64(schedule.seed),
            schedule,
            dormant,
            ticks_since_birth: 0,
        }
    }

    /// Schedule this emitter follows.
    pub fn schedule(&self) -> &SpawnSchedule {
        &self.schedule
    }

    /// Dormant slots still waiting for a birth.
    pub fn remaining(&self) -> usize {
        self.dormant.len()
    }

    /// Whether every dormant slot has been filled.
    pub fn is_exhausted(&self) -> bool {
        self.dormant.is_empty()
    }

    /// Advance by one tick. Returns the slot and particle to activate when a
    /// birth is due, with the position clamped into `[lo, hi]`.
    pub fn tick(&mut self, lo: Vec3, hi: Vec3) -> Option<(usize, Particle)> {
        if self.is_exhausted() {
            return None;
        }
        self.ticks_since_birth += 1;
        if self.ticks_since_birth < self.schedule.interval.max(1) {
            return None;
        }
        self.ticks_since_birth = 0;

        let a = self.schedule.jitter.abs();
        let offset = if a > 0.0 {
            Vec3::new(
                self.rng.gen_range(-a..=a),
                self.rng.gen_range(-a..=a),
                self.rng.gen_range(-a..=a),
            )
        } else {
            Vec3::ZERO
        };
        let pos = (Vec3::from_array(self.schedule.point) + offset).clamp(lo, hi);
        let slot = self.dormant.pop_front()?;
        Some((
            slot,
            Particle::spawned(pos, Vec3::from_array(self.schedule.initial_velocity)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(interval: u32) -> SpawnSchedule {
        SpawnSchedule {
            point: [1.0, 2.0, 1.0],
            jitter: 0.05,
            interval,
            initial_velocity: [0.0, -1.0, 0.0],
            seed: 7,
        }
    }

    fn dormant(n: usize) -> Vec<Particle> {
        vec![Particle::dormant(Vec3::ZERO); n]
    }

    #[test]
    fn one_birth_per_interval() {
        let mut s = GradualSpawner::new(schedule(3), &dormant(10));
        let births: Vec<usize> = (0..9)
            .filter_map(|_| s.tick(Vec3::ZERO, Vec3::splat(4.0)))
            .map(|(slot, _)| slot)
            .collect();
        assert_eq!(births, vec![0, 1, 2]);
    }

    #[test]
    fn births_stop_at_capacity() {
        let mut slots = dormant(3);
        slots[0] = Particle::spawned(Vec3::ONE, Vec3::ZERO);
        slots[1] = Particle::spawned(Vec3::ONE, Vec3::ZERO);
        let mut s = GradualSpawner::new(schedule(1), &slots);
        assert_eq!(s.remaining(), 1);
        assert_eq!(s.tick(Vec3::ZERO, Vec3::splat(4.0)).map(|(slot, _)| slot), Some(2));
        assert!(s.is_exhausted());
        assert!(s.tick(Vec3::ZERO, Vec3::splat(4.0)).is_none());
    }

    #[test]
    fn newborns_stay_near_spawn_point() {
        let mut s = GradualSpawner::new(schedule(1), &dormant(100));
        for _ in 0..20 {
            let (_, p) = s.tick(Vec3::ZERO, Vec3::splat(4.0)).unwrap();
            assert!(p.is_alive());
            let d = Vec3::from_array(p.pos) - Vec3::new(1.0, 2.0, 1.0);
            assert!(d.abs().max_element() <= 0.05 + 1e-6);
            assert_eq!(p.vel, [0.0, -1.0, 0.0]);
            assert_eq!(p.pos_lf, p.pos);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = GradualSpawner::new(schedule(1), &dormant(100));
        let mut b = GradualSpawner::new(schedule(1), &dormant(100));
        for _ in 0..5 {
            let lo = Vec3::ZERO;
            let hi = Vec3::splat(4.0);
            assert_eq!(a.tick(lo, hi), b.tick(lo, hi));
        }
    }

    #[test]
    fn spawn_point_is_clamped_into_box() {
        let mut sched = schedule(1);
        sched.point = [10.0, -3.0, 1.0];
        sched.jitter = 0.0;
        let mut s = GradualSpawner::new(sched, &dormant(1));
        let (_, p) = s.tick(Vec3::splat(0.5), Vec3::splat(3.5)).unwrap();
        assert_eq!(p.pos, [3.5, 0.5, 1.0]);
    }

    #[test]
    fn live_slots_are_never_reused() {
        let mut slots = dormant(4);
        slots[1] = Particle::spawned(Vec3::splat(3.0), Vec3::ZERO);
        slots[2] = Particle::spawned(Vec3::splat(2.0), Vec3::ZERO);
        let mut s = GradualSpawner::new(schedule(1), &slots);
        let births: Vec<usize> = (0..6)
            .filter_map(|_| s.tick(Vec3::ZERO, Vec3::splat(4.0)))
            .map(|(slot, _)| slot)
            .collect();
        assert_eq!(births, vec![0, 3]);
    }

    #[test]
    fn schedule_defaults_from_json() {
        let s: SpawnSchedule = serde_json::from_str(r#"{ "point": [0.5, 1.0, 0.5] }"#).unwrap();
        assert_eq!(s.interval, 1);
        assert_eq!(s.jitter, 0.0);
        assert_eq!(s.initial_velocity, [0.0; 3]);
        assert_eq!(s.seed, 0);
    }
}
