//! Per-entity and per-skill running statistics.
//!
//! These are the mutable accumulators owned by the engine; external
//! consumers only ever see the snapshot types at the bottom of this file.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::proto::combat::CombatEvent;

#[derive(Debug, Clone, Default)]
pub struct SkillAggregate {
    pub skill_id: i64,
    pub total_value: u64,
    pub use_count: u64,
    pub crit_count: u64,
    pub lucky_count: u64,
    /// None until a real value has been observed; the sentinel never
    /// reaches output (snapshots resolve it to 0).
    min_value: Option<u64>,
    pub max_value: u64,
    pub highest_crit: u64,
}

impl SkillAggregate {
    fn record(&mut self, ev: &CombatEvent) {
        let value = ev.magnitude as u64;
        self.total_value += value;
        self.use_count += 1;
        if ev.is_critical {
            self.crit_count += 1;
            self.highest_crit = self.highest_crit.max(value);
        }
        if ev.is_lucky {
            self.lucky_count += 1;
        }
        self.min_value = Some(self.min_value.map_or(value, |m| m.min(value)));
        self.max_value = self.max_value.max(value);
    }

    pub fn min_value(&self) -> u64 {
        self.min_value.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowSample {
    at_ms: i64,
    magnitude: u64,
    is_heal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EntityAggregate {
    pub total_damage_dealt: u64,
    pub total_damage_taken: u64,
    pub total_healing: u64,
    pub skills: HashMap<i64, SkillAggregate>,
    /// Time spent actually fighting: the sum of inter-event gaps no longer
    /// than the configured cutoff. Travel and downtime never land here.
    pub active_combat_ms: i64,
    pub first_event_ms: Option<i64>,
    pub last_event_ms: Option<i64>,
    /// Trailing samples for instantaneous rates, pruned on write.
    recent: VecDeque<WindowSample>,
}

impl EntityAggregate {
    /// Record an outgoing event (damage dealt or healing done).
    pub fn record_dealt(&mut self, ev: &CombatEvent, combat_gap_ms: i64, window_ms: i64) {
        self.touch_active(ev.at_ms, combat_gap_ms);
        let value = ev.magnitude as u64;
        if ev.is_heal {
            self.total_healing += value;
        } else {
            self.total_damage_dealt += value;
        }
        self.skills
            .entry(ev.skill_id)
            .or_insert_with(|| SkillAggregate {
                skill_id: ev.skill_id,
                ..Default::default()
            })
            .record(ev);

        self.recent.push_back(WindowSample {
            at_ms: ev.at_ms,
            magnitude: value,
            is_heal: ev.is_heal,
        });
        while let Some(front) = self.recent.front() {
            if ev.at_ms.saturating_sub(front.at_ms) > window_ms {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an incoming hit. Does not advance active-combat time; the
    /// denominator belongs to the dealing side.
    pub fn record_taken(&mut self, ev: &CombatEvent) {
        self.total_damage_taken += ev.magnitude as u64;
    }

    fn touch_active(&mut self, at_ms: i64, combat_gap_ms: i64) {
        if self.first_event_ms.is_none() {
            self.first_event_ms = Some(at_ms);
        }
        if let Some(last) = self.last_event_ms {
            let delta = at_ms.saturating_sub(last);
            if delta > 0 && delta <= combat_gap_ms {
                self.active_combat_ms += delta;
            }
        }
        self.last_event_ms = Some(at_ms);
    }

    /// Sum of (damage, healing) magnitudes inside the trailing window.
    pub fn window_sums(&self, now_ms: i64, window_ms: i64) -> (u64, u64) {
        let mut damage = 0u64;
        let mut healing = 0u64;
        for sample in self.recent.iter().rev() {
            if now_ms.saturating_sub(sample.at_ms) > window_ms {
                break;
            }
            if sample.is_heal {
                healing += sample.magnitude;
            } else {
                damage += sample.magnitude;
            }
        }
        (damage, healing)
    }
}

// ============================================================================
// Read-only snapshots
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SkillSnapshot {
    pub skill_id: i64,
    pub total_value: u64,
    pub use_count: u64,
    pub crit_count: u64,
    pub lucky_count: u64,
    pub min_value: u64,
    pub max_value: u64,
    pub highest_crit: u64,
}

impl From<&SkillAggregate> for SkillSnapshot {
    fn from(agg: &SkillAggregate) -> Self {
        Self {
            skill_id: agg.skill_id,
            total_value: agg.total_value,
            use_count: agg.use_count,
            crit_count: agg.crit_count,
            lucky_count: agg.lucky_count,
            min_value: agg.min_value(),
            max_value: agg.max_value,
            highest_crit: agg.highest_crit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub id: i64,
    pub is_player: bool,
    pub name: Option<String>,
    pub profession_id: Option<u32>,
    pub level: Option<u32>,
    pub fight_point: Option<u32>,
    pub cur_hp: Option<u32>,
    pub max_hp: Option<u32>,
    pub total_damage_dealt: u64,
    pub total_damage_taken: u64,
    pub total_healing: u64,
    pub active_combat_ms: i64,
    /// Finalized averages over active combat time.
    pub dps: f64,
    pub hps: f64,
    /// Trailing-window throughput over wall-clock time, for live display.
    pub instant_dps: f64,
    pub instant_hps: f64,
    pub skills: Vec<SkillSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeterSnapshot {
    pub section_active: bool,
    pub section_elapsed_ms: i64,
    pub entities: Vec<EntitySnapshot>,
}

/// A finished section, frozen for whoever persists history.
#[derive(Debug, Clone, Serialize)]
pub struct FrozenSection {
    pub index: u64,
    pub started_ms: i64,
    pub ended_ms: i64,
    pub entities: Vec<EntitySnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::attrs::EntityRef;

    fn event(at_ms: i64, magnitude: i64) -> CombatEvent {
        CombatEvent {
            skill_id: 7,
            attacker: EntityRef::player(1),
            target: EntityRef { id: 2, is_player: false },
            magnitude,
            is_heal: false,
            is_critical: false,
            is_lucky: false,
            is_cause_lucky: false,
            is_miss: false,
            is_kill: false,
            element_tag: 0,
            source_tag: 0,
            hp_lessen: 0,
            at_ms,
            sequence_id: 0,
        }
    }

    #[test]
    fn active_time_accrues_only_small_gaps() {
        let mut agg = EntityAggregate::default();
        agg.record_dealt(&event(1_000, 10), 1_000, 1_000);
        agg.record_dealt(&event(2_000, 10), 1_000, 1_000);
        assert_eq!(agg.active_combat_ms, 1_000);
        // A 5 s pause between fights must not inflate the denominator.
        agg.record_dealt(&event(7_000, 10), 1_000, 1_000);
        assert_eq!(agg.active_combat_ms, 1_000);
        agg.record_dealt(&event(7_400, 10), 1_000, 1_000);
        assert_eq!(agg.active_combat_ms, 1_400);
    }

    #[test]
    fn skill_min_is_never_the_unset_sentinel() {
        let agg = SkillAggregate::default();
        assert_eq!(agg.min_value(), 0);

        let mut agg = SkillAggregate::default();
        agg.record(&event(0, 500));
        agg.record(&event(0, 300));
        assert_eq!(agg.min_value(), 300);
        assert_eq!(agg.max_value, 500);
    }

    #[test]
    fn crit_tracking_updates_highest_crit() {
        let mut agg = SkillAggregate::default();
        let mut crit = event(0, 900);
        crit.is_critical = true;
        agg.record(&event(0, 100));
        agg.record(&crit);
        assert_eq!(agg.crit_count, 1);
        assert_eq!(agg.highest_crit, 900);
    }

    #[test]
    fn window_sums_only_cover_the_trailing_window() {
        let mut agg = EntityAggregate::default();
        agg.record_dealt(&event(0, 100), 1_000, 1_000);
        agg.record_dealt(&event(600, 200), 1_000, 1_000);
        agg.record_dealt(&event(1_200, 400), 1_000, 1_000);
        let (damage, healing) = agg.window_sums(1_200, 1_000);
        assert_eq!(damage, 600);
        assert_eq!(healing, 0);

        let mut heal = event(1_300, 50);
        heal.is_heal = true;
        agg.record_dealt(&heal, 1_000, 1_000);
        let (damage, healing) = agg.window_sums(1_300, 1_000);
        assert_eq!(damage, 600);
        assert_eq!(healing, 50);
    }

    #[test]
    fn heal_and_damage_go_to_separate_totals() {
        let mut agg = EntityAggregate::default();
        agg.record_dealt(&event(0, 100), 1_000, 1_000);
        let mut heal = event(100, 70);
        heal.is_heal = true;
        agg.record_dealt(&heal, 1_000, 1_000);
        assert_eq!(agg.total_damage_dealt, 100);
        assert_eq!(agg.total_healing, 70);
    }
}
