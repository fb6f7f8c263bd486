//! The aggregation engine - root consumer of decoded combat events.
//!
//! One explicitly owned instance per analyzer; the decode path writes,
//! the UI/polling path reads, both through this type. Entity identity
//! (names, HP, profession) survives section resets; combat aggregates are
//! cleared wholesale when a section ends.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::aggregate::{EntityAggregate, EntitySnapshot, FrozenSection, MeterSnapshot};
use crate::config::AnalyzerConfig;
use crate::proto::attrs::EntityRef;
use crate::proto::combat::CombatEvent;

#[derive(Debug, Clone, Default)]
struct EntityInfo {
    is_player: bool,
    name: Option<String>,
    profession_id: Option<u32>,
    level: Option<u32>,
    fight_point: Option<u32>,
    cur_hp: Option<u32>,
    max_hp: Option<u32>,
}

#[derive(Debug, Default)]
struct SectionState {
    active: bool,
    started_ms: i64,
    last_damage_ms: i64,
    next_index: u64,
}

/// Instantaneous throughput over the trailing window, per wall-clock time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InstantRates {
    pub dps: f64,
    pub hps: f64,
}

/// Identity attributes of one entity, independent of combat aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct EntityInfoSnapshot {
    pub id: i64,
    pub is_player: bool,
    pub name: Option<String>,
    pub profession_id: Option<u32>,
    pub level: Option<u32>,
    pub fight_point: Option<u32>,
    pub cur_hp: Option<u32>,
    pub max_hp: Option<u32>,
}

pub struct AggregationEngine {
    cfg: AnalyzerConfig,
    /// Identity attributes; fed by the attribute decoders, kept across
    /// section boundaries.
    info: DashMap<i64, EntityInfo>,
    /// Current-section aggregates; cleared when a section ends.
    live: DashMap<i64, EntityAggregate>,
    /// Full-session aggregates; only an explicit reset clears these.
    session: DashMap<i64, EntityAggregate>,
    section: Mutex<SectionState>,
}

impl AggregationEngine {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self {
            cfg,
            info: DashMap::new(),
            live: DashMap::new(),
            session: DashMap::new(),
            section: Mutex::new(SectionState::default()),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.cfg
    }

    /// Ingest one combat event. Returns the frozen previous section when
    /// this event arrived after the section timeout elapsed.
    pub fn ingest(&self, ev: &CombatEvent) -> Option<FrozenSection> {
        let ended = self.maybe_end_section(ev.at_ms);

        {
            let mut section = self.section.lock();
            if !section.active {
                section.active = true;
                section.started_ms = ev.at_ms;
                section.last_damage_ms = ev.at_ms;
                debug!(at_ms = ev.at_ms, "section started");
            } else if !ev.is_heal {
                section.last_damage_ms = ev.at_ms;
            }
        }

        self.touch_entity(ev.attacker);
        self.touch_entity(ev.target);

        for table in [&self.live, &self.session] {
            table
                .entry(ev.attacker.id)
                .or_default()
                .record_dealt(ev, self.cfg.combat_gap_ms, self.cfg.window_ms);
            if !ev.is_heal {
                table.entry(ev.target.id).or_default().record_taken(ev);
            }
        }

        if ev.is_kill {
            self.set_hp(ev.target, 0);
        }

        ended
    }

    /// End the current section if no damage has been seen for the
    /// configured timeout. Called on every ingest; callers with their own
    /// clock (replay pacing, UI ticks) may also call it directly.
    pub fn maybe_end_section(&self, now_ms: i64) -> Option<FrozenSection> {
        let mut section = self.section.lock();
        if !section.active
            || now_ms.saturating_sub(section.last_damage_ms) < self.cfg.section_timeout_ms
        {
            return None;
        }
        Some(self.end_section(&mut section))
    }

    /// Unconditionally end the current section, if one is active.
    pub fn declare_section_boundary(&self) -> Option<FrozenSection> {
        let mut section = self.section.lock();
        if !section.active {
            return None;
        }
        Some(self.end_section(&mut section))
    }

    fn end_section(&self, section: &mut SectionState) -> FrozenSection {
        let ended_ms = section.last_damage_ms;
        let entities = self.collect(&self.live, ended_ms);
        self.live.clear();
        section.active = false;
        let frozen = FrozenSection {
            index: section.next_index,
            started_ms: section.started_ms,
            ended_ms,
            entities,
        };
        section.next_index += 1;
        info!(
            index = frozen.index,
            duration_ms = frozen.ended_ms - frozen.started_ms,
            entities = frozen.entities.len(),
            "section ended"
        );
        frozen
    }

    /// Read-only view of the current section.
    pub fn snapshot(&self, now_ms: i64) -> MeterSnapshot {
        let section = self.section.lock();
        let section_active = section.active;
        let section_elapsed_ms = if section.active {
            now_ms.saturating_sub(section.started_ms)
        } else {
            0
        };
        drop(section);
        MeterSnapshot {
            section_active,
            section_elapsed_ms,
            entities: self.collect(&self.live, now_ms),
        }
    }

    /// Read-only view of the whole session (survives section resets).
    pub fn session_snapshot(&self, now_ms: i64) -> Vec<EntitySnapshot> {
        self.collect(&self.session, now_ms)
    }

    /// Identity attributes for one entity, even before it has dealt or
    /// taken anything.
    pub fn entity_info(&self, id: i64) -> Option<EntityInfoSnapshot> {
        self.info.get(&id).map(|info| EntityInfoSnapshot {
            id,
            is_player: info.is_player,
            name: info.name.clone(),
            profession_id: info.profession_id,
            level: info.level,
            fight_point: info.fight_point,
            cur_hp: info.cur_hp,
            max_hp: info.max_hp,
        })
    }

    /// Instantaneous DPS/HPS: trailing-window magnitudes over the window's
    /// wall-clock length. Distinct from the finalized per-section average.
    pub fn sliding_window_rate(&self, entity_id: i64, window_ms: i64, now_ms: i64) -> InstantRates {
        let window_ms = window_ms.max(1);
        match self.live.get(&entity_id) {
            Some(agg) => {
                let (damage, healing) = agg.window_sums(now_ms, window_ms);
                let secs = window_ms as f64 / 1_000.0;
                InstantRates {
                    dps: damage as f64 / secs,
                    hps: healing as f64 / secs,
                }
            }
            None => InstantRates { dps: 0.0, hps: 0.0 },
        }
    }

    /// Drop everything, including session totals and entity identity.
    pub fn reset(&self) {
        self.info.clear();
        self.live.clear();
        self.session.clear();
        *self.section.lock() = SectionState::default();
        info!("aggregation state cleared");
    }

    fn collect(&self, table: &DashMap<i64, EntityAggregate>, now_ms: i64) -> Vec<EntitySnapshot> {
        let mut entities: Vec<EntitySnapshot> = table
            .iter()
            .map(|entry| {
                let agg = entry.value();
                let info = self
                    .info
                    .get(entry.key())
                    .map(|i| i.value().clone())
                    .unwrap_or_default();
                let active_secs = agg.active_combat_ms as f64 / 1_000.0;
                let (window_damage, window_healing) =
                    agg.window_sums(now_ms, self.cfg.window_ms);
                let window_secs = self.cfg.window_ms.max(1) as f64 / 1_000.0;
                EntitySnapshot {
                    id: *entry.key(),
                    is_player: info.is_player,
                    name: info.name,
                    profession_id: info.profession_id,
                    level: info.level,
                    fight_point: info.fight_point,
                    cur_hp: info.cur_hp,
                    max_hp: info.max_hp,
                    total_damage_dealt: agg.total_damage_dealt,
                    total_damage_taken: agg.total_damage_taken,
                    total_healing: agg.total_healing,
                    active_combat_ms: agg.active_combat_ms,
                    dps: rate(agg.total_damage_dealt, active_secs),
                    hps: rate(agg.total_healing, active_secs),
                    instant_dps: window_damage as f64 / window_secs,
                    instant_hps: window_healing as f64 / window_secs,
                    skills: {
                        let mut skills: Vec<super::aggregate::SkillSnapshot> =
                            agg.skills.values().map(Into::into).collect();
                        skills.sort_by_key(|s| s.skill_id);
                        skills
                    },
                }
            })
            .collect();
        entities.sort_by(|a, b| b.total_damage_dealt.cmp(&a.total_damage_dealt));
        entities
    }

    // ------------------------------------------------------------------
    // Identity setters - both the snapshot and the dirty paths land here.
    // ------------------------------------------------------------------

    fn touch_entity(&self, entity: EntityRef) {
        self.info.entry(entity.id).or_default().is_player = entity.is_player;
    }

    pub fn set_name(&self, entity: EntityRef, name: String) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.name = Some(name);
    }

    pub fn set_profession(&self, entity: EntityRef, profession_id: u32) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.profession_id = Some(profession_id);
    }

    pub fn set_level(&self, entity: EntityRef, level: u32) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.level = Some(level);
    }

    pub fn set_fight_point(&self, entity: EntityRef, fight_point: u32) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.fight_point = Some(fight_point);
    }

    pub fn set_hp(&self, entity: EntityRef, cur_hp: u32) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.cur_hp = Some(cur_hp);
    }

    pub fn set_max_hp(&self, entity: EntityRef, max_hp: u32) {
        let mut info = self.info.entry(entity.id).or_default();
        info.is_player = entity.is_player;
        info.max_hp = Some(max_hp);
    }
}

fn rate(total: u64, secs: f64) -> f64 {
    if secs > 0.0 { total as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AggregationEngine {
        AggregationEngine::new(AnalyzerConfig::default())
    }

    fn event(at_ms: i64, attacker: i64, target: i64, magnitude: i64) -> CombatEvent {
        CombatEvent {
            skill_id: 42,
            attacker: EntityRef::player(attacker),
            target: EntityRef { id: target, is_player: false },
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

    fn find(entities: &[EntitySnapshot], id: i64) -> &EntitySnapshot {
        entities.iter().find(|e| e.id == id).unwrap()
    }

    #[test]
    fn end_to_end_aggregation_scenario() {
        let engine = engine();
        engine.ingest(&event(1_000, 1, 2, 100));
        let mut crit = event(2_000, 1, 2, 200);
        crit.is_critical = true;
        engine.ingest(&crit);

        let snap = engine.snapshot(2_000);
        let attacker = find(&snap.entities, 1);
        assert_eq!(attacker.total_damage_dealt, 300);
        assert_eq!(attacker.active_combat_ms, 1_000);
        let skill = &attacker.skills[0];
        assert_eq!(skill.crit_count, 1);
        assert_eq!(skill.use_count, 2);
        assert_eq!(skill.min_value, 100);
        assert_eq!(skill.max_value, 200);

        let target = find(&snap.entities, 2);
        assert_eq!(target.total_damage_taken, 300);
        assert!(!target.is_player);
    }

    #[test]
    fn long_gaps_do_not_count_as_combat_time() {
        let engine = engine();
        engine.ingest(&event(0, 1, 2, 100));
        engine.ingest(&event(5_000, 1, 2, 100));
        let snap = engine.session_snapshot(5_000);
        assert!(find(&snap, 1).active_combat_ms <= 1_000);
        assert_eq!(find(&snap, 1).active_combat_ms, 0);
    }

    #[test]
    fn heals_increment_healing_not_taken() {
        let engine = engine();
        let mut heal = event(0, 1, 3, 500);
        heal.is_heal = true;
        engine.ingest(&heal);
        let snap = engine.snapshot(0);
        assert_eq!(find(&snap.entities, 1).total_healing, 500);
        assert_eq!(find(&snap.entities, 3).total_damage_taken, 0);
    }

    #[test]
    fn section_timeout_clears_live_but_not_session() {
        let engine = engine();
        engine.ingest(&event(1_000, 1, 2, 100));
        // Next event arrives long after the section timeout.
        let frozen = engine.ingest(&event(20_000, 1, 2, 50)).unwrap();
        assert_eq!(frozen.index, 0);
        assert_eq!(find(&frozen.entities, 1).total_damage_dealt, 100);

        let live = engine.snapshot(20_000);
        assert_eq!(find(&live.entities, 1).total_damage_dealt, 50);
        let session = engine.session_snapshot(20_000);
        assert_eq!(find(&session, 1).total_damage_dealt, 150);
    }

    #[test]
    fn explicit_boundary_freezes_and_resets() {
        let engine = engine();
        engine.ingest(&event(0, 1, 2, 100));
        let frozen = engine.declare_section_boundary().unwrap();
        assert_eq!(frozen.entities.len(), 2);
        assert!(engine.snapshot(0).entities.is_empty());
        assert!(engine.declare_section_boundary().is_none());
    }

    #[test]
    fn identity_survives_section_reset() {
        let engine = engine();
        engine.set_name(EntityRef::player(1), "Frodo".into());
        engine.ingest(&event(0, 1, 2, 100));
        engine.declare_section_boundary();
        engine.ingest(&event(10_000, 1, 2, 10));
        let snap = engine.snapshot(10_000);
        assert_eq!(find(&snap.entities, 1).name.as_deref(), Some("Frodo"));
    }

    #[test]
    fn sliding_window_rate_uses_wall_clock_window() {
        let engine = engine();
        engine.ingest(&event(0, 1, 2, 300));
        engine.ingest(&event(500, 1, 2, 200));
        let rates = engine.sliding_window_rate(1, 1_000, 500);
        assert!((rates.dps - 500.0).abs() < f64::EPSILON);
        assert_eq!(rates.hps, 0.0);
        // Unknown entity reads as zero, not as an error.
        assert_eq!(engine.sliding_window_rate(99, 1_000, 500).dps, 0.0);
    }

    #[test]
    fn kill_flag_zeroes_target_hp() {
        let engine = engine();
        engine.set_hp(EntityRef { id: 2, is_player: false }, 4_000);
        let mut ev = event(0, 1, 2, 100);
        ev.is_kill = true;
        engine.ingest(&ev);
        let snap = engine.snapshot(0);
        assert_eq!(find(&snap.entities, 2).cur_hp, Some(0));
    }

    #[test]
    fn snapshot_serializes_for_external_consumers() {
        let engine = engine();
        engine.ingest(&event(0, 1, 2, 100));
        let json = serde_json::to_string(&engine.snapshot(0)).unwrap();
        assert!(json.contains("\"total_damage_dealt\":100"));
        assert!(json.contains("\"section_active\":true"));
    }

    #[test]
    fn reset_clears_everything() {
        let engine = engine();
        engine.set_name(EntityRef::player(1), "X".into());
        engine.ingest(&event(0, 1, 2, 100));
        engine.reset();
        assert!(engine.snapshot(0).entities.is_empty());
        assert!(engine.session_snapshot(0).is_empty());
        assert!(!engine.snapshot(0).section_active);
    }
}
