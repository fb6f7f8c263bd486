//! Combat event extraction from delta-sync payloads.

use std::sync::atomic::{AtomicU64, Ordering};

use super::messages::{AoiSyncDelta, DAMAGE_TYPE_HEAL};
use crate::proto::attrs::EntityRef;

const FLAG_CRITICAL: u32 = 1 << 0;
const FLAG_CAUSE_LUCKY: u32 = 1 << 2;

/// One decoded damage or heal occurrence. Immutable once created.
///
/// `magnitude` is always the absolute amount; whether it healed or hurt is
/// carried by `is_heal`, never by sign.
#[derive(Debug, Clone)]
pub struct CombatEvent {
    pub skill_id: i64,
    pub attacker: EntityRef,
    pub target: EntityRef,
    pub magnitude: i64,
    pub is_heal: bool,
    pub is_critical: bool,
    pub is_lucky: bool,
    pub is_cause_lucky: bool,
    pub is_miss: bool,
    pub is_kill: bool,
    pub element_tag: i32,
    pub source_tag: i32,
    pub hp_lessen: i64,
    /// Capture timestamp, Unix milliseconds.
    pub at_ms: i64,
    /// Process-local, strictly increasing across all flows.
    pub sequence_id: u64,
}

#[derive(Debug, Default)]
pub struct CombatEventExtractor {
    next_sequence: AtomicU64,
}

impl CombatEventExtractor {
    /// Decode every damage record of one delta into events. Records with
    /// no skill, no attacker, or a resolved magnitude of zero are dropped.
    pub fn extract(&self, delta: &AoiSyncDelta, at_ms: i64, out: &mut Vec<CombatEvent>) {
        let Some(target_raw) = delta.uuid else {
            return;
        };
        let target = EntityRef::from_raw(target_raw);

        let Some(effects) = &delta.skill_effects else {
            return;
        };
        for record in &effects.damages {
            let skill_id = record.owner_id.unwrap_or(0) as i64;
            if skill_id == 0 {
                continue;
            }

            // Summons credit their controller.
            let attacker_raw = record
                .top_summoner_id
                .filter(|&id| id != 0)
                .or(record.attacker_uuid)
                .unwrap_or(0);
            if attacker_raw == 0 {
                continue;
            }

            let value = record.value.unwrap_or(0);
            let lucky_value = record.lucky_value.unwrap_or(0);
            let magnitude = if value > 0 { value } else { lucky_value };
            if magnitude == 0 {
                continue;
            }

            let type_flag = record.type_flag.unwrap_or(0);

            out.push(CombatEvent {
                skill_id,
                attacker: EntityRef::from_raw(attacker_raw),
                target,
                magnitude: magnitude as i64,
                is_heal: record.r#type == Some(DAMAGE_TYPE_HEAL),
                is_critical: type_flag & FLAG_CRITICAL != 0,
                is_lucky: lucky_value > 0,
                is_cause_lucky: type_flag & FLAG_CAUSE_LUCKY != 0,
                is_miss: record.is_miss.unwrap_or(false),
                is_kill: record.is_dead.unwrap_or(false),
                element_tag: record.property.unwrap_or(0) as i32,
                source_tag: record.damage_source.unwrap_or(0) as i32,
                hp_lessen: record.hp_lessen_value.unwrap_or(0) as i64,
                at_ms,
                sequence_id: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            });
        }
    }
}
