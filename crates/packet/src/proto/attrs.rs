//! Entity attribute decoding - full snapshots and incremental updates.
//!
//! Both paths converge on the same `AggregationEngine` setters so the
//! resulting state does not depend on which path delivered a value.

use prost::encoding::decode_varint;
use tracing::debug;

use super::DecodeStats;
use super::messages::{Attr, VData};
use crate::stats::AggregationEngine;

// Known attribute ids. Unknown ids are skipped via their own length.
pub const ATTR_NAME: u32 = 0x01;
pub const ATTR_PROFESSION_ID: u32 = 0xDC;
pub const ATTR_LEVEL: u32 = 0x2710;
pub const ATTR_FIGHT_POINT: u32 = 0x272E;
pub const ATTR_CUR_HP: u32 = 0x2C2E;
pub const ATTR_MAX_HP: u32 = 0x2C38;

/// Low 16 bits of a raw entity id carrying this value mean "player".
const PLAYER_DISCRIMINANT: u64 = 0x280;

/// Every dirty-update block opens with this marker; anything else means
/// the layout drifted and the branch is abandoned.
pub const DIRTY_MARKER: u32 = 0xFFFF_FFFE;

// Dirty-update field hierarchy.
const DIRTY_FIELD_CHAR_BASE: u32 = 2;
const DIRTY_FIELD_FIGHT_ATTR: u32 = 16;
const DIRTY_FIELD_PROFESSION: u32 = 61;
const DIRTY_SUB_NAME: u32 = 5;
const DIRTY_SUB_FIGHT_POINT: u32 = 35;
const DIRTY_SUB_CUR_HP: u32 = 1;
const DIRTY_SUB_MAX_HP: u32 = 2;
const DIRTY_SUB_PROFESSION_ID: u32 = 1;

/// Decoded entity identity. The raw 64-bit id packs the true id and a
/// player/non-player discriminant; this is the one place that rule lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: i64,
    pub is_player: bool,
}

impl EntityRef {
    pub fn from_raw(raw: u64) -> Self {
        Self {
            id: (raw >> 16) as i64,
            is_player: (raw & 0xFFFF) == PLAYER_DISCRIMINANT,
        }
    }

    pub fn player(id: i64) -> Self {
        Self { id, is_player: true }
    }
}

/// Apply a list of attributes to the entity's identity state.
pub fn apply_attrs(
    entity: EntityRef,
    attrs: &[Attr],
    engine: &AggregationEngine,
    stats: &mut DecodeStats,
) {
    for attr in attrs {
        let (Some(id), Some(raw)) = (attr.id, attr.raw_data.as_deref()) else {
            continue;
        };
        match id {
            ATTR_NAME => {
                if let Ok(name) = std::str::from_utf8(raw) {
                    engine.set_name(entity, name.to_string());
                }
            }
            ATTR_PROFESSION_ID => {
                if let Some(v) = read_varint(raw) {
                    engine.set_profession(entity, v as u32);
                }
            }
            ATTR_LEVEL => {
                if let Some(v) = read_varint(raw) {
                    engine.set_level(entity, v as u32);
                }
            }
            ATTR_FIGHT_POINT => {
                if let Some(v) = read_varint(raw) {
                    engine.set_fight_point(entity, v as u32);
                }
            }
            ATTR_CUR_HP => {
                if let Some(v) = read_varint(raw) {
                    engine.set_hp(entity, v as u32);
                }
            }
            ATTR_MAX_HP => {
                if let Some(v) = read_varint(raw) {
                    engine.set_max_hp(entity, v as u32);
                }
            }
            other => {
                stats.unknown_attributes += 1;
                debug!(attr_id = other, entity = entity.id, "skipping unknown attribute");
            }
        }
    }
}

/// Apply a full container snapshot for the local player.
pub fn apply_container_snapshot(v_data: &VData, engine: &AggregationEngine) {
    let Some(char_id) = v_data.char_id else {
        return;
    };
    let entity = EntityRef::player(char_id as i64);

    if let Some(level) = v_data.role_level.as_ref().and_then(|r| r.level) {
        engine.set_level(entity, level);
    }
    if let Some(attr) = &v_data.attr {
        if let Some(cur) = attr.cur_hp {
            engine.set_hp(entity, cur);
        }
        if let Some(max) = attr.max_hp {
            engine.set_max_hp(entity, max);
        }
    }
    if let Some(base) = &v_data.char_base {
        if let Some(name) = &base.name {
            engine.set_name(entity, name.clone());
        }
        if let Some(fp) = base.fight_point {
            engine.set_fight_point(entity, fp);
        }
    }
    if let Some(prof) = v_data.profession_list.as_ref().and_then(|p| p.cur_profession_id) {
        engine.set_profession(entity, prof);
    }
}

/// Walk a dirty-update buffer for the local player.
///
/// The encoding is a self-describing hierarchy of blocks, each headed by
/// `marker, reserved, field_index, reserved`. A mismatched or truncated
/// marker abandons only that branch; whatever was applied before it stays
/// applied. Abandonments are counted, not raised.
pub fn apply_dirty_buffer(
    player: EntityRef,
    buf: &[u8],
    engine: &AggregationEngine,
    stats: &mut DecodeStats,
) {
    let mut cur = DirtyCursor::new(buf);
    let Some(field_index) = cur.block_header() else {
        stats.dirty_marker_mismatches += 1;
        debug!(entity = player.id, "dirty update abandoned at outer marker");
        return;
    };
    match field_index {
        DIRTY_FIELD_CHAR_BASE => {
            let Some(sub) = cur.block_header() else {
                stats.dirty_marker_mismatches += 1;
                debug!(field_index, "dirty update abandoned at inner marker");
                return;
            };
            match sub {
                DIRTY_SUB_NAME => {
                    if let Some(name) = cur.string() {
                        engine.set_name(player, name);
                    }
                }
                DIRTY_SUB_FIGHT_POINT => {
                    if let Some(fp) = cur.u32_le() {
                        engine.set_fight_point(player, fp);
                    }
                }
                other => debug!(field_index, sub_index = other, "unhandled dirty sub-field"),
            }
        }
        DIRTY_FIELD_FIGHT_ATTR => {
            let Some(sub) = cur.block_header() else {
                stats.dirty_marker_mismatches += 1;
                debug!(field_index, "dirty update abandoned at inner marker");
                return;
            };
            match sub {
                DIRTY_SUB_CUR_HP => {
                    if let Some(hp) = cur.u32_le() {
                        engine.set_hp(player, hp);
                    }
                }
                DIRTY_SUB_MAX_HP => {
                    if let Some(hp) = cur.u32_le() {
                        engine.set_max_hp(player, hp);
                    }
                }
                other => debug!(field_index, sub_index = other, "unhandled dirty sub-field"),
            }
        }
        DIRTY_FIELD_PROFESSION => {
            let Some(sub) = cur.block_header() else {
                stats.dirty_marker_mismatches += 1;
                debug!(field_index, "dirty update abandoned at inner marker");
                return;
            };
            if sub == DIRTY_SUB_PROFESSION_ID {
                if let Some(prof) = cur.u32_le() {
                    engine.set_profession(player, prof);
                }
            }
        }
        other => debug!(field_index = other, "unhandled dirty field"),
    }
}

fn read_varint(mut raw: &[u8]) -> Option<u64> {
    decode_varint(&mut raw).ok()
}

/// Bounds-checked little-endian reader over a dirty buffer. Running out of
/// bytes is an abandonment signal (None), never a panic.
struct DirtyCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DirtyCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// `marker, reserved, field_index, reserved`; None on mismatch or
    /// truncation.
    fn block_header(&mut self) -> Option<u32> {
        if self.u32_le()? != DIRTY_MARKER {
            return None;
        }
        self.skip(4)?;
        let field_index = self.u32_le()?;
        self.skip(4)?;
        Some(field_index)
    }

    fn u32_le(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// `u32 length + u32 pad + bytes`.
    fn string(&mut self) -> Option<String> {
        let len = self.u32_le()? as usize;
        self.skip(4)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return None;
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }
}
