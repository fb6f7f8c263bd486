//! Wire messages carried by the combat service's notify envelopes.
//!
//! The schema is reverse-engineered, so the messages are declared with
//! prost derives instead of generated from .proto files; field tags are
//! protocol facts and must not change. Every field is optional on the
//! wire - zero is a real value, absence is absence.

use prost::Message;

/// Entities entering the observer's area of interest.
#[derive(Clone, PartialEq, Message)]
pub struct SyncNearEntities {
    #[prost(message, repeated, tag = "1")]
    pub appear: Vec<EntityAppear>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EntityAppear {
    #[prost(uint64, optional, tag = "1")]
    pub uuid: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub ent_type: Option<u32>,
    #[prost(message, optional, tag = "3")]
    pub attrs: Option<AttrCollection>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttrCollection {
    #[prost(message, repeated, tag = "1")]
    pub attrs: Vec<Attr>,
}

/// One attribute: a small integer id plus an opaque encoded value that is
/// decoded lazily per known id.
#[derive(Clone, PartialEq, Message)]
pub struct Attr {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(bytes, optional, tag = "2")]
    pub raw_data: Option<Vec<u8>>,
}

/// Full snapshot of the local player's container data.
#[derive(Clone, PartialEq, Message)]
pub struct SyncContainerData {
    #[prost(message, optional, tag = "1")]
    pub v_data: Option<VData>,
}

/// Incremental (dirty) update to the local player's container data; the
/// interesting part is the custom-encoded `buffer`.
#[derive(Clone, PartialEq, Message)]
pub struct SyncContainerDirtyData {
    #[prost(message, optional, tag = "1")]
    pub v_data: Option<VData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VData {
    #[prost(uint32, optional, tag = "1")]
    pub char_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub role_level: Option<RoleLevel>,
    #[prost(message, optional, tag = "3")]
    pub attr: Option<FightAttr>,
    #[prost(message, optional, tag = "4")]
    pub char_base: Option<CharBase>,
    #[prost(message, optional, tag = "5")]
    pub profession_list: Option<ProfessionList>,
    #[prost(bytes, optional, tag = "6")]
    pub buffer: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoleLevel {
    #[prost(uint32, optional, tag = "1")]
    pub level: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FightAttr {
    #[prost(uint32, optional, tag = "1")]
    pub cur_hp: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub max_hp: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CharBase {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(uint32, optional, tag = "2")]
    pub fight_point: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProfessionList {
    #[prost(uint32, optional, tag = "1")]
    pub cur_profession_id: Option<u32>,
}

/// Delta sync for nearby entities.
#[derive(Clone, PartialEq, Message)]
pub struct SyncNearDeltaInfo {
    #[prost(message, repeated, tag = "1")]
    pub delta_infos: Vec<AoiSyncDelta>,
}

/// Delta sync addressed to the observer; also how we learn our own uuid.
#[derive(Clone, PartialEq, Message)]
pub struct SyncToMeDeltaInfo {
    #[prost(message, optional, tag = "1")]
    pub delta_info: Option<AoiSyncToMeDelta>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AoiSyncToMeDelta {
    #[prost(message, optional, tag = "1")]
    pub base_delta: Option<AoiSyncDelta>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AoiSyncDelta {
    #[prost(uint64, optional, tag = "1")]
    pub uuid: Option<u64>,
    #[prost(message, optional, tag = "2")]
    pub attrs: Option<AttrCollection>,
    #[prost(message, optional, tag = "3")]
    pub skill_effects: Option<SkillEffects>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SkillEffects {
    #[prost(message, repeated, tag = "1")]
    pub damages: Vec<DamageRecord>,
}

/// One damage or heal record inside a delta.
#[derive(Clone, PartialEq, Message)]
pub struct DamageRecord {
    /// Skill id ("owner" of the effect).
    #[prost(uint64, optional, tag = "1")]
    pub owner_id: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub attacker_uuid: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub target_uuid: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub value: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub lucky_value: Option<u64>,
    /// Bitfield: bit 0 = critical, bit 2 = caused lucky.
    #[prost(uint32, optional, tag = "6")]
    pub type_flag: Option<u32>,
    #[prost(bool, optional, tag = "7")]
    pub is_miss: Option<bool>,
    #[prost(uint32, optional, tag = "8")]
    pub damage_source: Option<u32>,
    /// Element of the effect (physical, fire, ...).
    #[prost(uint32, optional, tag = "9")]
    pub property: Option<u32>,
    #[prost(uint64, optional, tag = "10")]
    pub hp_lessen_value: Option<u64>,
    #[prost(bool, optional, tag = "11")]
    pub is_dead: Option<bool>,
    #[prost(uint64, optional, tag = "12")]
    pub summoner_id: Option<u64>,
    /// Root of the summon chain; damage is attributed here when present.
    #[prost(uint64, optional, tag = "13")]
    pub top_summoner_id: Option<u64>,
    /// 0 = damage, 1 = heal.
    #[prost(uint32, optional, tag = "14")]
    pub r#type: Option<u32>,
}

/// Heal discriminant for `DamageRecord::type`.
pub const DAMAGE_TYPE_HEAL: u32 = 1;
