//! Top-level protocol dispatch.
//!
//! Frames arrive from the reassembled stream; Notify envelopes fan out to
//! the attribute and combat decoders, FrameDown wraps further frames and
//! re-enters the decoder recursively. Unknown kinds and methods are
//! counted and skipped - the protocol evolves underneath us.

use std::sync::Arc;

use prost::Message;
use tracing::{debug, info, warn};

use super::attrs::{self, EntityRef};
use super::combat::CombatEventExtractor;
use super::frame;
use super::messages::{
    AoiSyncDelta, SyncContainerData, SyncContainerDirtyData, SyncNearDeltaInfo, SyncNearEntities,
    SyncToMeDeltaInfo,
};
use super::{COMBAT_SERVICE_ID, DecodeStats, MessageKind, NotifyMethod, ProtocolError};
use crate::stats::AggregationEngine;

/// The observed protocol nests at most twice; anything deeper is treated
/// as malformed input rather than recursed into.
pub const MAX_NESTING_DEPTH: usize = 4;

/// service id + stub id + method id.
const NOTIFY_ENVELOPE_LEN: usize = 16;

pub struct ProtocolDecoder {
    engine: Arc<AggregationEngine>,
    extractor: CombatEventExtractor,
    current_player: Option<EntityRef>,
}

impl ProtocolDecoder {
    pub fn new(engine: Arc<AggregationEngine>) -> Self {
        Self {
            engine,
            extractor: CombatEventExtractor::default(),
            current_player: None,
        }
    }

    pub fn current_player(&self) -> Option<EntityRef> {
        self.current_player
    }

    /// Decode one whole frame. Never propagates: whatever goes wrong is
    /// counted, logged, and the analyzer moves on to the next frame.
    pub fn handle_frame(&mut self, bytes: &[u8], at_ms: i64, stats: &mut DecodeStats) {
        if let Err(e) = self.decode(bytes, 0, at_ms, stats) {
            match &e {
                ProtocolError::DecompressTooLarge { .. } => stats.oversized_frames += 1,
                ProtocolError::MissingZstdMagic | ProtocolError::Zstd(_) => {
                    stats.decompress_failures += 1
                }
                ProtocolError::ProtobufDecode(_) => stats.protobuf_errors += 1,
                _ => {}
            }
            warn!(error = %e, len = bytes.len(), "dropping undecodable frame");
        }
    }

    fn decode(
        &mut self,
        bytes: &[u8],
        depth: usize,
        at_ms: i64,
        stats: &mut DecodeStats,
    ) -> Result<(), ProtocolError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let frame = frame::parse_frame(bytes)?;
        stats.frames_decoded += 1;

        match MessageKind::from_u16(frame.kind) {
            Some(MessageKind::Notify) => {
                stats.notify_messages += 1;
                let payload = frame::maybe_decompress(frame.compressed, &frame.payload)?;
                self.decode_notify(&payload, at_ms, stats)
            }
            Some(MessageKind::FrameDown) => {
                stats.frame_down_messages += 1;
                if frame.payload.len() < 4 {
                    return Err(ProtocolError::FrameTooShort(frame.payload.len()));
                }
                // Server sequence field, then nested frames.
                let mut inner = frame::maybe_decompress(frame.compressed, &frame.payload[4..])?;
                let nested = frame::split_frames(&mut inner);
                if !inner.is_empty() {
                    debug!(leftover = inner.len(), "trailing bytes after nested frames");
                }
                for bytes in nested {
                    self.decode(&bytes, depth + 1, at_ms, stats)?;
                }
                Ok(())
            }
            // Responses to client calls carry nothing we aggregate.
            Some(MessageKind::Return) => Ok(()),
            None => {
                stats.unknown_message_kinds += 1;
                debug!(
                    kind = frame.kind,
                    head = %hex::encode(&frame.payload[..frame.payload.len().min(8)]),
                    "ignoring unknown message kind"
                );
                Ok(())
            }
        }
    }

    fn decode_notify(
        &mut self,
        payload: &[u8],
        at_ms: i64,
        stats: &mut DecodeStats,
    ) -> Result<(), ProtocolError> {
        if payload.len() < NOTIFY_ENVELOPE_LEN {
            return Err(ProtocolError::EnvelopeTooShort(payload.len()));
        }
        let service_id = u64::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3], payload[4], payload[5], payload[6],
            payload[7],
        ]);
        // stub id at 8..12 is intentionally ignored.
        let method_id = u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]);

        if service_id != COMBAT_SERVICE_ID {
            stats.foreign_service_notifies += 1;
            return Ok(());
        }

        let body = &payload[NOTIFY_ENVELOPE_LEN..];
        match NotifyMethod::from_u32(method_id) {
            Some(NotifyMethod::SyncNearEntities) => {
                self.on_near_entities(SyncNearEntities::decode(body)?, stats)
            }
            Some(NotifyMethod::SyncContainerData) => {
                self.on_container_data(SyncContainerData::decode(body)?)
            }
            Some(NotifyMethod::SyncContainerDirtyData) => {
                self.on_container_dirty(SyncContainerDirtyData::decode(body)?, stats)
            }
            Some(NotifyMethod::SyncToMeDeltaInfo) => {
                self.on_to_me_delta(SyncToMeDeltaInfo::decode(body)?, at_ms, stats)
            }
            Some(NotifyMethod::SyncNearDeltaInfo) => {
                self.on_near_delta(SyncNearDeltaInfo::decode(body)?, at_ms, stats)
            }
            None => {
                stats.unknown_methods += 1;
                debug!(method_id, "ignoring unknown notify method");
            }
        }
        Ok(())
    }

    fn on_near_entities(&mut self, msg: SyncNearEntities, stats: &mut DecodeStats) {
        for entity in &msg.appear {
            let Some(raw) = entity.uuid else { continue };
            let entity_ref = EntityRef::from_raw(raw);
            if let Some(collection) = &entity.attrs {
                attrs::apply_attrs(entity_ref, &collection.attrs, &self.engine, stats);
            }
        }
    }

    fn on_container_data(&mut self, msg: SyncContainerData) {
        if let Some(v_data) = &msg.v_data {
            attrs::apply_container_snapshot(v_data, &self.engine);
        }
    }

    fn on_container_dirty(&mut self, msg: SyncContainerDirtyData, stats: &mut DecodeStats) {
        // Dirty updates are relative to the local player; without an
        // identity yet there is nothing to attach them to.
        let Some(player) = self.current_player else {
            return;
        };
        if let Some(buffer) = msg.v_data.and_then(|v| v.buffer) {
            attrs::apply_dirty_buffer(player, &buffer, &self.engine, stats);
        }
    }

    fn on_to_me_delta(&mut self, msg: SyncToMeDeltaInfo, at_ms: i64, stats: &mut DecodeStats) {
        let Some(delta) = msg.delta_info.and_then(|d| d.base_delta) else {
            return;
        };
        if let Some(raw) = delta.uuid {
            let me = EntityRef::from_raw(raw);
            if self.current_player != Some(me) {
                info!(uid = me.id, "local player identified");
                self.current_player = Some(me);
            }
        }
        self.apply_delta(&delta, at_ms, stats);
    }

    fn on_near_delta(&mut self, msg: SyncNearDeltaInfo, at_ms: i64, stats: &mut DecodeStats) {
        for delta in &msg.delta_infos {
            self.apply_delta(delta, at_ms, stats);
        }
    }

    fn apply_delta(&mut self, delta: &AoiSyncDelta, at_ms: i64, stats: &mut DecodeStats) {
        if let (Some(raw), Some(collection)) = (delta.uuid, &delta.attrs) {
            attrs::apply_attrs(EntityRef::from_raw(raw), &collection.attrs, &self.engine, stats);
        }

        let mut events = Vec::new();
        self.extractor.extract(delta, at_ms, &mut events);
        stats.combat_events += events.len() as u64;
        for event in &events {
            if let Some(frozen) = self.engine.ingest(event) {
                info!(index = frozen.index, "combat section finalized");
            }
        }
    }
}
