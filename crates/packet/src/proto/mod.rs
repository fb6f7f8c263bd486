//! Protocol decoding: frame delimiting, envelope dispatch, attribute and
//! combat payloads.

pub mod attrs;
pub mod combat;
pub mod decoder;
pub mod frame;
pub mod messages;

/// Service id of the combat/AOI service; notifications for any other
/// service are skipped.
pub const COMBAT_SERVICE_ID: u64 = 0x0000_0000_6333_5342;

/// Top-level message kinds we recognize. Anything else is ignored, not an
/// error - the protocol grows kinds over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Notify = 2,
    Return = 3,
    FrameDown = 6,
}

impl MessageKind {
    pub fn from_u16(kind: u16) -> Option<Self> {
        match kind {
            2 => Some(Self::Notify),
            3 => Some(Self::Return),
            6 => Some(Self::FrameDown),
            _ => None,
        }
    }
}

/// Method ids dispatched off the combat service's notify envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMethod {
    SyncNearEntities = 0x0000_0006,
    SyncContainerData = 0x0000_0015,
    SyncContainerDirtyData = 0x0000_0016,
    SyncNearDeltaInfo = 0x0000_002D,
    SyncToMeDeltaInfo = 0x0000_002E,
}

impl NotifyMethod {
    pub fn from_u32(method: u32) -> Option<Self> {
        match method {
            0x06 => Some(Self::SyncNearEntities),
            0x15 => Some(Self::SyncContainerData),
            0x16 => Some(Self::SyncContainerDirtyData),
            0x2D => Some(Self::SyncNearDeltaInfo),
            0x2E => Some(Self::SyncToMeDeltaInfo),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("frame length {0} outside sane bounds")]
    FrameLengthOutOfBounds(u32),

    #[error("no zstd frame magic in compressed payload")]
    MissingZstdMagic,

    #[error("decompressed payload exceeds {limit} bytes")]
    DecompressTooLarge { limit: usize },

    #[error("zstd decode failed: {0}")]
    Zstd(#[from] std::io::Error),

    #[error("notify envelope truncated: {0} bytes")]
    EnvelopeTooShort(usize),

    #[error("failed to decode protobuf message")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("nested frames exceed depth limit {0}")]
    NestingTooDeep(usize),
}

/// Running counters over everything the decode path has seen. The
/// "unknown"/"mismatch" counters exist so protocol drift is visible
/// without turning tolerated conditions into errors.
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub frames_decoded: u64,
    pub notify_messages: u64,
    pub frame_down_messages: u64,
    pub combat_events: u64,
    pub unknown_message_kinds: u64,
    pub unknown_methods: u64,
    pub unknown_attributes: u64,
    pub foreign_service_notifies: u64,
    pub dirty_marker_mismatches: u64,
    pub decompress_failures: u64,
    pub oversized_frames: u64,
    pub protobuf_errors: u64,
    pub resyncs: u64,
    pub reconnects: u64,
}

impl DecodeStats {
    pub fn merge(&mut self, other: &DecodeStats) {
        self.frames_decoded += other.frames_decoded;
        self.notify_messages += other.notify_messages;
        self.frame_down_messages += other.frame_down_messages;
        self.combat_events += other.combat_events;
        self.unknown_message_kinds += other.unknown_message_kinds;
        self.unknown_methods += other.unknown_methods;
        self.unknown_attributes += other.unknown_attributes;
        self.foreign_service_notifies += other.foreign_service_notifies;
        self.dirty_marker_mismatches += other.dirty_marker_mismatches;
        self.decompress_failures += other.decompress_failures;
        self.oversized_frames += other.oversized_frames;
        self.protobuf_errors += other.protobuf_errors;
        self.resyncs += other.resyncs;
        self.reconnects += other.reconnects;
    }
}
