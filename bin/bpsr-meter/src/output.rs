//! Meter report formatting: a plain table for humans, JSON for tooling.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;

use bpsr_packet::proto::DecodeStats;
use bpsr_packet::stats::{EntitySnapshot, MeterSnapshot};

pub struct OutputWriter {
    writer: Box<dyn Write>,
}

impl OutputWriter {
    pub fn new(output_path: Option<&str>) -> Result<Self> {
        let writer: Box<dyn Write> = match output_path {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create output file: {}", path))?,
            ),
            None => Box::new(std::io::stdout()),
        };
        Ok(Self { writer })
    }

    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content).with_context(|| "Failed to write to output")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().with_context(|| "Failed to flush output")?;
        Ok(())
    }
}

pub fn format_meter(writer: &mut OutputWriter, snapshot: &MeterSnapshot, json: bool) -> Result<()> {
    if json {
        writer.writeln(&serde_json::to_string_pretty(snapshot)?)?;
        return Ok(());
    }
    let state = if snapshot.section_active {
        format!("in combat, {:.1}s", snapshot.section_elapsed_ms as f64 / 1_000.0)
    } else {
        "idle".to_string()
    };
    writer.writeln(&format!("=== Section ({}) ===", state))?;
    format_entities(writer, &snapshot.entities)
}

pub fn format_entities(writer: &mut OutputWriter, entities: &[EntitySnapshot]) -> Result<()> {
    if entities.is_empty() {
        writer.writeln("(no combat data)")?;
        return Ok(());
    }
    writer.writeln(&format!(
        "{:<20} {:>10} {:>12} {:>10} {:>12} {:>12} {:>8}",
        "NAME", "DPS", "DAMAGE", "HPS", "HEALING", "TAKEN", "ACTIVE"
    ))?;
    for entity in entities {
        let name = match &entity.name {
            Some(name) => name.clone(),
            None if entity.is_player => format!("player#{}", entity.id),
            None => format!("npc#{}", entity.id),
        };
        writer.writeln(&format!(
            "{:<20} {:>10.0} {:>12} {:>10.0} {:>12} {:>12} {:>7.1}s",
            name,
            entity.dps,
            entity.total_damage_dealt,
            entity.hps,
            entity.total_healing,
            entity.total_damage_taken,
            entity.active_combat_ms as f64 / 1_000.0,
        ))?;
    }
    Ok(())
}

pub fn format_stats(writer: &mut OutputWriter, stats: &DecodeStats) -> Result<()> {
    writer.writeln("=== Decode statistics ===")?;
    writer.writeln(&format!("Frames decoded: {}", stats.frames_decoded))?;
    writer.writeln(&format!(
        "Notify / FrameDown messages: {} / {}",
        stats.notify_messages, stats.frame_down_messages
    ))?;
    writer.writeln(&format!("Combat events: {}", stats.combat_events))?;
    if stats.resyncs > 0 || stats.reconnects > 0 {
        writer.writeln(&format!(
            "Stream recoveries: {} resyncs, {} reconnects",
            stats.resyncs, stats.reconnects
        ))?;
    }
    let drift = stats.unknown_message_kinds
        + stats.unknown_methods
        + stats.unknown_attributes
        + stats.dirty_marker_mismatches;
    if drift > 0 {
        writer.writeln(&format!(
            "Protocol drift: {} unknown kinds, {} unknown methods, {} unknown attrs, {} dirty-marker mismatches",
            stats.unknown_message_kinds,
            stats.unknown_methods,
            stats.unknown_attributes,
            stats.dirty_marker_mismatches
        ))?;
    }
    if stats.decompress_failures > 0 || stats.oversized_frames > 0 || stats.protobuf_errors > 0 {
        writer.writeln(&format!(
            "Dropped: {} decompress failures, {} oversized frames, {} protobuf errors",
            stats.decompress_failures, stats.oversized_frames, stats.protobuf_errors
        ))?;
    }
    Ok(())
}
