use anyhow::{Context, Result};
use bpsr_packet::replay::{self, FileRecordReader, ReplayReport};
use bpsr_packet::{Analyzer, AnalyzerConfig};
use tracing::info;

use crate::args::ArgsReplay;
use crate::output::{OutputWriter, format_entities, format_meter, format_stats};

pub fn run(args: ArgsReplay) -> Result<()> {
    info!("Replaying capture file: {}", args.file_path);
    let analyzer = Analyzer::new(AnalyzerConfig::default());

    let report = if is_pcap(&args.file_path) {
        replay_pcap(&analyzer, &args.file_path, args.pace)?
    } else {
        let mut reader = FileRecordReader::open(&args.file_path)?;
        replay::feed(&analyzer, &mut reader, args.pace)?
    };
    let now_ms = report.last_at_ms.unwrap_or(0);
    info!("Processed {} captured frames", report.records);

    let mut writer = OutputWriter::new(args.output_path.as_deref())?;
    if args.session {
        let session = analyzer.engine().session_snapshot(now_ms);
        if args.json {
            writer.writeln(&serde_json::to_string_pretty(&session)?)?;
        } else {
            writer.writeln("=== Full session ===")?;
            format_entities(&mut writer, &session)?;
        }
    } else {
        let snapshot = analyzer.engine().snapshot(now_ms);
        format_meter(&mut writer, &snapshot, args.json)?;
    }
    if !args.json {
        writer.writeln("")?;
        format_stats(&mut writer, &analyzer.stats())?;
    }
    writer.flush()?;
    Ok(())
}

fn is_pcap(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".pcap") || lower.ends_with(".pcapng") || lower.ends_with(".cap")
}

/// Feed a .pcap file through the same ingestion path as live capture.
fn replay_pcap(analyzer: &Analyzer, path: &str, pace: bool) -> Result<ReplayReport> {
    let mut capture = pcap::Capture::from_file(path)
        .with_context(|| format!("Failed to open pcap file: {}", path))?;
    let mut report = ReplayReport::default();
    loop {
        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e).context("Failed to read pcap packet"),
        };
        let at_ms =
            packet.header.ts.tv_sec as i64 * 1_000 + packet.header.ts.tv_usec as i64 / 1_000;
        if pace {
            if let Some(last) = report.last_at_ms {
                let gap = at_ms.saturating_sub(last);
                if gap > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(gap as u64));
                }
            }
        }
        analyzer.ingest_frame(packet.data, at_ms);
        report.records += 1;
        report.last_at_ms = Some(at_ms);
    }
    Ok(report)
}
