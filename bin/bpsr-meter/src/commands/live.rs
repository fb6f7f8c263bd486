use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{RecvTimeoutError, bounded};
use tracing::{error, info, warn};

use bpsr_packet::replay::RecordWriter;
use bpsr_packet::{Analyzer, AnalyzerConfig};

use crate::args::ArgsLive;
use crate::output::{OutputWriter, format_meter, format_stats};

/// Captured frame plus its capture timestamp, handed from the capture
/// thread to the processing loop.
type RawFrame = (i64, Vec<u8>);

pub fn run(args: ArgsLive) -> Result<()> {
    let device = match &args.device {
        Some(name) => pcap::Device::from(name.as_str()),
        None => pcap::Device::lookup()
            .context("Failed to look up a capture device")?
            .ok_or_else(|| anyhow!("No usable capture device found"))?,
    };
    info!("Capturing on device: {}", device.name);

    let mut capture = pcap::Capture::from_device(device)
        .context("Failed to open capture device")?
        .promisc(true)
        .immediate_mode(true)
        .timeout(1_000)
        .open()
        .context("Failed to activate capture (are you running with enough privileges?)")?;
    if !args.filter.is_empty() {
        capture
            .filter(&args.filter, true)
            .with_context(|| format!("Failed to set capture filter: {}", args.filter))?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("Failed to install shutdown handler")?;
    }

    // Producer: capture thread pushes raw frames; the processing loop on
    // this thread owns the analyzer.
    let (sender, receiver) = bounded::<RawFrame>(4_096);
    let capture_stop = stop.clone();
    let capture_thread = thread::spawn(move || {
        loop {
            if capture_stop.load(Ordering::SeqCst) {
                break;
            }
            match capture.next_packet() {
                Ok(packet) => {
                    let at_ms = packet.header.ts.tv_sec as i64 * 1_000
                        + packet.header.ts.tv_usec as i64 / 1_000;
                    if sender.send((at_ms, packet.data.to_vec())).is_err() {
                        break;
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    error!(error = %e, "capture stopped");
                    break;
                }
            }
        }
    });

    let analyzer = Analyzer::new(AnalyzerConfig::default());
    let mut recorder = match &args.record_path {
        Some(path) => {
            info!("Recording captured frames to {}", path);
            Some(RecordWriter::create(path)?)
        }
        None => None,
    };

    let interval = Duration::from_secs(args.interval_secs.max(1));
    let mut last_print = Instant::now();
    let mut last_at_ms = 0i64;

    while !stop.load(Ordering::SeqCst) {
        match receiver.recv_timeout(Duration::from_millis(200)) {
            Ok((at_ms, frame)) => {
                if let Some(recorder) = &mut recorder {
                    if let Err(e) = recorder.write_record(at_ms, &frame) {
                        warn!(error = %e, "record write failed, disabling recording");
                    }
                }
                analyzer.ingest_frame(&frame, at_ms);
                last_at_ms = last_at_ms.max(at_ms);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_print.elapsed() >= interval {
            let snapshot = analyzer.engine().snapshot(last_at_ms);
            let mut writer = OutputWriter::new(None)?;
            format_meter(&mut writer, &snapshot, args.json)?;
            writer.flush()?;
            last_print = Instant::now();
        }
    }

    info!("Shutting down");
    drop(receiver);
    capture_thread.join().ok();
    if let Some(recorder) = &mut recorder {
        recorder.flush()?;
    }

    let mut writer = OutputWriter::new(None)?;
    writer.writeln("")?;
    writer.writeln("=== Final session ===")?;
    crate::output::format_entities(&mut writer, &analyzer.engine().session_snapshot(last_at_ms))?;
    writer.writeln("")?;
    format_stats(&mut writer, &analyzer.stats())?;
    writer.flush()?;
    Ok(())
}
