//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::automation::RateAutomation;
use crate::cli::RenderArgs;
use crate::engine::{
    calculate_peak, export_audio, import_audio, linear_to_db, ExportFormat, OfflineContext,
    RenderConfig, RenderContext,
};
use crate::playback::{PlaybackOptions, ReversibleSourceNode};

/// Render the input through a reversible source and write the result.
pub fn render(args: &RenderArgs) -> Result<()> {
    info!("Rendering: {}", args.input.display());

    let track = import_audio(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let reverse = match &args.reverse_input {
        Some(path) => Some(
            import_audio(path).with_context(|| format!("failed to load {}", path.display()))?,
        ),
        None => None,
    };
    let automation = match &args.automation {
        Some(path) => RateAutomation::load(path)
            .with_context(|| format!("failed to load automation {}", path.display()))?,
        None => RateAutomation::default(),
    };

    let config = RenderConfig::new(
        args.sample_rate.unwrap_or(track.sample_rate()),
        track.num_channels(),
    );
    let context = OfflineContext::shared(config)?;

    let options = PlaybackOptions::default().with_playback_rate(args.rate);
    let mut node = ReversibleSourceNode::new(context.clone(), options)?;
    node.connect(context.destination(), 0)?;
    match &reverse {
        Some(reverse) => node.set_buffers(&track, reverse)?,
        None => node.set_buffer(&track)?,
    }

    let max_duration = node.max_duration().unwrap_or(track.duration_secs());
    let duration = match args.duration {
        Some(duration) => duration,
        None if !automation.is_empty() => max_duration,
        None if args.rate != 0.0 => max_duration / args.rate.abs() as f64,
        None => bail!("a zero playback rate needs an explicit --duration"),
    };

    node.start()?;
    let rendered = automation
        .render(&context, &mut node, duration)
        .context("render failed")?;

    export_audio(&rendered, &args.output, ExportFormat::new(args.bit_depth))
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("Rendered: {}", args.output.display());
    println!("Duration: {:.3}s", rendered.duration_secs());
    println!("Rate events: {}", automation.events().len());
    println!("Final direction: {}", node.direction());
    if let Some(switch) = node.last_switch() {
        println!(
            "Last switch: {} -> {} at position {:.3} (offset {:.3}s)",
            switch.from, switch.to, switch.position, switch.offset
        );
    }

    Ok(())
}

/// Write a time-reversed copy of the input.
pub fn reverse(input: &Path, output: &Path, bit_depth: u16) -> Result<()> {
    info!("Reversing: {}", input.display());

    let track =
        import_audio(input).with_context(|| format!("failed to load {}", input.display()))?;
    export_audio(&track.reversed(), output, ExportFormat::new(bit_depth))
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Reversed: {} -> {}", input.display(), output.display());

    Ok(())
}

/// Print a short description of the input.
pub fn info(input: &Path) -> Result<()> {
    let track =
        import_audio(input).with_context(|| format!("failed to load {}", input.display()))?;
    let peak = calculate_peak(&track);

    println!("File: {}", input.display());
    println!("{:-<60}", "");
    println!("Channels: {}", track.num_channels());
    println!("Sample rate: {} Hz", track.sample_rate());
    println!("Frames: {}", track.len());
    println!("Duration: {:.3}s", track.duration_secs());
    println!("Peak: {:.2} dBFS", linear_to_db(peak));

    Ok(())
}
