//! CLI Module
//!
//! Command-line interface for rendering reversible playback offline.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Retrograde - direction-reversible audio playback
#[derive(Parser, Debug)]
#[command(name = "retrograde")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a track through a reversible source, applying rate automation
    #[command(name = "render")]
    Render(RenderArgs),

    /// Write a time-reversed copy of a track
    #[command(name = "reverse")]
    Reverse {
        /// Input WAV file
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Output bit depth (16, 24 or 32)
        #[arg(long, default_value_t = 24)]
        bit_depth: u16,
    },

    /// Print channel count, sample rate, duration and peak level
    #[command(name = "info")]
    Info {
        /// Input WAV file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Input WAV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Pre-reversed counterpart of the input (derived when omitted)
    #[arg(long)]
    pub reverse_input: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// JSON rate automation file
    #[arg(short, long)]
    pub automation: Option<PathBuf>,

    /// Initial playback rate; negative plays in reverse
    #[arg(short, long, default_value_t = 1.0, allow_hyphen_values = true)]
    pub rate: f32,

    /// Seconds to render (defaults to one pass through the track)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Render sample rate (defaults to the input's)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Output bit depth (16, 24 or 32)
    #[arg(long, default_value_t = 24)]
    pub bit_depth: u16,
}
