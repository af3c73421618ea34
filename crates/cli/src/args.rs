//! Command-line arguments.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use vert_core::InstanceMode;

#[derive(Debug, Parser)]
#[command(name = "vert", version, about = "Convert files locally or on a vertd instance")]
pub struct Args {
    /// Files to convert. Zip archives are converted member by member.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Target format (`png`, `.mp3`, ...). Defaults to each file's first alternative.
    #[arg(short, long)]
    pub to: Option<String>,

    /// Configuration file. `config.toml` is used when present.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory.
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Write every result into one archive.
    #[arg(long)]
    pub zip: bool,

    /// Instance selection for video conversions. Saved for later runs.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Print Prometheus metrics when done.
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Auto,
    Eu,
    Us,
    Custom,
}

impl From<ModeArg> for InstanceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => InstanceMode::Auto,
            ModeArg::Eu => InstanceMode::Eu,
            ModeArg::Us => InstanceMode::Us,
            ModeArg::Custom => InstanceMode::Custom,
        }
    }
}
