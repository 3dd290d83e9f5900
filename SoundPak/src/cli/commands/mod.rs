//! Subcommands of the `soundpak` binary

pub mod archive;
pub mod export;
pub mod import;

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::Subcommand;

use super::progress::{LOOKING_GLASS, print_step, wait_for};
use crate::config::ToolConfig;
use crate::formats::{Generation, detect_generation};
use crate::session::{ArchiveSession, OperationOutcome, UnsavedChanges};

#[derive(Subcommand)]
pub enum Commands {
    /// Show a summary of an archive
    Info {
        /// Archive directory, or the .idx/.dat of a generation 1 archive
        source: PathBuf,

        /// Archive generation (gen1, gen23, gen4); detected when omitted
        #[arg(short, long)]
        generation: Option<Generation>,
    },

    /// Print the file tree with originality markers
    Tree {
        source: PathBuf,

        #[arg(short, long)]
        generation: Option<Generation>,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,

        /// Only list files that differ from the baseline
        #[arg(short, long)]
        changed: bool,
    },

    /// Export audio files from an archive
    Export {
        source: PathBuf,

        /// Output directory
        destination: PathBuf,

        #[arg(short, long)]
        generation: Option<Generation>,

        /// Export specific file(s) by archive path (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        file: Vec<String>,

        /// Convert to PCM16 WAV at a standard rate (Vorbis is kept)
        #[arg(short, long)]
        playable: bool,

        /// Skip .lip side files
        #[arg(long)]
        no_lip: bool,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Replace archive files and save the result
    Import {
        source: PathBuf,

        /// Replacement files, or one directory mirroring the archive tree
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        generation: Option<Generation>,

        /// Directory the inputs' paths are relative to
        #[arg(long)]
        root: Option<PathBuf>,

        /// Where to save (defaults to overwriting the source)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Store the files' streams as-is instead of matching each entry's format
        #[arg(long)]
        direct: bool,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Make the archive's current content its originality baseline
    Baseline {
        source: PathBuf,

        #[arg(short, long)]
        generation: Option<Generation>,
    },
}

impl Commands {
    /// Execute the selected command.
    ///
    /// # Errors
    /// Returns an error if the underlying operation fails.
    pub fn execute(&self, config: ToolConfig) -> anyhow::Result<()> {
        match self {
            Commands::Info { source, generation } => archive::info(source, *generation, config),
            Commands::Tree {
                source,
                generation,
                json,
                changed,
            } => archive::tree(source, *generation, *json, *changed, config),
            Commands::Export {
                source,
                destination,
                generation,
                file,
                playable,
                no_lip,
                quiet,
            } => export::execute(
                source,
                destination,
                *generation,
                file,
                *playable,
                *no_lip,
                *quiet,
                config,
            ),
            Commands::Import {
                source,
                inputs,
                generation,
                root,
                output,
                direct,
                quiet,
            } => import::execute(
                source,
                inputs,
                *generation,
                root.as_deref(),
                output.as_deref(),
                *direct,
                *quiet,
                config,
            ),
            Commands::Baseline { source, generation } => {
                archive::baseline(source, *generation, config)
            }
        }
    }
}

/// The given generation, or the one detected at `source`
pub(crate) fn resolve_generation(
    source: &Path,
    generation: Option<Generation>,
) -> anyhow::Result<Generation> {
    generation.or_else(|| detect_generation(source)).ok_or_else(|| {
        anyhow!(
            "cannot tell the archive generation of {}; pass --generation",
            source.display()
        )
    })
}

/// Load `source` into a new session, printing load warnings
pub(crate) fn open(
    source: &Path,
    generation: Option<Generation>,
    config: ToolConfig,
    quiet: bool,
) -> anyhow::Result<ArchiveSession> {
    let generation = resolve_generation(source, generation)?;
    if !quiet {
        print_step(
            1,
            1,
            LOOKING_GLASS,
            &format!("Loading {} archive {}...", generation, source.display()),
        );
    }

    let mut session = ArchiveSession::new(config);
    session.begin_load(source, generation, UnsavedChanges::Cancel)?;
    if let OperationOutcome::Loaded { warnings, .. } = wait_for(&mut session, quiet)? {
        for warning in warnings {
            eprintln!("warning: {warning}");
        }
    }
    Ok(session)
}
