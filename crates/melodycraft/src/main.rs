//! melodycraft - prompt-to-score from the command line
//!
//! Subcommands:
//! - `melodycraft generate <prompt>` - request a sketch, save `.abc`/`.mid`,
//!   optionally play it and capture the audio as WAV
//! - `melodycraft reflow <file>` - rewrap an ABC file by measures
//! - `melodycraft config` - print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melodyconf::MelodyConfig;
use melodycraft::{
    AbcEngine, EngineLoader, GenerationClient, GenerationRequest, PlayOutcome, Studio,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "melodycraft")]
#[command(about = "Prompt-to-score music sketches")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./melodycraft.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sketch from a prompt
    Generate {
        prompt: String,

        /// Number of measures (2-64)
        #[arg(short, long, default_value = "16")]
        measures: u32,

        /// Seed for reproducible output
        #[arg(short, long)]
        seed: Option<i64>,

        /// Instrument (piano, strings, bass, guitar, flute, violin, cello)
        #[arg(short, long, default_value = "piano")]
        instrument: String,

        /// Directory for melodycraft.abc and melodycraft.mid
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Play the sketch after generating it
        #[arg(long)]
        play: bool,

        /// Write what was played to this WAV file (implies --play)
        #[arg(long)]
        wav: Option<PathBuf>,
    },

    /// Rewrap an ABC file so each line holds a fixed number of bars
    Reflow {
        file: PathBuf,

        /// Bars per line (defaults to the configured value)
        #[arg(short, long)]
        measures_per_line: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MelodyConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate {
            prompt,
            measures,
            seed,
            instrument,
            out,
            play,
            wav,
        } => {
            let mut request = GenerationRequest::new(prompt)
                .with_measures(measures)
                .with_instruments([instrument]);
            if let Some(seed) = seed {
                request = request.with_seed(seed);
            }
            generate(&config, request, out, play || wav.is_some(), wav).await?;
        }
        Commands::Reflow {
            file,
            measures_per_line,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let width = measures_per_line.unwrap_or(config.client.measures_per_line);
            println!("{}", melodycraft::reflow(&text, width));
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

async fn generate(
    config: &MelodyConfig,
    request: GenerationRequest,
    out: PathBuf,
    play: bool,
    wav: Option<PathBuf>,
) -> Result<()> {
    let client = GenerationClient::from_config(&config.client)?;
    let media = config.media.clone();
    let loader = Arc::new(EngineLoader::new(move || {
        let media = media.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || AbcEngine::load(&media))
                .await
                .map_err(|e| melodycraft::EngineError::SoundFont {
                    path: PathBuf::new(),
                    message: e.to_string(),
                })?
        })
    }));

    let mut studio = Studio::new(client, Arc::clone(&loader), config.client.measures_per_line);
    studio.load_engine().await;

    let response = studio.submit(request).await?;
    if !response.has_playable_content() {
        println!("The service returned no playable content.");
        return Ok(());
    }

    if let Some(summary) = studio.summary() {
        println!("Mood: {}", summary.mood);
        println!("Key: {}  Tempo: {} BPM  Meter: {}", summary.key, summary.tempo_bpm, summary.meter);
        for line in &summary.highlights {
            println!("  - {line}");
        }
    }
    if let Some(text) = studio.renderer().reflowed() {
        println!("\n{text}\n");
    }

    std::fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
    if let Some(export) = studio.export_text() {
        let path = export.save_to(&out)?;
        info!(path = %path.display(), "saved notation");
    }
    match studio.export_audio_file() {
        Ok(export) => {
            let path = export.save_to(&out)?;
            info!(path = %path.display(), "saved MIDI");
        }
        Err(e) => {
            tracing::warn!(error = %e, "MIDI export failed");
            eprintln!("{}", e.user_message());
        }
    }

    if play {
        match studio.play().await {
            Ok(PlayOutcome::Started) => {
                println!("Playing...");
                studio.wait_for_end().await;
            }
            Ok(_) => println!("Nothing to play."),
            Err(e) => eprintln!("{}", e.user_message()),
        }

        if let (Some(path), Some(engine)) = (wav, loader.status().and_then(|s| s.engine().cloned())) {
            if let Some(output) = engine.last_output() {
                output
                    .write_wav(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {} ({} frames)", path.display(), output.frames());
            }
        }
    }

    studio.teardown();
    Ok(())
}
