mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use speech_core::{Generation, GeneratorConfig, SpeechGenerator, TonePreset, Voice};

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "narrate")]
#[command(about = "Generate narrated audio clips through the Gemini speech API", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one clip from a text argument or a file.
    Generate {
        /// Narration text (10 to 200 words).
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// Read the narration text from a file instead.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Voice to narrate with.
        #[arg(long, default_value = "Puck")]
        voice: Voice,

        /// Tone preset: default, professional or casual.
        #[arg(long, default_value = "default")]
        tone_preset: TonePreset,

        /// Free-form tone instruction, overrides the preset.
        #[arg(long)]
        tone: Option<String>,
    },

    /// Generate one clip per non-empty line of a file, sequentially.
    Batch {
        /// File with one narration text per line.
        file: PathBuf,

        #[arg(long, default_value = "Puck")]
        voice: Voice,

        #[arg(long, default_value = "default")]
        tone_preset: TonePreset,

        #[arg(long)]
        tone: Option<String>,
    },

    /// List the available voices and their characteristics.
    Voices,

    /// List generated audio files in the output directory.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();
    let args = Args::parse();

    match args.command {
        Command::Voices => {
            for voice in Voice::ALL {
                println!("{:8} {}", voice.as_str(), voice.description());
            }
            return Ok(());
        }
        Command::List => {
            let config = AppConfig::from_env()?;
            let files = speech_core::wav::list_generated_files(&config.output_dir);
            if files.is_empty() {
                println!("No audio files found");
            } else {
                for file in files {
                    println!("{file}");
                }
            }
            return Ok(());
        }
        Command::Generate {
            text,
            file,
            voice,
            tone_preset,
            tone,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("provide --text or --file"),
            };
            let mut generator = build_generator()?;
            let tone = tone.unwrap_or_else(|| tone_preset.instruction().to_string());
            report(generator.generate(text.trim(), voice, Some(&tone)).await?);
        }
        Command::Batch {
            file,
            voice,
            tone_preset,
            tone,
        } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let texts: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            anyhow::ensure!(!texts.is_empty(), "{} contains no texts", file.display());

            let mut generator = build_generator()?;
            let tone = tone.unwrap_or_else(|| tone_preset.instruction().to_string());
            let results = generator.generate_batch(&texts, voice, Some(&tone)).await?;

            let mut generated = 0usize;
            for (i, result) in results.iter().enumerate() {
                match result {
                    Ok(generation) => {
                        if matches!(generation, Generation::Clip(_)) {
                            generated += 1;
                        }
                        report(generation.clone());
                    }
                    Err(e) => warn!(item = i + 1, "failed: {e}"),
                }
            }
            info!("Generated {generated}/{} audio files", texts.len());
        }
    }

    Ok(())
}

fn build_generator() -> anyhow::Result<SpeechGenerator> {
    let app = AppConfig::from_env()?;
    let mut config = GeneratorConfig::new(app.api_key, app.output_dir);
    config.limits = app.limits;
    config.quality_validation = app.quality_validation;
    Ok(SpeechGenerator::new(config))
}

fn report(generation: Generation) {
    match generation {
        Generation::Clip(clip) => {
            println!(
                "Audio generated successfully: {} ({:.2}s)",
                clip.file_name, clip.duration_seconds
            );
            println!("{}", clip.path.display());
        }
        Generation::NoAudio => println!("No audio data received"),
    }
}
