use std::{fs, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use visualive_core::{
    download_artifact, presets::JsonFileStorage, AppConfig, AudioSource, ExportPipeline,
    GpuBackend, HeadlessBackend, IntervalScheduler, Preset, PresetStore, QualityHint, RenderLoop,
    ShaderBinder, SpectralAnalyzer, SubscriptionTier,
};

fn main() -> visualive_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Presets { command } => run_presets(&config, command),
        Commands::Render(args) => run_render(config, args),
        Commands::Capabilities => run_capabilities(&config),
    }
}

fn open_store(config: &AppConfig) -> PresetStore {
    match config.presets.storage_path() {
        Some(path) => PresetStore::new(JsonFileStorage::new(path)),
        None => PresetStore::with_builtins(),
    }
}

fn run_presets(config: &AppConfig, command: PresetCommand) -> visualive_core::Result<()> {
    let mut store = open_store(config);
    match command {
        PresetCommand::List => {
            for preset in store.list() {
                println!("{:<20} {:<24} {}", preset.id, preset.name, preset.tags.join(", "));
            }
        }
        PresetCommand::Show { id } => {
            println!("{}", serde_json::to_string_pretty(store.get(&id)?)?);
        }
        PresetCommand::Import { file } => {
            let preset: Preset = serde_json::from_str(&fs::read_to_string(&file)?)?;
            tracing::info!(id = %preset.id, file = %file.display(), "importing preset");
            store.add(preset)?;
        }
        PresetCommand::Remove { id } => {
            let removed = store.remove(&id)?;
            tracing::info!(id = %removed.id, "removed preset");
        }
    }
    Ok(())
}

fn run_render(mut config: AppConfig, args: RenderArgs) -> visualive_core::Result<()> {
    if let Some(settings) = &args.settings {
        let hint = QualityHint::from_settings_str(&fs::read_to_string(settings)?)?;
        tracing::info!(fft_size = hint.fft_size, fps = hint.target_fps, "applying quality hint");
        config.apply_quality(hint);
    }
    if let Some(tier) = args.tier {
        config.export.tier = tier;
    }
    config.validate()?;

    let mut presets = open_store(&config);
    presets.select(&args.preset)?;

    let mut analyzer = SpectralAnalyzer::new(config.audio)?;
    if let Some(input) = &args.input {
        analyzer.attach(AudioSource::file(input.clone()))?;
    } else if args.microphone {
        analyzer.attach(AudioSource::microphone())?;
    }

    if args.headless {
        let backend = HeadlessBackend::new(config.render.width, config.render.height);
        drive(backend, analyzer, presets, &config, &args)
    } else {
        drive_gpu(analyzer, presets, &config, &args)
    }
}

#[cfg(feature = "gpu")]
fn drive_gpu(
    analyzer: SpectralAnalyzer,
    presets: PresetStore,
    config: &AppConfig,
    args: &RenderArgs,
) -> visualive_core::Result<()> {
    let backend =
        visualive_core::shader::WgpuBackend::new_offscreen(config.render.width, config.render.height)?;
    drive(backend, analyzer, presets, config, args)
}

#[cfg(not(feature = "gpu"))]
fn drive_gpu(
    analyzer: SpectralAnalyzer,
    presets: PresetStore,
    config: &AppConfig,
    args: &RenderArgs,
) -> visualive_core::Result<()> {
    tracing::warn!("built without gpu support, rendering headless");
    let backend = HeadlessBackend::new(config.render.width, config.render.height);
    drive(backend, analyzer, presets, config, args)
}

fn drive<B: GpuBackend>(
    backend: B,
    analyzer: SpectralAnalyzer,
    presets: PresetStore,
    config: &AppConfig,
    args: &RenderArgs,
) -> visualive_core::Result<()> {
    let scheduler = IntervalScheduler::new(config.render.target_fps);
    let mut render = RenderLoop::new(analyzer, presets, ShaderBinder::new(backend), scheduler);

    if args.export.is_some() {
        let mut export = ExportPipeline::with_defaults(
            config.export.tier,
            config.export.ffmpeg_path.as_deref(),
        );
        export.start(config.export_options(args.seconds))?;
        render.attach_export(export);
    }

    render.start();
    let frames = render.run_for(Duration::from_secs(u64::from(args.seconds)));
    render.stop();
    tracing::info!(
        frames,
        average_fps = render.stats().average_fps(),
        errors = render.recent_errors().count(),
        "render finished"
    );

    if let (Some(target), Some(mut export)) = (&args.export, render.detach_export()) {
        let artifact = export.stop()?;
        let target = target.clone().unwrap_or_else(|| config.export.output_dir());
        let written = download_artifact(&artifact, target)?;
        println!(
            "{} ({}, {} frames, {} bytes)",
            written.display(),
            artifact.mime_type(),
            artifact.frames,
            artifact.len()
        );
    }

    render.shutdown();
    Ok(())
}

fn run_capabilities(config: &AppConfig) -> visualive_core::Result<()> {
    let export = ExportPipeline::with_defaults(
        config.export.tier,
        config.export.ffmpeg_path.as_deref(),
    );
    let policy = config.export.tier.policy();
    println!(
        "tier: {} (export allowed: {}, max {}s)",
        config.export.tier, policy.export_allowed, policy.max_duration_seconds
    );
    match export.negotiated_capability() {
        Some(capability) => {
            println!("export capability: {capability} (.{})", capability.extension())
        }
        None => println!("export capability: none"),
    }
    let options = config.export_options(60);
    println!("estimated size of a 60s export: {} bytes", options.estimated_size());
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive shader renderer", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = "visualive.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect and edit the preset catalog.
    Presets {
        #[command(subcommand)]
        command: PresetCommand,
    },
    /// Render a preset against an audio source.
    Render(RenderArgs),
    /// Print the export capability this machine would use.
    Capabilities,
}

#[derive(Subcommand, Debug)]
enum PresetCommand {
    List,
    Show { id: String },
    /// Add a preset from a JSON file, replacing one with the same id.
    Import { file: PathBuf },
    Remove { id: String },
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[arg(short, long, default_value = "bass-gradient")]
    preset: String,
    /// WAV file to analyse.
    #[arg(short, long, conflicts_with = "microphone")]
    input: Option<PathBuf>,
    #[arg(long)]
    microphone: bool,
    #[arg(short, long, default_value_t = 10)]
    seconds: u32,
    /// Skip the GPU and only record draws.
    #[arg(long)]
    headless: bool,
    /// Record the run; the artifact goes to this file or directory, or to
    /// the configured output directory.
    #[arg(long, num_args = 0..=1)]
    export: Option<Option<PathBuf>>,
    #[arg(long)]
    tier: Option<SubscriptionTier>,
    /// Settings blob whose quality preset tunes analysis and frame rate.
    #[arg(long)]
    settings: Option<PathBuf>,
}
