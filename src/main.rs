mod cli;

use castforge::{config, server};
use castforge_av::{FfprobeProber, Prober, SourceStatus, Toolchain};
use castforge_media::quality;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting castforge server");
    tracing::info!(
        library = %config.library.root.display(),
        scratch = %config.streaming.scratch_dir.display(),
        mode = ?config.streaming.playlist_mode,
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforge=trace,castforge_av=trace,castforge_media=debug,tower_http=debug".to_string()
        } else {
            "castforge=debug,castforge_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Ladder { width, height } => show_ladder(width, height),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("castforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = Toolchain::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let prober = FfprobeProber::new(tools.ffprobe, config.streaming.probe_timeout());

    let descriptor = match prober.probe(file).await {
        SourceStatus::Available(descriptor) => descriptor,
        SourceStatus::Unavailable(reason) => anyhow::bail!("Source unavailable: {}", reason),
    };
    let ladder = quality::ladder(descriptor.width, descriptor.height);

    if json {
        let out = serde_json::json!({
            "source": descriptor,
            "ladder": ladder,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", descriptor.container);
    println!(
        "Video: {} {}x{}",
        descriptor.video_codec, descriptor.width, descriptor.height
    );
    if let Some(ref audio) = descriptor.audio_codec {
        println!("Audio: {}", audio);
    }
    if let Some(duration) = descriptor.duration {
        let secs = duration.as_secs();
        let mins = secs / 60;
        let hours = mins / 60;
        println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
    }
    if let Some(bit_rate) = descriptor.bit_rate {
        println!("Bitrate: {} kb/s", bit_rate / 1000);
    }

    println!();
    print_ladder(&ladder);
    Ok(())
}

fn show_ladder(width: u32, height: u32) -> Result<()> {
    print_ladder(&quality::ladder(width, height));
    Ok(())
}

fn print_ladder(ladder: &[&quality::QualityProfile]) {
    println!("Renditions: {}", ladder.len());
    for profile in ladder {
        println!(
            "  {:<6} {:>4}x{:<4} {:>5} kb/s  {} {}",
            profile.name,
            profile.width,
            profile.height,
            profile.bandwidth() / 1000,
            profile.profile,
            profile.level
        );
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = Toolchain::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let mut all_ok = true;

    for info in tools.check() {
        let status = if info.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, info.name);

        if let Some(ref version) = info.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = info.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Adaptive and transcoded playback need ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Library: {}", config.library.root.display());
            println!("  Scratch: {}", config.streaming.scratch_dir.display());
            println!(
                "  Segments: {}s, window {}, {:?} playlists",
                config.streaming.segment_duration_secs,
                config.streaming.window_size,
                config.streaming.playlist_mode
            );
            println!("  Idle timeout: {}s", config.streaming.idle_timeout_secs);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
