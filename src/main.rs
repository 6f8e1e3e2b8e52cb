use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vidscribe::api::ApiServer;
use vidscribe::caption::image_mime_type;
use vidscribe::consumer::trace_sink;
use vidscribe::{
    await_completion, CaptionClient, Config, KeyframeMarkers, RelayClient, Session, TranscriptionClient,
};

fn cli() -> Command {
    Command::new("vidscribe")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Extract audio, keyframes and transcripts from videos with live ffmpeg progress")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the upload and progress-streaming server")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Listen port")
                        .value_parser(value_parser!(u16)),
                )
                .arg(
                    Arg::new("static-dir")
                        .long("static-dir")
                        .value_name("DIR")
                        .help("Directory for static files and uploads")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("process")
                .about("Upload a video to a running server and build a session document")
                .arg(
                    Arg::new("video")
                        .value_name("VIDEO")
                        .help("Video file to process")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("server")
                        .short('s')
                        .long("server")
                        .value_name("URL")
                        .help("Server base URL"),
                )
                .arg(
                    Arg::new("bitrate")
                        .short('b')
                        .long("bitrate")
                        .value_name("BITRATE")
                        .help("Audio bitrate"),
                )
                .arg(
                    Arg::new("gap")
                        .short('g')
                        .long("gap")
                        .value_name("SECONDS")
                        .help("Minimum gap between keyframes")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("caption")
                        .long("caption")
                        .help("Caption every keyframe")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("DIR")
                        .help("Directory for session exports")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "vidscribe=debug,tower_http=debug"
    } else {
        "vidscribe=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = Config::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("serve", sub)) => serve(config, sub).await,
        Some(("process", sub)) => process(config, sub).await,
        _ => Err(anyhow!("unknown command")),
    }
}

async fn serve(mut config: Config, matches: &ArgMatches) -> Result<()> {
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("static-dir") {
        config.storage.static_dir = dir.clone();
        config.sync_storage_root();
    }

    config.validate()?;
    info!("{}", config.summary());

    ApiServer::new(Arc::new(config)).start().await
}

/// Headless version of the browser flow: audio, transcript, keyframes, captions, export
async fn process(config: Config, matches: &ArgMatches) -> Result<()> {
    let video = matches
        .get_one::<PathBuf>("video")
        .cloned()
        .context("missing video argument")?;
    let server_url = matches
        .get_one::<String>("server")
        .cloned()
        .unwrap_or_else(|| config.client.server_url.clone());
    let out_dir = matches
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| config.client.output_dir.clone());

    let source_name = video
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context("video path has no file name")?;

    let client = RelayClient::new(&server_url)?;
    let mut session = Session::new(source_name.clone());

    // Extract audio
    info!("🎵 Extracting audio...");
    let mut audio_events = client
        .extract_audio(&video, matches.get_one::<String>("bitrate").map(String::as_str))
        .await?;
    let audio = await_completion(&mut audio_events, trace_sink).await?;

    if audio.is_success() {
        session.set_audio_output(&audio.output);

        let transcriber = TranscriptionClient::new(config.transcription.clone());
        if transcriber.is_configured() {
            info!("📝 Transcribing audio...");
            let bytes = client.fetch_output(&audio.output).await?;
            match transcriber.transcribe_bytes(bytes, "audio.opus").await {
                Ok(transcript) => session.set_transcript(transcript),
                Err(e) => warn!("Transcription failed: {}", e),
            }
        } else {
            info!("No transcription API key configured, skipping transcript");
        }
    } else {
        warn!("Audio extraction failed with code {}", audio.code);
    }

    // Extract keyframes
    info!("🖼️ Extracting keyframes...");
    let keyframe_events = client
        .extract_keyframes(&video, matches.get_one::<f64>("gap").copied())
        .await?;
    let mut markers = KeyframeMarkers::new(keyframe_events);
    while let Some(marker) = markers.next_marker().await? {
        info!("Keyframe {} at {:.2}s", marker.frame_index, marker.timestamp_seconds);
        session.push_keyframe(marker);
    }

    match markers.completion() {
        Some(done) if done.is_success() => session.set_keyframe_pattern(done.output.clone()),
        Some(done) => warn!("Keyframe extraction failed with code {}", done.code),
        None => {}
    }

    if matches.get_flag("caption") && session.keyframe_pattern.is_some() {
        caption_keyframes(&config, &client, &mut session).await;
    }

    let written = session.save(&out_dir).await?;
    for path in written {
        info!("📄 Wrote {}", path.display());
    }

    Ok(())
}

async fn caption_keyframes(config: &Config, client: &RelayClient, session: &mut Session) {
    let captioner = CaptionClient::new(config.captioning.clone());
    if !captioner.is_configured() {
        warn!("No captioning API key configured, skipping captions");
        return;
    }

    for index in 0..session.keyframes.len() {
        let image = session.keyframes[index].image.clone();
        let caption = match client.fetch_output(&image).await {
            Ok(bytes) => captioner.caption(&bytes, image_mime_type(&image)).await,
            Err(e) => Err(e),
        };
        match caption {
            Ok(text) => {
                if let Err(e) = session.set_caption(index, text) {
                    warn!("Could not store caption: {}", e);
                }
            }
            Err(e) => warn!("Captioning {} failed: {}", image, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_process_arguments() {
        let matches = cli()
            .try_get_matches_from(["vidscribe", "process", "talk.mp4", "--gap", "2.5", "--caption"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "process");
        assert_eq!(sub.get_one::<f64>("gap"), Some(&2.5));
        assert!(sub.get_flag("caption"));
    }
}
