use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use tandem_session::{
    MediaKind, MediaTrack, RtcConnector, SessionConfig, SessionController, SessionEvent, StaticMedia, WsConnector,
};
use tandem_transfer::{DirectorySink, OutgoingFile, ProgressBoard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_peer=info,tandem_session=info,tandem_transfer=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(room_id), Some(display_name)) = (args.next(), args.next()) else {
        eprintln!("usage: tandem-peer <room> <display-name> [file ...]");
        std::process::exit(2);
    };

    // Config
    let config = SessionConfig::from_env()?;
    let download_dir: PathBuf = std::env::var("TANDEM_DOWNLOAD_DIR")
        .unwrap_or_else(|_| "./downloads".into())
        .into();

    // Read everything up front so a bad path fails before joining
    let mut pending = Vec::new();
    for path in args {
        pending.push(OutgoingFile::from_path(&path).await?);
    }

    let media = media_from_env(&display_name)?;

    let mut controller = SessionController::new(
        config.clone(),
        Arc::new(RtcConnector::new(config.ice_servers.clone())),
        Arc::new(WsConnector),
        Arc::new(DirectorySink::new(&download_dir)),
    );
    if !media.is_empty() {
        info!("Offering {} local track(s)", media.len());
        controller = controller.with_media(Arc::new(StaticMedia(media)));
    }
    let mut events = controller.subscribe();

    spawn_progress_log("send", controller.outgoing_progress().clone());
    spawn_progress_log("recv", controller.incoming_progress().clone());

    info!("Joining {} as {} via {}", room_id, display_name, config.endpoint);
    controller.join(&room_id, &display_name).await?;
    info!("Saving received files to {}", download_dir.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving...");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::ChannelOpen { label }) => {
                    info!("Channel {} open", label);
                    if !pending.is_empty() && controller.is_channel_open().await {
                        send_all(&controller, std::mem::take(&mut pending)).await;
                    }
                }
                Ok(SessionEvent::PeerJoined { remote_id, role }) => info!("{} is here (we are {})", remote_id, role),
                Ok(SessionEvent::PeerLeft { remote_id }) => info!("{} left", remote_id),
                Ok(SessionEvent::FileReceived(delivery)) => {
                    info!("Received {} ({} bytes)", delivery.file_name, delivery.size);
                }
                Ok(SessionEvent::NegotiationWarning { message }) => warn!("{}", message),
                Ok(SessionEvent::RemoteTrack(track)) => info!("Remote {} track {}", track.kind, track.id),
                Ok(SessionEvent::SignalingClosed) => {
                    error!("Lost the signaling relay");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Event stream lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    controller.leave().await;
    Ok(())
}

/// `TANDEM_MEDIA=audio,video` announces one track per listed kind.
fn media_from_env(display_name: &str) -> anyhow::Result<Vec<MediaTrack>> {
    let Ok(list) = std::env::var("TANDEM_MEDIA") else {
        return Ok(Vec::new());
    };
    let mut tracks = Vec::new();
    for kind in list.split(',').filter(|k| !k.trim().is_empty()) {
        let kind: MediaKind = kind.parse()?;
        tracks.push(MediaTrack {
            kind,
            id: format!("{}-{}", display_name, kind),
            stream_id: display_name.to_string(),
        });
    }
    Ok(tracks)
}

async fn send_all(controller: &SessionController, files: Vec<OutgoingFile>) {
    match controller.send_files(files).await {
        Ok(handles) => {
            tokio::spawn(async move {
                for handle in handles {
                    match handle.await {
                        Ok(Ok(report)) => info!(
                            "Sent {} ({} bytes, {} chunks) in {:?}",
                            report.file_name, report.bytes_sent, report.chunks, report.duration
                        ),
                        Ok(Err(e)) => error!("Send failed: {}", e),
                        Err(e) => error!("Send task panicked: {}", e),
                    }
                }
            });
        }
        Err(e) => error!("Cannot send: {}", e),
    }
}

/// Log every visible change on `board`, prefixed with `direction`.
fn spawn_progress_log(direction: &'static str, board: ProgressBoard) {
    let mut rx = board.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            for (name, progress) in &snapshot {
                info!(
                    "[{}] {} {:.1}% ({}/{} bytes)",
                    direction, name, progress.percent, progress.bytes_done, progress.bytes_total
                );
            }
        }
    });
}
