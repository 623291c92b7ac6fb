//! tonearm binary entrypoint: assembles the playback core behind a small
//! stdin transport console.

mod audio;
mod audio_output;
mod controller;
mod error;
mod media_format;
mod playback_manager;
mod playlist;
mod protocol;
mod supplier;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::audio_output::AudioOutput;
use crate::controller::Controller;
use crate::playlist::item::PlaylistItemRef;
use crate::playlist::{Playlist, APPEND_INDEX_APPEND_LAST};
use crate::protocol::{PlayerEvent, PlaylistEvent};

/// Requests consumed by the controller thread, one at a time.
enum ControllerRequest {
    SetTo(Option<PlaylistItemRef>),
}

/// Display cadence of the headless video pump.
const VIDEO_PUMP_INTERVAL: Duration = Duration::from_millis(40);

fn print_usage() {
    eprintln!("usage: tonearm [--paused] [--loop] <files...>");
    eprintln!();
    eprintln!("transport commands on stdin:");
    eprintln!("  play pause stop toggle next prev mute quit");
    eprintln!("  seek <0..1>   volume <0..2>   uri");
}

fn main() {
    colog::init();

    let mut autoplay = true;
    let mut looping = false;
    let mut paths: Vec<PathBuf> = Vec::new();
    for argument in std::env::args().skip(1) {
        match argument.as_str() {
            "--paused" => autoplay = false,
            "--loop" => looping = true,
            "--help" | "-h" => {
                print_usage();
                return;
            }
            _ => paths.push(PathBuf::from(argument)),
        }
    }
    if paths.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    let playlist = Playlist::new();
    let controller = Controller::new();
    controller.set_autoplay(autoplay);
    controller.playback_manager().set_looping(looping);

    // Controller thread: requests are applied strictly in order.
    let (request_sender, request_receiver) = mpsc::channel::<ControllerRequest>();
    {
        let controller = controller.clone();
        thread::spawn(move || {
            for request in request_receiver {
                match request {
                    ControllerRequest::SetTo(item) => {
                        if let Err(err) = controller.set_to(item) {
                            warn!("loading item failed: {}", err);
                        }
                    }
                }
            }
        });
    }

    // Playlist observer: a current-item change loads the item.
    {
        let playlist = playlist.clone();
        let sender = request_sender.clone();
        let mut events = playlist.subscribe();
        thread::spawn(move || loop {
            match events.blocking_recv() {
                Ok(PlaylistEvent::CurrentItemChanged { index, play }) => {
                    if play {
                        let item = if index >= 0 {
                            playlist.item_at(index as usize)
                        } else {
                            None
                        };
                        let _ = sender.send(ControllerRequest::SetTo(item));
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        });
    }

    // Player observer: transport feedback, playlist advance, failure
    // handling.
    {
        let playlist = playlist.clone();
        let controller = controller.clone();
        let mut events = controller.subscribe();
        thread::spawn(move || loop {
            match events.blocking_recv() {
                Ok(PlayerEvent::FileFinished) => {
                    let (_, has_next) = playlist.skip_info();
                    if has_next {
                        playlist.set_current_item_index(playlist.current_item_index() + 1);
                    } else {
                        controller.stop();
                        info!("playlist finished");
                    }
                }
                Ok(PlayerEvent::FileChanged { item, error }) => match error {
                    None => {
                        if let Some(item) = item {
                            info!("now playing: {}", item.name());
                        }
                    }
                    Some(error) => {
                        // Advancing recovers from a single bad item; only a
                        // dead end is surfaced.
                        let (_, has_next) = playlist.skip_info();
                        if has_next {
                            playlist
                                .set_current_item_index(playlist.current_item_index() + 1);
                        } else {
                            let all_failed = playlist
                                .items()
                                .iter()
                                .all(|item| item.playback_failed());
                            if all_failed {
                                error!("no file in the playlist could be opened");
                            } else {
                                error!("opening failed: {}", error);
                            }
                        }
                        let _ = item;
                    }
                },
                Ok(PlayerEvent::PlaybackStateChanged(state)) => {
                    info!("playback: {:?}", state);
                }
                Ok(PlayerEvent::SubTitleChanged(Some(text))) => {
                    info!("subtitle: {}", text.trim_end());
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        });
    }

    // Headless video pump: pulls frames at display cadence so video-only
    // items keep their decoder moving.
    {
        let controller = controller.clone();
        thread::spawn(move || {
            let proxy = controller.video_supplier();
            let mut frames_pulled: u64 = 0;
            loop {
                thread::sleep(VIDEO_PUMP_INTERVAL);
                let Some(format) = proxy.format() else {
                    continue;
                };
                let mut buffer = vec![0u8; format.frame_size()];
                let frame = controller.playback_manager().current_frame();
                let mut was_cached = false;
                if proxy
                    .fill_buffer(frame, &mut buffer, &format, &mut was_cached)
                    .is_ok()
                {
                    frames_pulled += 1;
                    if frames_pulled % 250 == 0 {
                        controller.notify_video_stats_changed();
                    }
                }
            }
        });
    }

    let output = match AudioOutput::start(&controller) {
        Ok(output) => Some(output),
        Err(err) => {
            warn!("no audio output available: {}", err);
            None
        }
    };

    playlist.append_items(&paths, APPEND_INDEX_APPEND_LAST, true);
    if playlist.is_empty() {
        error!("nothing playable found");
        std::process::exit(1);
    }

    run_transport_console(&playlist, &controller);
    drop(output);
}

/// The scripting surface: one transport verb per stdin line.
fn run_transport_console(playlist: &Arc<Playlist>, controller: &Arc<Controller>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let mut words = line.split_whitespace();
        match words.next() {
            Some("play") => controller.play(),
            Some("pause") => controller.pause(),
            Some("stop") => controller.stop(),
            Some("toggle") => controller.toggle_playing(),
            Some("next") => {
                let (_, has_next) = playlist.skip_info();
                if has_next {
                    playlist.set_current_item_index(playlist.current_item_index() + 1);
                }
            }
            Some("prev") => {
                let (has_previous, _) = playlist.skip_info();
                if has_previous {
                    playlist.set_current_item_index(playlist.current_item_index() - 1);
                }
            }
            Some("seek") => match words.next().and_then(|value| value.parse::<f32>().ok()) {
                Some(position) if (0.0..=1.0).contains(&position) => {
                    controller.set_position(position);
                }
                _ => warn!("seek takes a position in [0, 1]"),
            },
            Some("volume") => match words.next().and_then(|value| value.parse::<f32>().ok()) {
                Some(volume) => controller.set_volume(volume),
                None => info!("volume: {:.2}", controller.volume()),
            },
            Some("mute") => controller.toggle_mute(),
            Some("uri") => {
                info!("uri: {}", controller.location().unwrap_or_default());
            }
            Some("quit") | Some("exit") => break,
            Some(other) => warn!("unknown command '{}'", other),
            None => {}
        }
    }
}
