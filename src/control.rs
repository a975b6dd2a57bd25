//! Line-oriented command surface.
//!
//! Each stdin line is parsed into a `Command` and applied to the
//! coordinator. Output goes to stdout; logs stay on stderr.

use std::io::{self, Write};
use std::str::FromStr;

use thiserror::Error;

use crate::audio::{AudioBackend, DeviceInfo, PlaybackState};
use crate::config::parse_volume;
use crate::memo::{format_bytes, format_duration};
use crate::session::{Activity, Coordinator};

/// Volume change step for `volume up` / `volume down`.
const VOLUME_STEP: f32 = 0.1;

const HELP: &str = "\
Commands:
  record              start recording, or stop and save if recording
  stop                stop recording or playback
  play [id]           play a memo (newest if omitted), pause/resume if it is the current one
  pause               pause playback
  volume <0..1|up|down>
  list                list memos, newest first
  status              show recording/playback progress
  rename <id> <title> rename a memo
  tag <id> <tag>      add a tag to a memo
  delete <id>         delete a memo and its audio file
  export <id>         copy a memo to the export directory
  devices             list audio devices
  tone                add a 440 Hz test tone memo
  help                show this help
  quit                exit (an open recording is saved)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeChange {
    Set(f32),
    Up,
    Down,
}

/// A parsed user command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record,
    Stop,
    Play(Option<String>),
    Pause,
    Volume(VolumeChange),
    List,
    Status,
    Rename { id: String, title: String },
    Tag { id: String, tag: String },
    Delete(String),
    Export(String),
    Devices,
    Tone,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word.to_ascii_lowercase().as_str() {
            "record" | "rec" | "r" => Command::Record,
            "stop" | "s" => Command::Stop,
            "play" | "p" => Command::Play(Some(rest).filter(|id| !id.is_empty()).map(str::to_string)),
            "pause" => Command::Pause,
            "volume" | "vol" => Command::Volume(parse_volume_change(rest)?),
            "list" | "ls" | "l" => Command::List,
            "status" | "st" => Command::Status,
            "rename" => {
                let (id, title) = split_id(rest).ok_or(CommandError::Usage("rename <id> <title>"))?;
                Command::Rename { id, title }
            }
            "tag" => {
                let (id, tag) = split_id(rest).ok_or(CommandError::Usage("tag <id> <tag>"))?;
                Command::Tag { id, tag }
            }
            "delete" | "rm" => Command::Delete(single_id(rest).ok_or(CommandError::Usage("delete <id>"))?),
            "export" => Command::Export(single_id(rest).ok_or(CommandError::Usage("export <id>"))?),
            "devices" => Command::Devices,
            "tone" | "test" => Command::Tone,
            "help" | "h" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn parse_volume_change(arg: &str) -> Result<VolumeChange, CommandError> {
    match arg {
        "up" | "+" => Ok(VolumeChange::Up),
        "down" | "-" => Ok(VolumeChange::Down),
        value => parse_volume(value).map(VolumeChange::Set).map_err(|_| CommandError::Usage("volume <0..1|up|down>")),
    }
}

/// `<id> <rest...>` with both parts non-empty.
fn split_id(args: &str) -> Option<(String, String)> {
    let (id, rest) = args.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    (!rest.is_empty()).then(|| (id.to_string(), rest.to_string()))
}

fn single_id(args: &str) -> Option<String> {
    let mut words = args.split_whitespace();
    let id = words.next()?;
    words.next().is_none().then(|| id.to_string())
}

/// Whether the driver loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Apply a command to the coordinator, writing the result to `out`.
///
/// Coordinator errors are reported to `out` and do not end the loop; only an
/// I/O error on `out` is returned.
pub fn dispatch<B: AudioBackend>(coordinator: &mut Coordinator<B>, command: Command, out: &mut impl Write) -> io::Result<Flow> {
    match command {
        Command::Record => {
            if coordinator.is_recording() {
                stop_recording(coordinator, out)?;
            } else {
                match coordinator.start_capture() {
                    Ok(()) => writeln!(out, "Recording... type 'record' or 'stop' to finish")?,
                    Err(e) => writeln!(out, "Error: {}", e)?,
                }
            }
        }
        Command::Stop => {
            if coordinator.is_recording() {
                stop_recording(coordinator, out)?;
            } else if coordinator.stop_playback() {
                writeln!(out, "Playback stopped")?;
            } else {
                writeln!(out, "Nothing to stop")?;
            }
        }
        Command::Play(id) => play(coordinator, id, out)?,
        Command::Pause => {
            if coordinator.pause_playback() {
                writeln!(out, "Paused at {}", format_duration(coordinator.playback_position()))?;
            } else {
                writeln!(out, "Nothing is playing")?;
            }
        }
        Command::Volume(change) => {
            match change {
                VolumeChange::Set(volume) => coordinator.set_volume(volume),
                VolumeChange::Up => coordinator.adjust_volume(VOLUME_STEP),
                VolumeChange::Down => coordinator.adjust_volume(-VOLUME_STEP),
            }
            writeln!(out, "Volume: {:.0}%", coordinator.volume() * 100.0)?;
        }
        Command::List => list(coordinator, out)?,
        Command::Status => writeln!(out, "{}", status_line(coordinator))?,
        Command::Rename { id, title } => match coordinator.rename_memo(&id, &title) {
            Ok(true) => writeln!(out, "Renamed {} to '{}'", id, title)?,
            Ok(false) => writeln!(out, "Title must not be empty")?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Tag { id, tag } => match coordinator.add_tag(&id, &tag) {
            Ok(true) => writeln!(out, "Tagged {} with '{}'", id, tag)?,
            Ok(false) => writeln!(out, "{} already has tag '{}'", id, tag)?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Delete(id) => match coordinator.delete_memo(&id) {
            Ok(memo) => writeln!(out, "Deleted {}", memo.display_name)?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Export(id) => match coordinator.export_memo(&id) {
            Ok(path) => writeln!(out, "Exported to {}", path.display())?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Devices => match coordinator.list_devices() {
            Ok(devices) => write_devices(&devices, out)?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Tone => match coordinator.load_test_tone() {
            Ok(()) => writeln!(out, "Test tone added. Type 'play' to hear it")?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Help => writeln!(out, "{}", HELP)?,
        Command::Quit => return Ok(Flow::Quit),
    }

    Ok(Flow::Continue)
}

/// Print one line per device: id, name, channel counts and preferred rate.
pub fn write_devices(devices: &[DeviceInfo], out: &mut impl Write) -> io::Result<()> {
    if devices.is_empty() {
        return writeln!(out, "No audio devices found");
    }

    for device in devices {
        writeln!(
            out,
            "{:>3}  {}{}  in:{} out:{}  {} Hz",
            device.id,
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.max_input_channels,
            device.max_output_channels,
            device.preferred_sample_rate
        )?;
    }
    Ok(())
}

fn stop_recording<B: AudioBackend>(coordinator: &mut Coordinator<B>, out: &mut impl Write) -> io::Result<()> {
    match coordinator.stop_capture() {
        Some(memo) => writeln!(out, "Saved {} ({}) id={}", memo.display_name, memo.description(), memo.id),
        None => writeln!(out, "Not recording"),
    }
}

/// `play` toggles the current memo; `play <id>` switches to another one.
fn play<B: AudioBackend>(coordinator: &mut Coordinator<B>, id: Option<String>, out: &mut impl Write) -> io::Result<()> {
    let state = coordinator.playback_state();
    let is_current = match id.as_deref() {
        None => state != PlaybackState::Idle,
        Some(id) => coordinator.playing_id() == Some(id),
    };

    if is_current && state == PlaybackState::Playing {
        coordinator.pause_playback();
        return writeln!(out, "Paused at {}", format_duration(coordinator.playback_position()));
    }

    let target = match id.or_else(|| coordinator.playing_id().map(str::to_string)).or_else(|| coordinator.memos().first().map(|memo| memo.id.clone())) {
        Some(target) => target,
        None => return writeln!(out, "No memos yet. Type 'record' or 'tone'"),
    };

    match coordinator.start_playback(&target) {
        Ok(()) => writeln!(out, "Playing {}", target),
        Err(e) => writeln!(out, "Error: {}", e),
    }
}

fn list<B: AudioBackend>(coordinator: &Coordinator<B>, out: &mut impl Write) -> io::Result<()> {
    let memos = coordinator.memos();
    if memos.is_empty() {
        return writeln!(out, "No memos yet");
    }

    for memo in memos {
        let marker = if coordinator.playing_id() == Some(memo.id.as_str()) { '>' } else { ' ' };
        writeln!(out, "{} {:<15} {:<30} {}", marker, memo.id, memo.display_name, memo.description())?;
    }
    Ok(())
}

/// One-line summary of what is happening right now.
pub fn status_line<B: AudioBackend>(coordinator: &Coordinator<B>) -> String {
    let mut line = match coordinator.activity() {
        Activity::Recording => {
            let levels = coordinator.levels();
            let dot = if coordinator.pulse() < 10 { '●' } else { ' ' };
            format!(
                "{} REC {}  [{}] L {:.2} R {:.2} peak {:.2}  {}",
                dot,
                format_duration(coordinator.elapsed().as_secs_f64()),
                meter(levels.block_peak, 20),
                levels.left,
                levels.right,
                levels.session_peak,
                format_bytes(coordinator.bytes_recorded())
            )
        }
        activity @ (Activity::Playing | Activity::Paused) => {
            let symbol = if activity == Activity::Playing { "▶" } else { "⏸" };
            format!(
                "{} {} {} / {}  vol {:.0}%",
                symbol,
                coordinator.playing_id().unwrap_or("?"),
                format_duration(coordinator.playback_position()),
                format_duration(coordinator.playback_duration().unwrap_or(0.0)),
                coordinator.volume() * 100.0
            )
        }
        Activity::Idle => format!("Idle  {} memo(s)  vol {:.0}%", coordinator.memos().len(), coordinator.volume() * 100.0),
    };

    if let Some(notification) = coordinator.notification() {
        line.push_str(&format!("  | {}", notification.message));
    }
    line
}

/// Horizontal bar for a 0.0..=1.0 level.
fn meter(level: f32, width: usize) -> String {
    let filled = ((level.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("{}{}", "#".repeat(filled), " ".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::testing::FakeBackend;
    use crate::config::Settings;
    use crate::memo::MemoStore;

    fn coordinator(dir: &std::path::Path) -> Coordinator<FakeBackend> {
        let store = MemoStore::open(dir.join("memos")).unwrap();
        Coordinator::new(FakeBackend::new(), Settings { channel_count: 1, ..Settings::default() }, store, dir.join("exports"))
    }

    fn run(coordinator: &mut Coordinator<FakeBackend>, line: &str) -> String {
        let mut out = Vec::new();
        let command: Command = line.parse().unwrap();
        dispatch(coordinator, command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("record".parse(), Ok(Command::Record));
        assert_eq!("  STOP ".parse(), Ok(Command::Stop));
        assert_eq!("q".parse(), Ok(Command::Quit));
        assert_eq!("play".parse(), Ok(Command::Play(None)));
        assert_eq!("play 1700000000000".parse(), Ok(Command::Play(Some("1700000000000".to_string()))));
        assert_eq!("ls".parse(), Ok(Command::List));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!("rename 42 Weekly  standup".parse(), Ok(Command::Rename { id: "42".to_string(), title: "Weekly  standup".to_string() }));
        assert_eq!("tag 42 work".parse(), Ok(Command::Tag { id: "42".to_string(), tag: "work".to_string() }));
        assert_eq!("delete 42".parse(), Ok(Command::Delete("42".to_string())));
        assert_eq!("volume 0.25".parse(), Ok(Command::Volume(VolumeChange::Set(0.25))));
        assert_eq!("vol +".parse(), Ok(Command::Volume(VolumeChange::Up)));
        assert_eq!("volume down".parse(), Ok(Command::Volume(VolumeChange::Down)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("dance".parse::<Command>(), Err(CommandError::Unknown("dance".to_string())));
        assert!(matches!("rename 42".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("delete".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("export 1 2".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("volume 7".parse::<Command>(), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_record_toggle_saves_memo() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = coordinator(dir.path());

        assert!(run(&mut c, "record").starts_with("Recording"));
        assert!(status_line(&c).contains("REC"));
        c.tick();
        let output = run(&mut c, "record");

        assert!(output.starts_with("Saved memo_"));
        assert_eq!(c.memos().len(), 1);
        assert!(run(&mut c, "list").contains(&c.memos()[0].id));
    }

    #[test]
    fn test_play_toggles_pause() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = coordinator(dir.path());
        run(&mut c, "tone");

        assert!(run(&mut c, "play").starts_with("Playing test_file"));
        assert_eq!(c.playback_state(), PlaybackState::Playing);
        assert!(status_line(&c).starts_with("▶ test_file 00:00 / 00:05"));

        assert!(run(&mut c, "play").starts_with("Paused"));
        assert_eq!(c.playback_state(), PlaybackState::Paused);

        assert!(run(&mut c, "play test_file").starts_with("Playing"));
        assert_eq!(c.playback_state(), PlaybackState::Playing);

        assert_eq!(run(&mut c, "stop"), "Playback stopped\n");
        assert_eq!(run(&mut c, "stop"), "Nothing to stop\n");
    }

    #[test]
    fn test_errors_are_reported_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = coordinator(dir.path());

        assert_eq!(run(&mut c, "play"), "No memos yet. Type 'record' or 'tone'\n");
        assert!(run(&mut c, "delete nope").starts_with("Error: no memo with id 'nope'"));
        assert!(status_line(&c).contains("no memo with id"));
        assert_eq!(run(&mut c, "pause"), "Nothing is playing\n");
    }

    #[test]
    fn test_volume_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = coordinator(dir.path());

        assert_eq!(run(&mut c, "volume 0.5"), "Volume: 50%\n");
        assert_eq!(run(&mut c, "volume up"), "Volume: 60%\n");
        let mut out = Vec::new();
        assert_eq!(dispatch(&mut c, Command::Quit, &mut out).unwrap(), Flow::Quit);
    }

    #[test]
    fn test_devices_listing() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = coordinator(dir.path());
        let output = run(&mut c, "devices");
        assert!(output.contains("Fake Duplex"));
        assert!(output.contains("44100 Hz"));
    }

    #[test]
    fn test_meter() {
        assert_eq!(meter(0.0, 4), "    ");
        assert_eq!(meter(0.5, 4), "##  ");
        assert_eq!(meter(2.0, 4), "####");
    }
}
