//! Line-oriented terminal control.

use wave_engine::time::format_duration;
use wave_proto::protocol::{Command, LifecycleEvent, PlayerSnapshot};

pub const SEEK_STEP_SECS: f64 = 10.0;

pub const HELP: &str = "\
commands:
  p          play / pause
  s          stop
  f / b      seek forward / back 10s
  g <secs>   seek to position
  r <rate>   playback rate
  o <url>    open a new source
  i          show state
  q          quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    Status,
    Help,
    Quit,
}

/// Parse one line typed by the user.  `Err` carries a message for the user.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match word {
        "p" | "toggle" => Input::Command(Command::Toggle),
        "s" | "stop" => Input::Command(Command::Stop),
        "f" => Input::Command(Command::SeekRelative {
            seconds: SEEK_STEP_SECS,
        }),
        "b" => Input::Command(Command::SeekRelative {
            seconds: -SEEK_STEP_SECS,
        }),
        "g" | "seek" => Input::Command(Command::Seek {
            seconds: parse_number(rest, "seconds")?,
        }),
        "r" | "rate" => Input::Command(Command::Rate {
            value: parse_number(rest, "rate")?,
        }),
        "o" | "open" => {
            if rest.is_empty() {
                return Err("usage: o <url>".to_string());
            }
            Input::Command(Command::Source {
                src: rest.to_string(),
            })
        }
        "i" | "info" => Input::Status,
        "h" | "?" | "help" => Input::Help,
        "q" | "quit" => Input::Quit,
        other => return Err(format!("unknown command '{}' (h for help)", other)),
    };
    Ok(Some(input))
}

fn parse_number(text: &str, what: &str) -> Result<f64, String> {
    text.parse::<f64>()
        .map_err(|_| format!("expected {}, got '{}'", what, text))
}

/// Unicode block rendering of a waveform, one glyph per bar.
pub fn render_waveform(waveform: &[f32]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    waveform
        .iter()
        .map(|v| {
            let idx = (v.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[idx]
        })
        .collect()
}

/// Waveform with the played portion marked, plus position and state.
pub fn render_status(snapshot: &PlayerSnapshot) -> String {
    let bars = render_waveform(&snapshot.waveform);
    let played = (snapshot.progress() * snapshot.waveform.len() as f64).floor() as usize;
    let split = bars
        .char_indices()
        .nth(played)
        .map(|(i, _)| i)
        .unwrap_or(bars.len());
    format!(
        "{}|{} {} / {} [{}] x{}",
        &bars[..split],
        &bars[split..],
        format_duration(snapshot.current_time),
        format_duration(snapshot.duration),
        snapshot.state,
        snapshot.playback_rate
    )
}

/// One-line description of an event; `None` for the high-rate ones.
pub fn describe(event: &LifecycleEvent) -> Option<String> {
    let text = match event {
        LifecycleEvent::TimeUpdate { .. } => return None,
        LifecycleEvent::Play => "play".to_string(),
        LifecycleEvent::Pause => "pause".to_string(),
        LifecycleEvent::Ended => "ended".to_string(),
        LifecycleEvent::DurationChange { duration } => {
            format!("duration {}", format_duration(*duration))
        }
        LifecycleEvent::Seeking { time } => format!("seeking {}", format_duration(*time)),
        LifecycleEvent::Seeked { time } => format!("seeked {}", format_duration(*time)),
        LifecycleEvent::RateChange { rate } => format!("rate x{}", rate),
        LifecycleEvent::Error { message } => format!("error: {}", message),
        LifecycleEvent::Loading => "loading".to_string(),
        LifecycleEvent::Loaded => "loaded".to_string(),
    };
    Some(text)
}
