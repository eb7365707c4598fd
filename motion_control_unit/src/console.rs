//! Line-oriented operator console.
//!
//! One command per line, whitespace separated:
//!
//! | Command                         | Reply                                   |
//! |---------------------------------|-----------------------------------------|
//! | `mode <0\|1>`                   | `OK: mode=AUTO\|MANUAL`                 |
//! | `set <axis> <mode> <q> <dq>`    | `OK: axis=.. mode=.. q=.. dq=..`        |
//! | `stop <axis>`                   | `OK: axis=.. stopped`                   |
//! | `get <axis>`                    | `STATE axis=.. sw=0x.. q_fb=.. ...`     |
//! | `scale <axis> <cpr> <ratio>`    | `OK: scale ...` / `FAIL: ...`           |
//! | `help`                          | usage                                   |
//! | `quit` / `exit`                 | ends the console                        |
//!
//! Malformed or unknown input produces a usage or error line and changes
//! nothing.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use motion_common::command::MotionCommand;
use motion_common::drive::RunMode;
use thiserror::Error;
use tracing::{debug, info};

use crate::channel::AxisChannel;

const USAGE: &str = "\
commands:
  mode <0|1>                      0 = AUTO, 1 = MANUAL
  set <axis> <mode> <q> <dq>      mode 0 disables, q [rad], dq [rad/s]
  stop <axis>                     same as set <axis> 0 0 0
  get <axis>                      print feedback snapshot
  scale <axis> <cpr> <ratio>      encoder counts/rev and gear ratio
  help
  quit | exit";

// ─── Parsing ────────────────────────────────────────────────────────

/// One parsed console command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Mode(RunMode),
    Set { axis: usize, mode: u8, q: f64, dq: f64 },
    Stop { axis: usize },
    Get { axis: usize },
    Scale { axis: usize, cpr: f64, ratio: f64 },
    Help,
    Quit,
}

/// Rejected input line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command: {0}")]
    Unknown(String),
}

fn arg<T: std::str::FromStr>(token: Option<&str>, usage: &'static str) -> Result<T, ParseError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or(ParseError::Usage(usage))
}

/// Like `arg`, but `nan` and `inf` are malformed too.
fn real(token: Option<&str>, usage: &'static str) -> Result<f64, ParseError> {
    let value: f64 = arg(token, usage)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError::Usage(usage))
    }
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };
    let cmd = match verb {
        "mode" => {
            const U: &str = "mode <0|1>";
            let raw: u8 = arg(tokens.next(), U)?;
            ConsoleCommand::Mode(RunMode::from_u8(raw).ok_or(ParseError::Usage(U))?)
        }
        "set" => {
            const U: &str = "set <axis> <mode> <q_rad> <dq_rad_s>";
            ConsoleCommand::Set {
                axis: arg(tokens.next(), U)?,
                mode: arg(tokens.next(), U)?,
                q: real(tokens.next(), U)?,
                dq: real(tokens.next(), U)?,
            }
        }
        "stop" => ConsoleCommand::Stop {
            axis: arg(tokens.next(), "stop <axis>")?,
        },
        "get" => ConsoleCommand::Get {
            axis: arg(tokens.next(), "get <axis>")?,
        },
        "scale" => {
            const U: &str = "scale <axis> <encoder_cpr> <gear_ratio>";
            ConsoleCommand::Scale {
                axis: arg(tokens.next(), U)?,
                cpr: real(tokens.next(), U)?,
                ratio: real(tokens.next(), U)?,
            }
        }
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

// ─── Execution ──────────────────────────────────────────────────────

/// Outcome of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Console bound to one channel.
pub struct Console {
    channel: Arc<AxisChannel>,
}

impl Console {
    pub fn new(channel: Arc<AxisChannel>) -> Self {
        Self { channel }
    }

    pub fn execute(&self, cmd: ConsoleCommand) -> Reply {
        let text = match cmd {
            ConsoleCommand::Mode(mode) => {
                self.channel.set_run_mode(mode);
                format!("OK: mode={}", mode.name())
            }
            ConsoleCommand::Set { axis, mode, q, dq } => {
                let command = MotionCommand {
                    mode,
                    q,
                    dq,
                    ..MotionCommand::default()
                };
                match self.channel.set_command(axis, command) {
                    Ok(()) => format!("OK: axis={axis} mode={mode} q={q:.6} dq={dq:.6}"),
                    Err(e) => format!("FAIL: {e}"),
                }
            }
            ConsoleCommand::Stop { axis } => {
                match self.channel.set_command(axis, MotionCommand::stop()) {
                    Ok(()) => format!("OK: axis={axis} stopped"),
                    Err(e) => format!("FAIL: {e}"),
                }
            }
            ConsoleCommand::Get { axis } => match self.channel.state(axis) {
                Ok(st) => format!(
                    "STATE axis={axis} sw=0x{:04X} q_fb={:.6} dq_fb={:.6} tau_fb={:.3} motorstate=0x{:08X}",
                    st.status_word, st.q_fb, st.dq_fb, st.tau_fb, st.motor_state
                ),
                Err(_) => format!("FAIL: get {axis}"),
            },
            ConsoleCommand::Scale { axis, cpr, ratio } => {
                match self.channel.set_scale(axis, cpr, ratio) {
                    Ok(_) => format!("OK: scale axis={axis} cpr={cpr:.0} ratio={ratio:.6}"),
                    Err(e) => format!("FAIL: scale rejected: {e}"),
                }
            }
            ConsoleCommand::Help => USAGE.to_string(),
            ConsoleCommand::Quit => return Reply::Quit,
        };
        Reply::Text(text)
    }

    pub fn handle_line(&self, line: &str) -> Option<Reply> {
        match parse_line(line) {
            Ok(Some(cmd)) => {
                debug!(?cmd, "console command");
                Some(self.execute(cmd))
            }
            Ok(None) => None,
            Err(e @ ParseError::Unknown(_)) => Some(Reply::Text(format!("{e}\n{USAGE}"))),
            Err(e) => Some(Reply::Text(e.to_string())),
        }
    }

    /// Ask for the initial run mode. `1` selects MANUAL, anything else AUTO.
    /// End of input keeps the current mode.
    pub fn prompt_run_mode<R: BufRead, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> io::Result<RunMode> {
        writeln!(writer, "select run mode: 0 = AUTO, 1 = MANUAL")?;
        write!(writer, "> ")?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(self.channel.run_mode());
        }
        let mode = if line.trim() == "1" {
            RunMode::Manual
        } else {
            RunMode::Auto
        };
        self.channel.set_run_mode(mode);
        writeln!(writer, "run mode: {}", mode.name())?;
        writer.flush()?;
        Ok(mode)
    }

    /// Serve lines until end of input, `quit`, or the run flag clears.
    pub fn run<R: BufRead, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        run_flag: &AtomicBool,
    ) -> io::Result<()> {
        writeln!(writer, "examples: scale 0 131072 9.0 | set 0 1 1.0 0.0 | stop 0")?;
        writer.flush()?;

        let mut line = String::new();
        while run_flag.load(Ordering::Acquire) {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            match self.handle_line(&line) {
                Some(Reply::Text(text)) => writeln!(writer, "{text}")?,
                Some(Reply::Quit) => break,
                None => {}
            }
            writer.flush()?;
        }
        info!("console closed");
        Ok(())
    }
}
