//! vipertui - interactive key viewer
//!
//! Puts the terminal in raw mode and prints every decoded key event with
//! the bytes that produce it. Useful for checking what a terminal sends.
//!
//! # Quick Start
//!
//! ```text
//! vipertui                   # Show key events until q or Ctrl+C
//! vipertui --timeout 10      # Stop after ten seconds
//! vipertui --esc-timeout 80  # Wider ESC window for slow links
//! vipertui --chr 65          # Print rt_chr(65) as hex
//! ```

use std::env;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vipertui::config::{self, Config};
use vipertui::core::{SessionError, TerminalSession};
use vipertui::runtime::rt_chr;
use vipertui::ui::{Event, KeyCode, KeyEvent, KeyMapper, Modifiers};
use vipertui::VERSION;

/// Command line options
#[derive(Debug, Default)]
struct Args {
    /// ESC idle window override in milliseconds
    esc_timeout_ms: Option<u64>,
    /// Stop the viewer after this many seconds
    timeout_secs: Option<u64>,
    /// Print rt_chr(code) and exit
    chr: Option<i64>,
}

fn print_version() {
    eprintln!("vipertui {}", VERSION);
}

fn print_help() {
    eprintln!("vipertui {} - terminal key viewer", VERSION);
    eprintln!();
    eprintln!("Usage: vipertui [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --esc-timeout <MS>    ESC idle window in milliseconds (1-1000)");
    eprintln!("  --timeout <SECS>      Stop after SECS seconds");
    eprintln!("  --chr <CODE>          Print rt_chr(CODE) as hex and exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  q, Ctrl+C             Quit");
    eprintln!();
    eprintln!("Configuration: ~/.vipertui/config.toml");
    eprintln!("Log file:      ~/.vipertui/vipertui.log");
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let value = args
        .get(i)
        .ok_or_else(|| format!("Missing value for {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--esc-timeout" => {
                i += 1;
                parsed.esc_timeout_ms = Some(parse_value(&args, i, "--esc-timeout")?);
            }
            "--timeout" => {
                i += 1;
                parsed.timeout_secs = Some(parse_value(&args, i, "--timeout")?);
            }
            "--chr" => {
                i += 1;
                parsed.chr = Some(parse_value(&args, i, "--chr")?);
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to `~/.vipertui/vipertui.log`; the terminal is in raw mode.
fn init_logging(config: &Config) {
    let Some(dir) = config::data_dir() else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("vipertui.log"));

    if let Ok(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    matches!(
        (key.code, key.modifiers),
        (KeyCode::Char('q'), m) if m.is_empty()
    ) || (key.code == KeyCode::Char('c') && key.modifiers == Modifiers::CTRL)
}

/// One output line: the key, then the bytes a terminal sends for it.
fn render_key(key: &KeyEvent) -> Result<Vec<u8>> {
    let bytes = KeyMapper::map(key).unwrap_or_default();
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    let mut line = Vec::new();
    let color = if key.is_unknown() { Color::Red } else { Color::Cyan };
    queue!(
        line,
        SetForegroundColor(color),
        Print(format!("{:<24}", key.to_string())),
        ResetColor,
        Print(hex.join(" ")),
        Print("\r\n")
    )?;
    Ok(line)
}

fn run(config: &Config, timeout_secs: Option<u64>) -> Result<()> {
    let session = TerminalSession::open().context("Failed to acquire the terminal")?;
    let (cols, rows) = session.size().unwrap_or((80, 24));
    info!("Terminal size: {}x{}", cols, rows);

    let pump_config = config.input.pump_config();
    info!("ESC timeout: {:?}", pump_config.esc_timeout);
    let mut pump = session.event_pump(pump_config)?;

    if let Some(secs) = timeout_secs {
        let cancel = pump.cancel_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            cancel.cancel();
        });
    }

    session.write(format!("vipertui {} ({}x{}) - press q to quit\r\n", VERSION, cols, rows).as_bytes())?;
    session.flush()?;

    loop {
        match pump.poll(Some(config.input.poll_interval())) {
            Ok(Some(Event::Key(key))) => {
                session.write(&render_key(&key)?)?;
                session.flush()?;
                if is_quit(&key) {
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                if pump.is_cancelled() {
                    info!("Viewer cancelled");
                    break;
                }
            }
            Err(SessionError::Interrupted) => continue,
            Err(e) => {
                error!("Input error: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let mut config = Config::load();
    if let Some(ms) = args.esc_timeout_ms {
        config.input.esc_timeout_ms = ms;
    }
    init_logging(&config);
    info!("vipertui {} starting", VERSION);

    if let Some(code) = args.chr {
        let s = rt_chr(code);
        println!("{:02x}", s[0]);
        return Ok(());
    }

    run(&config, args.timeout_secs)?;
    info!("vipertui exiting");
    Ok(())
}
