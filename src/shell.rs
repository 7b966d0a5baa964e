use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use clap::Args;
use termcolor::{self, Color, ColorSpec, StandardStream, WriteColor};

/// Inspiration/partial implementation taken from the Cargo source at
/// [cargo/core/shell.rs](https://github.com/rust-lang/cargo/blob/53094e32b11c57a917f3ec3a48f29f388583ca3b/src/cargo/core/shell.rs)

/// Maximum length of status string when being justified
const JUSTIFY_STATUS_LEN: usize = 12_usize;

/// The requested verbosity of the program output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verbosity {
    Verbose,
    Normal,
    Quiet,
}

/// All clap-compatible configuration parameters for the Shell, flattened
/// into the top-level [`crate::cli::Opts`].
#[derive(Args, Clone)]
pub struct Options {
    /// Whether to run in quiet mode (minimal output)
    #[clap(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Whether to run in verbose mode (maximum output, including per-scrape
    /// sub-collector timing)
    #[clap(short = 'v', long = "verbose", global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Color display mode for stdout/stderr output
    #[clap(short = 'c', long = "color", value_enum, default_value = "auto", global = true)]
    pub color_mode: ColorMode,
}

impl Verbosity {
    /// Determines the appropriate verbosity setting for the specified CLI
    /// options
    const fn from_opts(opts: &Options) -> Self {
        if opts.quiet {
            Self::Quiet
        } else if opts.verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }
}

/// Mode of the color output of the process, controllable via a CLI flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn into_termcolor(self, stream: atty::Stream) -> termcolor::ColorChoice {
        match self {
            Self::Always => termcolor::ColorChoice::Always,
            Self::Never => termcolor::ColorChoice::Never,
            Self::Auto => {
                if atty::is(stream) {
                    termcolor::ColorChoice::Auto
                } else {
                    termcolor::ColorChoice::Never
                }
            },
        }
    }
}

/// Thread-safe handle to formatted stderr/stdout output (implements `Sync`)
pub struct Shell {
    pub verbosity: Verbosity,
    out: Mutex<OutSink>,
    err: Mutex<OutSink>,
}

#[allow(dead_code)]
impl Shell {
    /// Creates a new instance of the Shell handle, initializing all fields from
    /// the CLI options as necessary. Should only be called once per process.
    #[must_use]
    pub fn new(opts: &Options) -> Self {
        Self {
            verbosity: Verbosity::from_opts(opts),
            out: Mutex::new(OutSink::Stream {
                color_mode: opts.color_mode,
                is_tty: atty::is(atty::Stream::Stdout),
                stream_type: atty::Stream::Stdout,
                stream: StandardStream::stdout(opts.color_mode.into_termcolor(atty::Stream::Stdout)),
            }),
            err: Mutex::new(OutSink::Stream {
                color_mode: opts.color_mode,
                is_tty: atty::is(atty::Stream::Stderr),
                stream_type: atty::Stream::Stderr,
                stream: StandardStream::stderr(opts.color_mode.into_termcolor(atty::Stream::Stderr)),
            }),
        }
    }

    /// Creates a shell from plain writable objects, with no color, and max
    /// verbosity. Used by tests.
    #[must_use]
    pub fn from_write(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(OutSink::Write(stdout)),
            err: Mutex::new(OutSink::Write(stderr)),
            verbosity: Verbosity::Verbose,
        }
    }

    /// Shortcut to right-align and color green a status message.
    pub fn status<T, U>(&self, status: T, message: U)
    where
        T: fmt::Display,
        U: fmt::Display,
    {
        self.print(&status, Some(&message), Color::Green, None, true);
    }

    pub fn status_header<T>(&self, status: T)
    where
        T: fmt::Display,
    {
        self.print(&status, None, Color::Cyan, None, true);
    }

    /// Prints a message, where the status will have `color` color, and can be
    /// justified. The message follows without color.
    fn print(
        &self,
        status: &dyn fmt::Display,
        message: Option<&dyn fmt::Display>,
        status_color: Color,
        text_color: Option<Color>,
        justified: bool,
    ) {
        if self.verbosity != Verbosity::Quiet {
            let mut out = self.out.lock().expect("shell stdout mutex poisoned");
            let _ = out.print(status, message, status_color, text_color, justified);
        }
    }

    /// Prints a red 'error' message.
    pub fn error<T: fmt::Display>(&self, message: T) {
        let mut err = self.err.lock().expect("shell stderr mutex poisoned");
        let _ = err.print(&"(error)", Some(&message), Color::Red, Some(Color::Red), true);
    }

    /// Prints an amber 'warning' message.
    pub fn warn<T: fmt::Display>(&self, message: T) {
        if self.verbosity != Verbosity::Quiet {
            self.print(&"(warning)", Some(&message), Color::Yellow, None, true);
        }
    }

    /// Prints a cyan 'info' message.
    pub fn info<T: fmt::Display>(&self, message: T) {
        self.print(&"(info)", Some(&message), Color::Cyan, None, true);
    }

    /// Prints a dim 'debug' message, visible only at verbose verbosity.
    /// Used for the per-sub-collector absent-data and parse-failure logs
    /// the error handling design calls for without escalating a scrape.
    pub fn debug<T: fmt::Display>(&self, message: T) {
        if self.verbosity == Verbosity::Verbose {
            self.print(&"(debug)", Some(&message), Color::Black, None, true);
        }
    }

    /// Gets the current color mode.
    ///
    /// If we are not using a color stream, this will always return `Never`,
    /// even if the color mode has been set to something else.
    pub fn color_mode(&self) -> ColorMode {
        let out = self.out.lock().expect("shell stdout mutex poisoned");
        match *out {
            OutSink::Stream { color_mode, .. } => color_mode,
            OutSink::Write(_) => ColorMode::Never,
        }
    }

    /// Whether the shell supports color.
    pub fn supports_color(&self) -> bool {
        let out = self.out.lock().expect("shell stdout mutex poisoned");
        match &*out {
            OutSink::Write(_) => false,
            OutSink::Stream { stream, .. } => stream.supports_color(),
        }
    }

    /// Executes the given callback with a reference to the shell object handle
    /// if the shell is in verbose mode
    pub fn verbose<F>(&self, callback: F)
    where
        F: FnOnce(&Self),
    {
        if let Verbosity::Verbose = self.verbosity {
            callback(self);
        }
    }
}

enum OutSink {
    Write(Box<dyn Write + Send>),
    Stream {
        color_mode: ColorMode,
        stream: StandardStream,
        stream_type: atty::Stream,
        is_tty: bool,
    },
}

impl OutSink {
    /// Prints out a message with a status. The status comes first, and is bold
    /// plus the given color. The status can be justified, in which case the
    /// max width that will right align is `JUSTIFY_STATUS_LEN` chars.
    fn print(
        &mut self,
        status: &dyn fmt::Display,
        message: Option<&dyn fmt::Display>,
        status_color: Color,
        text_color: Option<Color>,
        justified: bool,
    ) -> io::Result<()> {
        let width: Option<usize> = self.width();
        match *self {
            Self::Stream { ref mut stream, is_tty, .. } => {
                stream.reset()?;
                stream.set_color(ColorSpec::new().set_bold(true).set_fg(Some(status_color)))?;

                let offset = if justified && is_tty {
                    write!(stream, "{status:>JUSTIFY_STATUS_LEN$}")?;
                    JUSTIFY_STATUS_LEN
                } else {
                    let status_str = format!("{status}");
                    write!(stream, "{status_str}")?;
                    stream.set_color(ColorSpec::new().set_bold(true))?;
                    write!(stream, ":")?;
                    status_str.len() + 1
                };

                stream.reset()?;
                if let Some(color) = text_color {
                    stream.set_color(ColorSpec::new().set_fg(Some(color)))?;
                }

                match message {
                    None => write!(stream, " ")?,
                    Some(message) => {
                        let formatted: String = format!("{message}");
                        match width {
                            None => writeln!(stream, " {formatted}")?,
                            Some(width) => {
                                let lines = textwrap::wrap_iter(&formatted, width.saturating_sub(offset + 1));
                                let indent = " ".repeat(offset);
                                for (i, line) in lines.enumerate() {
                                    if i == 0 {
                                        writeln!(stream, " {line}")?;
                                    } else {
                                        writeln!(stream, "{indent} {line}")?;
                                    }
                                }
                            },
                        }
                    },
                }

                stream.reset()?;
            },
            Self::Write(ref mut w) => {
                if justified {
                    write!(w, "{status:JUSTIFY_STATUS_LEN$}")?;
                } else {
                    write!(w, "{status}:")?;
                }
                match message {
                    Some(message) => writeln!(w, " {message}")?,
                    None => write!(w, " ")?,
                }
            },
        }
        Ok(())
    }

    /// Gets width of terminal, if applicable
    #[must_use]
    fn width(&self) -> Option<usize> {
        match self {
            Self::Stream { is_tty: true, .. } => terminal_width(),
            _ => None,
        }
    }
}

/// Queries the controlling terminal's column count via `TIOCGWINSZ`.
/// Returns `None` when stdout isn't a terminal or the ioctl fails, in
/// which case messages are printed unwrapped.
#[cfg(target_os = "linux")]
fn terminal_width() -> Option<usize> {
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if rc != 0 || size.ws_col == 0 {
        None
    } else {
        Some(size.ws_col as usize)
    }
}

#[cfg(not(target_os = "linux"))]
fn terminal_width() -> Option<usize> { None }
