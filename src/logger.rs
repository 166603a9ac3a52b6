//! Logging and verbosity control for the application.
//!
//! Provides a global logger with three verbosity levels:
//! - Quiet: only the report path and errors
//! - Normal: progress messages without prefixes (default)
//! - Verbose: timestamped colored logs with details
//!
//! Library code logs through the free functions below. When the binary never
//! called [`Logger::init`] (unit tests, embedding), a quiet logger is used.

use std::sync::OnceLock;
use std::time::Instant;

/// Verbosity level for controlling output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    Quiet,
    Normal,
    Verbose,
}

impl VerbosityLevel {
    /// Resolves the `--quiet` / `--verbose` flag pair.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Debug)]
pub struct Logger {
    level: VerbosityLevel,
    colors_enabled: bool,
}

impl Logger {
    /// Install the global logger. Returns `false` if a logger was already in place.
    pub fn init(level: VerbosityLevel, no_color: bool) -> bool {
        let colors_enabled = !no_color
            && std::env::var("NO_COLOR").is_err()
            && atty::is(atty::Stream::Stdout);

        START_TIME.get_or_init(Instant::now);
        LOGGER
            .set(Logger {
                level,
                colors_enabled,
            })
            .is_ok()
    }

    /// The global logger, or a quiet one if none was installed.
    pub fn instance() -> &'static Logger {
        LOGGER.get_or_init(|| Logger {
            level: VerbosityLevel::Quiet,
            colors_enabled: false,
        })
    }

    fn elapsed(&self) -> f64 {
        START_TIME
            .get()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn level(&self) -> VerbosityLevel {
        self.level
    }

    fn prefixed(&self, level: &str, msg: &str) -> String {
        let elapsed = self.elapsed();
        if self.colors_enabled {
            let level_color = match level {
                "ERROR" => "\x1b[31m",
                "WARN" => "\x1b[33m",
                "INFO" => "\x1b[34m",
                "DEBUG" => "\x1b[90m",
                _ => "",
            };
            format!(
                "\x1b[90m[{:.2}s]\x1b[0m {}[{}]\x1b[0m {}",
                elapsed, level_color, level, msg
            )
        } else {
            format!("[{:.2}s] [{}] {}", elapsed, level, msg)
        }
    }

    /// Errors are always displayed, on stderr.
    pub fn error(&self, msg: &str) {
        if self.level == VerbosityLevel::Verbose {
            eprintln!("{}", self.prefixed("ERROR", msg));
        } else {
            eprintln!("Error: {}", msg);
        }
    }

    /// Warnings go to stderr so they never mix with report output.
    pub fn warn(&self, msg: &str) {
        match self.level {
            VerbosityLevel::Quiet => {}
            VerbosityLevel::Normal => eprintln!("Warning: {}", msg),
            VerbosityLevel::Verbose => eprintln!("{}", self.prefixed("WARN", msg)),
        }
    }

    pub fn info(&self, msg: &str) {
        match self.level {
            VerbosityLevel::Quiet => {}
            VerbosityLevel::Normal => println!("{}", msg),
            VerbosityLevel::Verbose => println!("{}", self.prefixed("INFO", msg)),
        }
    }

    pub fn debug(&self, msg: &str) {
        if self.level == VerbosityLevel::Verbose {
            println!("{}", self.prefixed("DEBUG", msg));
        }
    }

    /// A written file (quiet: bare path, normal: message, verbose: prefixed).
    pub fn output(&self, path: &str) {
        match self.level {
            VerbosityLevel::Quiet => println!("{}", path),
            VerbosityLevel::Normal => println!("Saved: {}", path),
            VerbosityLevel::Verbose => {
                println!("{}", self.prefixed("INFO", &format!("Saved: {}", path)))
            }
        }
    }
}

pub fn error(msg: &str) {
    Logger::instance().error(msg);
}

pub fn warn(msg: &str) {
    Logger::instance().warn(msg);
}

pub fn info(msg: &str) {
    Logger::instance().info(msg);
}

pub fn debug(msg: &str) {
    Logger::instance().debug(msg);
}

pub fn output(path: &str) {
    Logger::instance().output(path);
}

pub fn level() -> VerbosityLevel {
    Logger::instance().level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_level_ordering() {
        assert!(VerbosityLevel::Quiet < VerbosityLevel::Normal);
        assert!(VerbosityLevel::Normal < VerbosityLevel::Verbose);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(VerbosityLevel::from_flags(true, false), VerbosityLevel::Quiet);
        assert_eq!(VerbosityLevel::from_flags(false, true), VerbosityLevel::Verbose);
        assert_eq!(VerbosityLevel::from_flags(false, false), VerbosityLevel::Normal);
        // --quiet wins over --verbose
        assert_eq!(VerbosityLevel::from_flags(true, true), VerbosityLevel::Quiet);
    }

    #[test]
    fn test_prefixed_without_colors() {
        let logger = Logger {
            level: VerbosityLevel::Verbose,
            colors_enabled: false,
        };
        let line = logger.prefixed("WARN", "ring skipped");
        assert!(line.ends_with("[WARN] ring skipped"));
        assert!(line.starts_with('['));
    }

    #[test]
    fn test_instance_without_init_does_not_panic() {
        // Logging from library code must be safe before the binary sets up a logger.
        debug("no logger installed");
        let _ = level();
    }
}
