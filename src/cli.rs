use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Args;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use optium_neo_lib::SessionConfig;

/// Flags shared by every binary that reads a meter.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Directory the JSON exports are written to.
    #[arg(short = 'p', long = "path", default_value = "./")]
    pub output_dir: PathBuf,
    /// Milliseconds to wait between sending a command and reading its reply.
    #[arg(short, long = "wait", default_value_t = 1000)]
    pub wait_ms: u64,
    /// Offset of the meter's clock from UTC, in minutes.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub utc_offset_minutes: i32,
    /// Abort a session when a reply never shows its terminator.
    #[arg(long)]
    pub strict: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl SessionArgs {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let config = SessionConfig::default()
            .with_settle_ms(self.wait_ms)
            .with_offset_minutes(self.utc_offset_minutes)
            .ok_or_else(|| anyhow!("UTC offset of {} minutes is out of range", self.utc_offset_minutes))?;
        Ok(SessionConfig {
            strict_terminator: self.strict,
            ..config
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        session: SessionArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.session.output_dir, PathBuf::from("./"));
        assert_eq!(cli.session.wait_ms, 1000);

        let config = cli.session.session_config().unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_flags_reach_session_config() {
        let cli = TestCli::parse_from(["test", "-p", "/tmp/out", "-w", "250", "--utc-offset-minutes", "-90"]);
        let config = cli.session.session_config().unwrap();

        assert_eq!(cli.session.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.settle_interval, Duration::from_millis(250));
        assert_eq!(config.device_offset.local_minus_utc(), -90 * 60);
    }

    #[test]
    fn test_offset_out_of_range() {
        let cli = TestCli::parse_from(["test", "--utc-offset-minutes", "100000"]);
        assert!(cli.session.session_config().is_err());
    }
}
