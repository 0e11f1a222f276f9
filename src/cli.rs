//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Fetch notifications, detail pages and attachments from supported sites.
///
/// Results are printed to stdout as JSON; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "catcher")]
#[command(author, version, about)]
pub struct Args {
    /// Client identifier (bupt, cmathc, saikr, bili)
    pub client: String,

    /// Account name; also keys the stored cookies
    pub username: String,

    /// Account password (ignored by anonymous sites)
    pub password: String,

    /// Operation to run
    #[arg(long, value_enum, default_value_t = Action::List)]
    pub action: Action,

    /// Detail page or attachment URL (detail, download)
    #[arg(long)]
    pub url: Option<String>,

    /// Destination file (download)
    #[arg(long)]
    pub save_path: Option<PathBuf>,

    /// Size limit in megabytes; 0 disables the limit (download)
    #[arg(long, value_name = "MB")]
    pub max_size: Option<u64>,

    /// Referer header sent with the download
    #[arg(long)]
    pub referer: Option<String>,

    /// Extra site options as a JSON object, e.g. '{"url": "..."}'
    #[arg(long, value_name = "JSON")]
    pub extra: Option<String>,

    /// Directory for persisted cookies
    #[arg(long, env = "CATCHER_COOKIE_DIR")]
    pub cookie_dir: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Operations a client offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Notification listing
    List,
    /// Sanitized detail page
    Detail,
    /// Attachment download
    Download,
}

impl Action {
    /// Flag value naming this action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Detail => "detail",
            Self::Download => "download",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["catcher", "bupt", "2024000000", "secret"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_cli_positionals_and_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.client, "bupt");
        assert_eq!(args.username, "2024000000");
        assert_eq!(args.password, "secret");
        assert_eq!(args.action, Action::List);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.url.is_none());
        assert!(args.max_size.is_none());
    }

    #[test]
    fn test_cli_missing_positionals_rejected() {
        let err = Args::try_parse_from(["catcher", "bupt"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_download_flags() {
        let args = parse(&[
            "--action",
            "download",
            "--url",
            "http://my.bupt.edu.cn/a.pdf",
            "--save-path",
            "/tmp/a.pdf",
            "--max-size",
            "5",
            "--referer",
            "http://my.bupt.edu.cn/",
        ])
        .unwrap();
        assert_eq!(args.action, Action::Download);
        assert_eq!(args.save_path, Some(PathBuf::from("/tmp/a.pdf")));
        assert_eq!(args.max_size, Some(5));
        assert_eq!(args.referer.as_deref(), Some("http://my.bupt.edu.cn/"));
    }

    #[test]
    fn test_cli_unknown_action_rejected() {
        let err = parse(&["--action", "delete"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_negative_max_size_rejected() {
        assert!(parse(&["--max-size", "-1"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        assert_eq!(parse(&["-v"]).unwrap().verbose, 1);
        assert_eq!(parse(&["-vv"]).unwrap().verbose, 2);
        assert_eq!(parse(&["--verbose", "--verbose"]).unwrap().verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        assert!(parse(&["-q"]).unwrap().quiet);
        assert!(parse(&["--quiet"]).unwrap().quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["catcher", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["catcher", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
