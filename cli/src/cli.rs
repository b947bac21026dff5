use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

/// Stream agent responses and pull the files they write out of the prose.
#[derive(Debug, Parser)]
#[command(version, bin_name = "codeforge")]
pub struct Cli {
    /// Log at info level unless `RUST_LOG` says otherwise.
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify a saved response offline, feeding it in fixed-size fragments.
    Replay(ReplayArgs),

    /// Chat with the agent service over a live session.
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Response text to classify, or `-` for stdin.
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Fragment size in characters; `0` feeds the whole response at once.
    #[arg(long, default_value_t = 16)]
    pub chunk_size: usize,

    /// Print one JSON event per line instead of the transcript.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Write every extracted file under this directory.
    #[arg(long, value_name = "DIR")]
    pub write_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Websocket endpoint; overrides `session.url` from config.toml.
    #[arg(long)]
    pub url: Option<String>,

    /// Bearer token; defaults to `$CODEFORGE_API_TOKEN`.
    #[arg(long)]
    pub token: Option<String>,

    /// Write completed files under this directory after every response.
    #[arg(long, value_name = "DIR")]
    pub write_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use super::Command;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn replay_defaults() {
        let cli = Cli::parse_from(["codeforge", "replay", "response.txt"]);

        assert!(!cli.verbose);
        let Command::Replay(args) = cli.command else {
            panic!("expected replay command");
        };
        assert_eq!(args.input, PathBuf::from("response.txt"));
        assert_eq!(args.chunk_size, 16);
        assert!(!args.json);
        assert_eq!(args.write_dir, None);
    }

    #[test]
    fn replay_flags() {
        let cli = Cli::parse_from([
            "codeforge",
            "replay",
            "-",
            "--chunk-size",
            "1",
            "--json",
            "--write-dir",
            "out",
            "-v",
        ]);

        assert!(cli.verbose);
        let Command::Replay(args) = cli.command else {
            panic!("expected replay command");
        };
        assert_eq!(args.input, PathBuf::from("-"));
        assert_eq!(args.chunk_size, 1);
        assert!(args.json);
        assert_eq!(args.write_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn chat_overrides() {
        let cli = Cli::parse_from([
            "codeforge",
            "--verbose",
            "chat",
            "--url",
            "ws://localhost:9000/ws",
            "--token",
            "sk-1",
        ]);

        assert!(cli.verbose);
        let Command::Chat(args) = cli.command else {
            panic!("expected chat command");
        };
        assert_eq!(args.url.as_deref(), Some("ws://localhost:9000/ws"));
        assert_eq!(args.token.as_deref(), Some("sk-1"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["codeforge"]).is_err());
    }
}
