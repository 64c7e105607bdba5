use anyhow::Result;
use clap::Parser;
use kvitt::config::ConfigOverrides;
use std::path::PathBuf;

/// kvitt - Kvitt game-night API client
///
/// Talks to the Kvitt backend on behalf of the signed-in user. Expired
/// sessions are refreshed automatically when KVITT_AUTH_URL is set.
///
/// Examples:
///   kvitt login --access-token <T> --refresh-token <R>
///   kvitt request GET /groups -q limit=10
///   kvitt feedback --game <GAME_ID> --rating 5 --comment "Great night"
#[derive(Parser, Debug)]
#[command(author, version = kvitt::VERSION, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (also via KVITT_API_URL)
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Auth service base URL used to refresh sessions (also via KVITT_AUTH_URL)
    #[arg(long = "auth-url", value_name = "URL", global = true)]
    pub auth_url: Option<String>,

    /// Where the session is stored (also via KVITT_SESSION_FILE)
    #[arg(long = "session-file", value_name = "PATH", global = true)]
    pub session_file: Option<PathBuf>,

    /// Request timeout in seconds (also via KVITT_TIMEOUT_SECS, default 15)
    #[arg(long = "timeout", value_name = "SECS", global = true)]
    pub timeout: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            auth_url: self.auth_url.clone(),
            session_file: self.session_file.clone(),
            timeout_secs: self.timeout,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send a request to the backend and print the response body
    Request(RequestArgs),

    /// Rate a finished game night
    Feedback(FeedbackArgs),

    /// Store a session issued by the auth service
    Login(LoginArgs),

    /// Discard the stored session
    Logout,
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// HTTP method, e.g. GET or POST
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Path relative to the API URL, e.g. /groups
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Query parameter, may be repeated
    #[arg(short = 'q', long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// JSON request body
    #[arg(short = 'd', long = "data", value_name = "JSON")]
    pub data: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct FeedbackArgs {
    /// Game the feedback is about
    #[arg(long = "game", value_name = "GAME_ID")]
    pub game_id: String,

    /// Group the game was played in
    #[arg(long = "group", value_name = "GROUP_ID")]
    pub group_id: Option<String>,

    /// Rating from 1 to 5
    #[arg(long, value_name = "N")]
    pub rating: u8,

    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    #[arg(long = "access-token", value_name = "TOKEN")]
    pub access_token: String,

    #[arg(long = "refresh-token", value_name = "TOKEN")]
    pub refresh_token: Option<String>,

    /// Seconds until the access token expires
    #[arg(long = "expires-in", value_name = "SECS")]
    pub expires_in: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = kvitt::runtime::RealRuntime;
    let overrides = cli.overrides();

    match cli.command {
        Commands::Request(args) => {
            kvitt::commands::request(
                runtime,
                &overrides,
                &args.method,
                &args.path,
                &args.query,
                args.data.as_deref(),
            )
            .await?
        }
        Commands::Feedback(args) => {
            kvitt::commands::feedback(
                runtime,
                &overrides,
                &args.game_id,
                args.group_id.as_deref(),
                args.rating,
                args.comment.as_deref(),
            )
            .await?
        }
        Commands::Login(args) => {
            kvitt::commands::login(
                runtime,
                &overrides,
                &args.access_token,
                args.refresh_token.as_deref(),
                args.expires_in,
            )
            .await?
        }
        Commands::Logout => kvitt::commands::logout(runtime, &overrides).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_request_parsing() {
        let cli = Cli::try_parse_from([
            "kvitt", "request", "GET", "/groups", "-q", "limit=10", "-q", "page=2",
        ])
        .unwrap();
        match cli.command {
            Commands::Request(args) => {
                assert_eq!(args.method, "GET");
                assert_eq!(args.path, "/groups");
                assert_eq!(args.query, vec!["limit=10", "page=2"]);
                assert_eq!(args.data, None);
            }
            _ => panic!("Expected Request command"),
        }
        assert_eq!(cli.api_url, None);
    }

    #[test]
    fn test_cli_feedback_parsing() {
        let cli = Cli::try_parse_from([
            "kvitt", "feedback", "--game", "g1", "--rating", "4", "--comment", "fun",
        ])
        .unwrap();
        match cli.command {
            Commands::Feedback(args) => {
                assert_eq!(args.game_id, "g1");
                assert_eq!(args.group_id, None);
                assert_eq!(args.rating, 4);
                assert_eq!(args.comment.as_deref(), Some("fun"));
            }
            _ => panic!("Expected Feedback command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "kvitt",
            "--api-url",
            "https://api.kvitt.test",
            "logout",
            "--session-file",
            "/tmp/s.json",
            "--timeout",
            "3",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.api_url.as_deref(), Some("https://api.kvitt.test"));
        assert_eq!(overrides.session_file, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(overrides.timeout_secs, Some(3));
    }

    #[test]
    fn test_cli_feedback_requires_rating() {
        assert!(Cli::try_parse_from(["kvitt", "feedback", "--game", "g1"]).is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["kvitt"]).is_err());
    }
}
