//! Command-line interface definitions for the mugshot scraper.
//!
//! Every option can be given as a flag or through the environment (a `.env`
//! file is loaded before parsing).

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::models::ScrapeTarget;

/// Runtime configuration for the scraper, poster and dashboard.
///
/// # Examples
///
/// ```sh
/// # Everything from the environment / .env
/// mugshot_scraper
///
/// # Override the target site
/// mugshot_scraper --base-url https://jail.example.com --state KY --county Jefferson
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// PostgreSQL connection string for the record store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: String,

    /// Supabase service key
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: String,

    /// Storage bucket for mugshot images
    #[arg(long, env = "SUPABASE_BUCKET_NAME")]
    pub supabase_bucket_name: String,

    /// Page access token for the Graph API
    #[arg(long, env = "FACEBOOK_ACCESS_TOKEN", hide_env_values = true)]
    pub facebook_access_token: String,

    /// Facebook page that receives the posts
    #[arg(long, env = "FACEBOOK_PAGE_ID")]
    pub facebook_page_id: String,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
    pub openai_key: String,

    /// Chat model used for captions
    #[arg(long, env = "OPENAI_MODEL", default_value = crate::api::DEFAULT_MODEL)]
    pub openai_model: String,

    /// Token limit for a generated caption
    #[arg(long, env = "CAPTION_MAX_TOKENS", default_value_t = crate::api::DEFAULT_MAX_TOKENS)]
    pub caption_max_tokens: u32,

    /// Root URL of the booking site
    #[arg(long, env = "BASE_URL")]
    pub base_url: String,

    /// State recorded on every booking
    #[arg(long, env = "STATE")]
    pub state: String,

    /// County recorded on every booking
    #[arg(long, env = "COUNTY")]
    pub county: String,

    /// Attempts per page request before the session is rotated
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Address for the log dashboard
    #[arg(long, env = "DASHBOARD_ADDR", default_value = crate::dashboard::DEFAULT_ADDR)]
    pub dashboard_addr: SocketAddr,

    /// Directory for the daily-rotated `mugshot_scraper.log` files
    #[arg(long, env = "LOG_DIR", default_value = ".")]
    pub log_dir: PathBuf,
}

impl Cli {
    /// The site to scrape; fails when `base_url` is not an absolute URL.
    pub fn target(&self) -> Result<ScrapeTarget> {
        let base = Url::parse(&self.base_url).map_err(|e| {
            ScrapeError::Config(format!("BASE_URL {:?} is not a valid URL: {e}", self.base_url))
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ScrapeError::Config(format!(
                "BASE_URL {:?} must be an http(s) URL",
                self.base_url
            )));
        }
        Ok(ScrapeTarget::new(&self.state, &self.county, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "mugshot_scraper",
        "--database-url",
        "postgres://localhost/mugshots",
        "--supabase-url",
        "https://proj.supabase.co",
        "--supabase-key",
        "key",
        "--supabase-bucket-name",
        "mugshots",
        "--facebook-access-token",
        "token",
        "--facebook-page-id",
        "12345",
        "--openai-key",
        "sk-test",
        "--state",
        "KY",
        "--county",
        "Jefferson",
    ];

    fn parse(base_url: &str, extra: &[&str]) -> Cli {
        let mut args = REQUIRED.to_vec();
        args.extend(["--base-url", base_url]);
        args.extend(extra);
        Cli::parse_from(args)
    }

    #[test]
    fn test_cli_parsing() {
        let cli = parse("https://jail.example.com", &[]);

        assert_eq!(cli.database_url, "postgres://localhost/mugshots");
        assert_eq!(cli.county, "Jefferson");
        assert_eq!(cli.openai_model, "gpt-4o-mini");
        assert_eq!(cli.caption_max_tokens, 200);
        assert_eq!(cli.max_retries, 3);
        assert_eq!(cli.dashboard_addr, "0.0.0.0:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.log_dir, PathBuf::from("."));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = parse(
            "https://jail.example.com",
            &[
                "--max-retries",
                "5",
                "--dashboard-addr",
                "127.0.0.1:8080",
                "--log-dir",
                "/var/log/mugshots",
            ],
        );

        assert_eq!(cli.max_retries, 5);
        assert_eq!(cli.log_dir, PathBuf::from("/var/log/mugshots"));
        assert_eq!(cli.dashboard_addr.port(), 8080);
    }

    #[test]
    fn test_target_from_base_url() {
        let target = parse("https://jail.example.com", &[]).target().unwrap();
        assert_eq!(target.state, "KY");
        assert_eq!(target.base_url.host_str(), Some("jail.example.com"));
    }

    #[test]
    fn test_bad_base_url_is_config_error() {
        let err = parse("jail.example.com", &[]).target().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
        let err = parse("mailto:jail@example.com", &[]).target().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
    }
}
