use anyhow::Result;
use clap::Parser;
use hyacinth::commands::{self, UploadArgs};
use hyacinth::config::{ClientConfig, Region};
use hyacinth::Client;
use std::path::PathBuf;

/// hyacinth - Clio API client
///
/// Read, download, and upload Clio resources from the command line.
///
/// The access token is read from CLIO_ACCESS_TOKEN unless --token is given.
///
/// Examples:
///   hyacinth whoami
///   hyacinth list matters --fields id,display_number
///   hyacinth upload ./brief.pdf --parent-id 123 --parent-type Matter
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// OAuth access token
    #[arg(long, env = "CLIO_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Data region: US, CA, AU, or EU
    #[arg(long, env = "CLIO_REGION", default_value = "US", global = true)]
    pub region: String,

    /// Base URL replacing the regional one (e.g. a proxy)
    #[arg(long = "api-url", env = "CLIO_API_URL", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Wait out rate limits and retry once
    #[arg(long, global = true)]
    pub ratelimit: bool,

    /// Treat non-success statuses as errors
    #[arg(long, global = true)]
    pub strict: bool,

    /// Only fetch the first page of collections
    #[arg(long = "no-autopaginate", global = true)]
    pub no_autopaginate: bool,

    /// Log at info level and report the rate-limit budget
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Show the authenticated user
    Whoami(FieldsArgs),

    /// List every item of a collection, one JSON object per line
    List(ListArgs),

    /// Show a single resource
    Get(GetArgs),

    /// Download a document's content
    Download(DownloadArgs),

    /// Upload a file as a new document
    Upload(UploadCliArgs),
}

#[derive(clap::Args, Debug)]
pub struct FieldsArgs {
    /// Comma-separated field projection
    #[arg(long)]
    pub fields: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Collection name, e.g. "matters" or "contacts"
    pub collection: String,

    #[arg(long)]
    pub fields: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    pub collection: String,

    pub id: u64,

    #[arg(long)]
    pub fields: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Document ID
    pub id: u64,

    /// Destination file
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct UploadCliArgs {
    /// File to upload
    pub path: PathBuf,

    /// Document name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long = "parent-id")]
    pub parent_id: u64,

    /// Matter, Contact, or Folder
    #[arg(long = "parent-type", default_value = "Folder")]
    pub parent_type: String,

    #[arg(long = "category-id")]
    pub category_id: Option<u64>,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            region: Region::parse_lenient(&self.region),
            base_url_override: self.api_url.clone(),
            ratelimit: self.ratelimit,
            raise_for_status: self.strict,
            autopaginate: !self.no_autopaginate,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let Some(token) = cli.token.as_deref() else {
        anyhow::bail!("No access token: pass --token or set CLIO_ACCESS_TOKEN");
    };
    let client = Client::new(token, cli.client_config())?;
    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Commands::Whoami(args) => commands::whoami(&client, args.fields.as_deref(), &mut stdout).await?,
        Commands::List(args) => {
            commands::list(&client, &args.collection, args.fields.as_deref(), &mut stdout).await?;
        }
        Commands::Get(args) => {
            commands::get(&client, &args.collection, args.id, args.fields.as_deref(), &mut stdout).await?
        }
        Commands::Download(args) => {
            commands::download(&client, args.id, &args.output).await?;
        }
        Commands::Upload(args) => {
            let args = UploadArgs {
                path: args.path.clone(),
                name: args.name.clone(),
                parent_id: args.parent_id,
                parent_type: args.parent_type.clone(),
                category_id: args.category_id,
            };
            let document = commands::upload(&client, &args, &mut std::io::stderr()).await?;
            commands::write_json(&mut stdout, &document)?;
        }
    }

    if cli.verbose {
        commands::report_rate_limit(&client);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_list_parsing() {
        let cli = Cli::try_parse_from(["hyacinth", "--token", "t", "list", "matters", "--fields", "id"]).unwrap();
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.collection, "matters");
                assert_eq!(args.fields.as_deref(), Some("id"));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hyacinth",
            "whoami",
            "--token",
            "t",
            "--strict",
            "--ratelimit",
            "--no-autopaginate",
            "--region",
            "eu",
        ])
        .unwrap();
        let config = cli.client_config();
        assert!(config.raise_for_status);
        assert!(config.ratelimit);
        assert!(!config.autopaginate);
        assert_eq!(config.region, Region::Eu);
    }

    #[test]
    fn test_cli_unknown_region_falls_back_to_us() {
        let cli = Cli::try_parse_from(["hyacinth", "--region", "JP", "whoami"]).unwrap();
        assert_eq!(cli.client_config().region, Region::Us);
    }

    #[test]
    fn test_cli_upload_parsing() {
        let cli = Cli::try_parse_from([
            "hyacinth",
            "upload",
            "./brief.pdf",
            "--parent-id",
            "42",
            "--parent-type",
            "Matter",
            "--category-id",
            "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload(args) => {
                assert_eq!(args.path, PathBuf::from("./brief.pdf"));
                assert_eq!(args.parent_id, 42);
                assert_eq!(args.parent_type, "Matter");
                assert_eq!(args.category_id, Some(7));
                assert_eq!(args.name, None);
            }
            _ => panic!("Expected Upload command"),
        }
    }

    #[test]
    fn test_cli_download_requires_output() {
        assert!(Cli::try_parse_from(["hyacinth", "download", "5"]).is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["hyacinth"]).is_err());
    }
}
