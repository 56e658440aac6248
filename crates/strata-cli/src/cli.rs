use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "strata CLI: inspect and invalidate a shared cache deployment")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to strata.toml (defaults to ./strata.toml when present)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<String>,

    /// Key namespace (overrides cache.namespace from config)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Redis URL (overrides redis.url from config)
    #[arg(long, global = true, env = "STRATA_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Show library logs at the configured level instead of warnings only
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the shared-tier entry for a key
    Get(KeyArgs),
    /// Invalidate a key everywhere (shared tier and every listening instance)
    Invalidate(KeyArgs),
    /// Invalidate every key carrying a tag
    InvalidateTag(TagArgs),
    /// List the keys in a tag's shared index
    TagMembers(TagArgs),
    /// Print invalidation messages as they are published (Ctrl-C to stop)
    Listen,
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Cache key without namespace (e.g. user:42)
    pub key: String,
}

#[derive(clap::Args)]
pub struct TagArgs {
    /// Tag name
    pub tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["strata", "invalidate-tag", "users", "--namespace", "orders"])
            .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("orders"));
        match cli.command {
            Commands::InvalidateTag(args) => assert_eq!(args.tag, "users"),
            _ => panic!("expected invalidate-tag"),
        }
    }

    #[test]
    fn key_is_required() {
        assert!(Cli::try_parse_from(["strata", "get"]).is_err());
    }
}
