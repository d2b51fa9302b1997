use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use sitedown_core::logging::init_logging;
use sitedown_core::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use sitedown_core::session::{DeactivateRequest, run_deactivation, validate_site_name};

#[derive(Debug, Parser)]
#[command(
    name = "sitedown",
    version,
    about = "Deactivate a site by commenting matching lines in known config files and moving the site directory to the archive.",
    long_about = "Deactivate a site by commenting matching lines in known config files and moving the site directory to the archive.\n\nBy default this is a dry run: it reports which lines in each config file would be commented out and where the site directory would be moved. Pass --apply to make changes."
)]
struct Cli {
    #[arg(
        value_parser = parse_site,
        help = "Site directory name under the sites root (for example: mit)"
    )]
    site: String,
    #[arg(
        long = "token",
        value_name = "TOKEN",
        help = "Additional token to match in config lines. Use more than once to add multiple tokens."
    )]
    tokens: Vec<String>,
    #[arg(long, help = "Apply changes. Without this flag, runs in dry-run mode.")]
    apply: bool,
    #[arg(
        long,
        help = "Allow apply mode to continue if a config file has no active matching lines."
    )]
    allow_missing: bool,
    #[arg(long, help = "Show a unified diff of each pending config edit")]
    diff: bool,
    #[arg(long, value_name = "PATH", help = "Path to sitedown.toml")]
    config: Option<PathBuf>,
    #[arg(short, long, help = "Log resolution and filesystem steps to stderr")]
    verbose: bool,
    #[arg(long, value_name = "PATH", hide = true)]
    sites_root: Option<PathBuf>,
    #[arg(long, value_name = "PATH", hide = true)]
    archive_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> PathOverrides {
        PathOverrides {
            sites_root: self.sites_root.clone(),
            archive_dir: self.archive_dir.clone(),
            config: self.config.clone(),
        }
    }

    fn request(&self) -> DeactivateRequest {
        DeactivateRequest {
            site: self.site.clone(),
            extra_tokens: self.tokens.clone(),
            apply: self.apply,
            allow_missing: self.allow_missing,
            show_diff: self.diff,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose)?;

    let paths = resolve_runtime_paths(&cli)?;
    tracing::debug!("resolved runtime paths\n{}", paths.diagnostics());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let outcome = run_deactivation(&paths, &cli.request(), &mut out)?;
    Ok(ExitCode::from(outcome.exit_code()))
}

fn resolve_runtime_paths(cli: &Cli) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    resolve_paths(&context, &cli.overrides())
}

fn parse_site(value: &str) -> Result<String, String> {
    let site = value.trim();
    validate_site_name(site).map_err(|error| error.to_string())?;
    Ok(site.to_string())
}
