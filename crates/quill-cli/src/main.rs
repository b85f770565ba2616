//! Quill CLI - run parameterized notebooks headlessly.

mod params;
mod run;
mod ticker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use quill_core::storage::{DEFAULT_S3_ENDPOINT, REMOTE_MARKER};
use quill_core::{Parameter, Verbosity};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Run parameterized notebooks headlessly")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Decrease verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    quiet: u8,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a notebook and write an HTML report while it runs
    Run {
        /// Notebook path or s3://bucket/key
        #[arg(value_parser = notebook_location)]
        notebook: String,

        /// Parameters to inject, as name=value (values are decoded as JSON when possible)
        #[arg(value_parser = parse_parameter)]
        parameters: Vec<Parameter>,

        /// Where to write the HTML report (path or s3://bucket/key) [default: output.html]
        #[arg(short, long)]
        output_html_path: Option<String>,

        /// Also write the executed notebook back to its source location
        #[arg(long)]
        in_place: bool,

        /// Seconds between report snapshots
        #[arg(long, default_value = "5", value_parser = parse_seconds)]
        snapshot_interval: Duration,

        /// Per-cell time limit in seconds (0 disables it)
        #[arg(long, default_value_t = 600)]
        cell_timeout: u64,

        /// Python interpreter to run cells with
        #[arg(long, env = "QUILL_PYTHON")]
        python: Option<PathBuf>,

        /// S3-compatible endpoint for s3:// locations
        #[arg(long, env = "QUILL_S3_ENDPOINT", default_value = DEFAULT_S3_ENDPOINT)]
        s3_endpoint: String,
    },

    /// Print the current value of notebook parameters
    Params {
        /// Notebook path or s3://bucket/key
        #[arg(value_parser = notebook_location)]
        notebook: String,

        /// Parameter names
        #[arg(required = true)]
        names: Vec<String>,

        /// S3-compatible endpoint for s3:// locations
        #[arg(long, env = "QUILL_S3_ENDPOINT", default_value = DEFAULT_S3_ENDPOINT)]
        s3_endpoint: String,
    },
}

/// Local notebooks must exist; remote ones are checked when fetched.
fn notebook_location(value: &str) -> Result<String, String> {
    if value.starts_with(REMOTE_MARKER) || Path::new(value).exists() {
        Ok(value.to_string())
    } else {
        Err(format!("path '{value}' does not exist"))
    }
}

fn parse_parameter(value: &str) -> Result<Parameter, String> {
    value.parse().map_err(|e: quill_core::Error| e.to_string())
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err("interval must be positive".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Message-only output on stderr, like a plain report log.
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet > 0 {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(false)
        .without_time()
        .init();

    let verbosity = if cli.quiet > 0 {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };

    // Helper to format quill-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(quill_err) = err.downcast_ref::<quill_core::Error>() {
            anyhow::anyhow!("{}", quill_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            notebook,
            parameters,
            output_html_path,
            in_place,
            snapshot_interval,
            cell_timeout,
            python,
            s3_endpoint,
        } => {
            let args = run::RunArgs {
                notebook,
                parameters,
                output: output_html_path,
                in_place,
                snapshot_interval,
                cell_timeout: (cell_timeout > 0).then(|| Duration::from_secs(cell_timeout)),
                python,
                s3_endpoint,
                verbosity,
            };
            run::execute(args).await.map_err(format_error)?;
        }

        Commands::Params {
            notebook,
            names,
            s3_endpoint,
        } => {
            params::execute(&notebook, &names, &s3_endpoint)
                .await
                .map_err(format_error)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_seconds("0.5").unwrap(), Duration::from_millis(500));
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_remote_notebooks_skip_existence_check() {
        assert!(notebook_location("s3://bucket/nb.ipynb").is_ok());
        assert!(notebook_location("/definitely/not/here.ipynb").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "quill",
            "run",
            "s3://bucket/nb.ipynb",
            "alpha=0.5",
            "name=run",
            "-o",
            "s3://bucket/out.html",
            "--in-place",
            "-q",
        ])
        .unwrap();
        assert_eq!(cli.quiet, 1);
        let Commands::Run {
            parameters,
            output_html_path,
            in_place,
            snapshot_interval,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0].value, serde_json::json!(0.5));
        assert_eq!(output_html_path.as_deref(), Some("s3://bucket/out.html"));
        assert!(in_place);
        assert_eq!(snapshot_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_parameter_without_value_is_rejected() {
        assert!(Cli::try_parse_from(["quill", "run", "s3://bucket/nb.ipynb", "alpha"]).is_err());
    }

    #[test]
    fn test_report_path_is_optional() {
        let cli = Cli::try_parse_from(["quill", "run", "s3://bucket/nb.ipynb"]).unwrap();
        let Commands::Run {
            output_html_path, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(output_html_path.is_none());
    }
}
