use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use conduit::{HostValue, Request, Runtime, RuntimeConfig, TRACE_TARGET_SCRIPT};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer as _, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit status for requests that fail.
const FAILURE: u8 = 255;
const LOG_ENV: &str = "CONDUIT_LOG";

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Run a script on the embedded engine.", long_about = None)]
struct Cli {
    /// Script file to run.
    #[arg(required_unless_present = "run", conflicts_with = "run")]
    file: Option<PathBuf>,

    /// Evaluate CODE instead of a file; its first expression is the result.
    #[arg(short, long, value_name = "CODE")]
    run: Option<String>,

    /// Runtime settings (YAML).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Declarations loaded before the script, overriding the config.
    #[arg(long, value_name = "PATH")]
    startup: Option<PathBuf>,

    /// JSON value exposed as `$_SERVER['CONTEXT']`.
    #[arg(long, value_name = "JSON")]
    context: Option<String>,

    /// Print the script's result as JSON after its output.
    #[arg(long)]
    print_result: bool,

    /// Arguments exposed as `$argv`.
    #[arg(last = true)]
    args: Vec<String>,
}

impl Cli {
    fn runtime(&self) -> Result<Runtime> {
        let config = match &self.config {
            Some(path) => load_config(path)?,
            None => RuntimeConfig::default(),
        };
        let mut builder = Runtime::builder().config(config);
        if let Some(startup) = &self.startup {
            builder = builder.startup_file(startup);
        }
        builder.build().context("failed to start runtime")
    }

    fn request(self) -> Result<Request> {
        let request = match (self.run, self.file) {
            (Some(code), _) => Request::source(code),
            (None, Some(file)) => Request::file(file),
            (None, None) => bail!("nothing to run"),
        };
        let context = match self.context {
            Some(json) => {
                let value: serde_json::Value = serde_json::from_str(&json).context("invalid --context JSON")?;
                HostValue::from(value)
            }
            None => HostValue::Undefined,
        };
        Ok(request.context(context).args(self.args))
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .with_env_var(LOG_ENV)
        .from_env()
        .context("invalid log filter")?
        .add_directive(format!("{TRACE_TARGET_SCRIPT}=info").parse()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .init();
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<ExitCode> {
    let runtime = cli.runtime()?;
    let print_result = cli.print_result;
    let request = cli.request()?;
    debug!(?request, "starting");

    match runtime.execute(request).await {
        Ok(value) => {
            if print_result {
                println!("{}", value.to_json());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(FAILURE))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn code_and_trailing_args() {
        let cli = Cli::try_parse_from(["conduit", "-r", "1 + 1", "--", "a", "b"]).unwrap();
        assert_eq!(cli.run.as_deref(), Some("1 + 1"));
        assert_eq!(cli.args, ["a", "b"]);
        assert!(cli.request().is_ok());
    }

    #[test]
    fn file_or_code_is_required() {
        assert!(Cli::try_parse_from(["conduit"]).is_err());
        assert!(Cli::try_parse_from(["conduit", "script.php", "-r", "1"]).is_err());
    }

    #[test]
    fn bad_context_is_reported() {
        let cli = Cli::try_parse_from(["conduit", "-r", "1", "--context", "{nope"]).unwrap();
        assert!(cli.request().is_err());
    }

    #[test]
    fn yaml_config_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "expose: false\ndocument_root: /srv/www").unwrap();
        let config = load_config(file.path()).unwrap();
        assert!(!config.expose);
        assert_eq!(config.document_root, "/srv/www");
        assert_eq!(config.default_mimetype, "text/html");
    }
}
