use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use swr_pager::{Config, Infinite, Key, Options, Swr};

#[derive(Parser, Debug)]
#[command(name = "swr-pager")]
#[command(about = "Fetch a paginated JSON endpoint through a stale-while-revalidate cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swr-pager/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// URL template; `{page}` is replaced by the page number
  #[arg(short, long)]
  url: String,

  /// Number of pages to load
  #[arg(short, long, default_value_t = 1)]
  pages: usize,

  /// Number of the first page
  #[arg(long, default_value_t = 1)]
  start: usize,

  /// Stop at the first page whose body is an empty array
  #[arg(long)]
  stop_on_empty: bool,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,
}

fn init_logging(to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swr_pager=info"));

  if to_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("swr-pager");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "swr-pager.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn page_url(template: &str, page: usize) -> String {
  template.replace("{page}", &page.to_string())
}

fn is_empty_page(page: &Value) -> bool {
  page.as_array().is_some_and(|items| items.is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_stderr)?;

  if !args.url.contains("{page}") {
    return Err(eyre!("URL template must contain a {{page}} placeholder"));
  }

  // Load configuration
  let mut options = Options::load(args.config.as_deref())?;
  options.initial_size = args.pages;
  let config = Config::default().with_options(options);

  let swr = Swr::new(config.clone());
  let template = args.url.clone();
  let (start, stop_on_empty) = (args.start, args.stop_on_empty);
  let pages: Infinite<Value> = Infinite::new(
    &swr,
    move |index, previous: Option<&Value>| {
      if stop_on_empty && previous.is_some_and(is_empty_page) {
        return Ok(Key::None);
      }
      Ok(Key::from(page_url(&template, start + index)))
    },
    None,
    config,
  );

  tracing::info!(url = %args.url, pages = args.pages, "loading");
  let data = pages.revalidate().await?.unwrap_or_default();
  tracing::info!(loaded = data.len(), "done");

  println!("{}", serde_json::to_string_pretty(&data)?);

  Ok(())
}
