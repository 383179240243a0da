use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use outpost::cache::CacheStorage;
use outpost::commands::{self, ConsoleCommand};
use outpost::notify::Notification;
use outpost::sync::SyncTrigger;
use outpost::{logging, Config, Context, ReqwestTransport, Request, Response, Runtime, RuntimeHandle};

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline-first request cache and background sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror log output to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// GET a path or URL through the cache layer
  Fetch { target: String },
  /// Send a mutation; queued for sync if the network is down
  Send {
    method: String,
    target: String,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
    /// Extra header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Replay queued mutations now
  Sync,
  /// Show lifecycle state, namespaces and queued actions
  Status,
  /// Run the layer with an interactive console on stdin
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log, args.verbose)?;

  let transport = Arc::new(ReqwestTransport::new()?);
  let (ctx, notifications) = Context::new(config, transport)?;

  match args.command {
    Cmd::Fetch { target } => {
      ensure_installed(&ctx).await?;
      let request = Request::get(&ctx.config.url_for(&target))?;
      let result = ctx.fetch(request).await;
      ctx.layer.settle().await;
      print_response(&result?);
    }
    Cmd::Send {
      method,
      target,
      data,
      headers,
    } => {
      ensure_installed(&ctx).await?;
      let request = build_request(&ctx.config, &method, &target, data, &headers)?;
      print_response(&ctx.fetch(request).await?);
    }
    Cmd::Sync => {
      let report = ctx.sync.run(SyncTrigger::Forced).await?;
      print_json(&report)?;
    }
    Cmd::Status => print_status(&ctx)?,
    Cmd::Run => run_console(ctx, notifications).await?,
  }

  Ok(())
}

/// One-shot commands bring up the current build if it is not active yet.
async fn ensure_installed(ctx: &Context) -> Result<()> {
  if ctx.lifecycle.active_version().as_deref() != Some(ctx.lifecycle.current_version()) {
    let report = ctx.lifecycle.install().await?;
    if !report.skipped.is_empty() {
      eprintln!("warning: {} shell assets could not be cached", report.skipped.len());
    }
  }
  Ok(())
}

fn build_request(
  config: &Config,
  method: &str,
  target: &str,
  data: Option<String>,
  headers: &[String],
) -> Result<Request> {
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  let url = Url::parse(&config.url_for(target)).map_err(|e| eyre!("Invalid url '{}': {}", target, e))?;

  let mut request = Request::new(method, url);
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Header must be NAME:VALUE, got '{}'", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(data) = data {
    request = request.with_body(data);
  }
  Ok(request)
}

#[derive(Serialize)]
struct NamespaceStatus {
  name: String,
  version: String,
  entries: usize,
  capacity: usize,
}

fn print_status(ctx: &Context) -> Result<()> {
  let storage = ctx.layer.storage();
  let namespaces = storage
    .namespaces()?
    .into_iter()
    .map(|ns| {
      Ok(NamespaceStatus {
        entries: storage.entry_count(&ns.name)?,
        name: ns.name,
        version: ns.version,
        capacity: ns.capacity,
      })
    })
    .collect::<Result<Vec<_>>>()?;

  print_json(&serde_json::json!({
    "version": ctx.lifecycle.current_version(),
    "active": ctx.lifecycle.active_version(),
    "queue": ctx.pending.stats()?,
    "namespaces": namespaces,
    "actions": ctx.pending.list()?,
  }))
}

async fn run_console(
  ctx: Context,
  mut notifications: tokio::sync::mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
  let config = Arc::clone(&ctx.config);
  let handle = Runtime::spawn(ctx);

  tokio::spawn(async move {
    while let Some(n) = notifications.recv().await {
      println!("[{:?}] {}: {}", n.kind, n.title, n.body);
    }
  });

  println!("outpost {} serving {}", config.version, config.origin);
  println!("Type 'help' for commands.");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  while let Some(line) = lines.next_line().await? {
    match commands::parse(&line) {
      Ok(ConsoleCommand::Quit) => break,
      Ok(command) => {
        if let Err(e) = execute(&handle, &config, command).await {
          eprintln!("error: {}", e);
        }
      }
      Err(message) => eprintln!("{}", message),
    }
  }

  handle.shutdown().await
}

async fn execute(handle: &RuntimeHandle, config: &Config, command: ConsoleCommand) -> Result<()> {
  match command {
    ConsoleCommand::Fetch(target) => {
      let request = Request::get(&config.url_for(&target))?;
      print_response(&handle.fetch(request).await?);
    }
    ConsoleCommand::Control(message) => print_json(&handle.control(message).await?)?,
    ConsoleCommand::Push(payload) => {
      handle.push(payload.into_bytes()).await?;
    }
    ConsoleCommand::Online => print_json(&handle.connectivity_restored().await?)?,
    ConsoleCommand::Evict => {
      let report = handle.evict().await?;
      println!(
        "Evicted {} entries across {} namespaces",
        report.entries_evicted, report.namespaces_scanned
      );
    }
    ConsoleCommand::Help => println!("{}", commands::help()),
    ConsoleCommand::Quit => {}
  }
  Ok(())
}

fn print_response(response: &Response) {
  println!(
    "{} ({})",
    response.status,
    response.source().unwrap_or("network")
  );
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", String::from_utf8_lossy(&response.body));
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let json = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", json);
  Ok(())
}
