use std::io::{self, Stdout};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use series_list::config::{self, Config, Isolation};
use series_list::console::{self, Command, CommandReader, Console};
use series_list::coordinator::{Backends, Coordinator, DownloadStart, ListingSetup};
use series_list::model::{Enrichment, Entry};
use series_list::source::{CatalogSource, HttpAssetProvider, HttpDownloader, ListingBackend, http};

const VERSION: &str = env!("SERIES_LIST_VERSION");

#[derive(Parser)]
#[command(
    name = "series-list",
    version = VERSION,
    about = "Browse a paginated episode listing, filter it, and download in the background"
)]
struct Cli {
    /// Catalog file or http(s) URL
    catalog: Option<String>,

    /// Where the listing backend runs
    #[arg(long, value_enum)]
    isolation: Option<Isolation>,

    /// Directory downloads are written to
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Initial filter text
    #[arg(long)]
    filter: Option<String>,

    /// Log output file path (enables logging when specified)
    #[arg(long)]
    log: Option<PathBuf>,
}

type App = Coordinator<Console<Stdout>>;

fn main() {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        let file = match std::fs::File::create(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error: failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }
    // no --log → logger not initialized, nothing interleaves with the console

    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    cfg.merge_cli(cli.catalog, cli.isolation, cli.download_dir);
    let config = cfg.resolve();

    if let Err(e) = run(&config, cli.filter) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(config: &Config, filter: Option<String>) -> Result<()> {
    let backends = build_backends(config)?;
    let mut app = Coordinator::start(
        backends,
        Console::new(io::stdout()),
        config.runtime.shutdown_grace,
    )?;
    // The fetch process (if any) is forked by now; threads are safe to start.
    let commands = CommandReader::stdin()?;

    app.ui_mut().say(format_args!("series-list {VERSION}, ? for help"));
    match filter.as_deref() {
        Some(text) if !text.is_empty() => app.filter_changed(text),
        _ => {
            app.load_page(0);
        }
    }

    let mut input_closed = false;
    loop {
        if !input_closed {
            let drained = commands.drain();
            input_closed = drained.eof;
            let mut quit = false;
            for line in drained.lines {
                match console::parse_command(&line) {
                    Ok(Some(Command::Quit)) => {
                        quit = true;
                        break;
                    }
                    Ok(Some(command)) => execute(&mut app, command),
                    Ok(None) => {}
                    Err(msg) => app.ui_mut().say(format_args!("?? {msg}")),
                }
            }
            if quit {
                break;
            }
        }

        app.poll();

        // Piped input: keep going until everything requested has answered.
        if input_closed && app.in_flight() == 0 {
            info!("main: input closed and nothing in flight");
            break;
        }
        thread::sleep(config.runtime.poll_interval);
    }

    app.shutdown();
    Ok(())
}

fn execute(app: &mut App, command: Command) {
    match command {
        Command::Filter(text) => app.filter_changed(&text),
        Command::More => {
            app.need_more();
        }
        Command::Refresh => app.refresh(),
        Command::Download(row) => match app.ui().entry_at(row).cloned() {
            Some(id) => match app.need_download(&id) {
                DownloadStart::Started | DownloadStart::NotSent => {}
                DownloadStart::AlreadyRunning => {
                    app.ui_mut().say(format_args!("?? row {row} is already downloading"))
                }
                DownloadStart::UnknownEntry => {
                    app.ui_mut().say(format_args!("?? row {row} is no longer listed"))
                }
            },
            None => app.ui_mut().say(format_args!("?? no row {row}")),
        },
        Command::List => {
            let entries: Vec<Entry> = app.displayed().iter().cloned().collect();
            for entry in &entries {
                app.ui_mut().print_entry(entry);
            }
        }
        Command::Help => app.ui_mut().say(format_args!("{}", console::HELP)),
        Command::Quit => {}
    }
}

fn build_backends(config: &Config) -> Result<Backends> {
    let page_size = config.listing.page_size;
    let paged_filtering = config.listing.paged_filtering;
    let timeout = config.http_timeout;

    let listing = match config.isolation {
        Isolation::Thread => {
            let source = CatalogSource::open(
                &config.catalog,
                http::agent(timeout),
                page_size,
                paged_filtering,
            )
            .with_context(|| format!("failed to open catalog {}", config.catalog))?;
            ListingSetup::InProcess(Box::new(source))
        }
        Isolation::Process => {
            // Built inside the fetch process, after fork.
            let catalog = config.catalog.clone();
            ListingSetup::Forked(Box::new(move || {
                let source =
                    CatalogSource::open(&catalog, http::agent(timeout), page_size, paged_filtering)
                        .with_context(|| format!("failed to open catalog {catalog}"))?;
                Ok(Box::new(source) as Box<dyn ListingBackend>)
            }))
        }
    };

    let agent = http::agent(timeout);
    let cache = &config.enrich.cache_dir;
    Ok(Backends {
        listing,
        download: Box::new(HttpDownloader::new(agent.clone(), config.download_dir.clone())),
        poster: Box::new(HttpAssetProvider::new(
            Enrichment::Poster,
            agent.clone(),
            config.enrich.poster_url.clone(),
            cache.clone(),
        )),
        subtitle: Box::new(HttpAssetProvider::new(
            Enrichment::Subtitle,
            agent,
            config.enrich.subtitle_url.clone(),
            cache.clone(),
        )),
    })
}
