//! cachette server binary

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use cachette::commands::journal::{JOURNAL_QUEUE_CAPACITY, JournalTask, attach_hook, restore};
use cachette::commands::registry::RegistryOptions;
use cachette::commands::{Dispatcher, build_registry, start_queue};
use cachette::journal::FileJournal;
use cachette::server::{HttpServer, HttpState, TelnetServer};
use cachette::session::Session;
use cachette::store::Storage;

#[derive(Parser)]
#[command(name = "cachette", version, about = "In-memory key-value cache server")]
struct Args {
    /// Journal file for the cache; empty disables journaling
    #[arg(long, default_value = "")]
    journal: String,

    /// Address to serve the binary TCP protocol on
    #[arg(long, default_value = "0.0.0.0:1234")]
    telnet: String,

    /// Address to serve HTTP on; empty disables
    #[arg(long, default_value = "")]
    http: String,

    /// Password for cache auth; empty disables authentication
    #[arg(long, default_value = "")]
    pass: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cachette=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let storage = Arc::new(Storage::new());
    let registry = match build_registry(&RegistryOptions {
        password: args.pass.clone(),
    }) {
        Ok(registry) => registry,
        Err(e) => {
            error!("cannot build command registry: {}", e);
            return;
        }
    };
    let mut dispatcher = Dispatcher::new(registry);

    let (quit_tx, quit_rx) = watch::channel(false);

    // journal: replay fully, then hook new mutations into the consumer
    let mut journal_consumer = None;
    if !args.journal.is_empty() {
        info!("initializing journal file: {}", args.journal);
        let mut journal = match FileJournal::open(&args.journal) {
            Ok(journal) => journal,
            Err(e) => {
                error!("cannot init journal: {}", e);
                return;
            }
        };

        let replay_session = Session::privileged(storage.clone());
        match restore(&mut journal, &dispatcher, &replay_session) {
            Ok(restored) => info!("journal replayed: {} commands", restored),
            Err(e) => {
                error!("cannot restore journal: {}", e);
                return;
            }
        }

        let (tx, rx) = mpsc::channel(JOURNAL_QUEUE_CAPACITY);
        attach_hook(&mut dispatcher, tx);
        journal_consumer = Some(JournalTask::new(journal, rx));
    }

    let dispatcher = Arc::new(dispatcher);

    if let Some(task) = journal_consumer {
        tokio::spawn(task.run(quit_rx.clone()));
    }

    let queue = start_queue(dispatcher.clone(), quit_rx.clone());

    let telnet = match TelnetServer::bind(&args.telnet, queue, storage.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("cannot listen on {}: {}", args.telnet, e);
            return;
        }
    };
    info!("serving telnet at: {}", args.telnet);
    tokio::spawn(telnet.serve(quit_rx.clone()));

    if !args.http.is_empty() {
        let state = Arc::new(HttpState::new(dispatcher.clone(), storage.clone()));
        let http = match HttpServer::bind(&args.http, state).await {
            Ok(server) => server,
            Err(e) => {
                error!("cannot listen on {}: {}", args.http, e);
                return;
            }
        };
        info!("serving http at: {}", args.http);
        let quit = quit_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = http.serve(quit).await {
                error!("http server failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    let _ = quit_tx.send(true);
    // let connections, the dispatch queue and the journal consumer drain
    tokio::time::sleep(Duration::from_millis(200)).await;
}
