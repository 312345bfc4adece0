use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sheep_counter_client::{
    config::AppConfig,
    services::{
        api::{HttpJobApi, JobApi},
        upload::UploadFile,
    },
    view::{
        render::{render, render_recent},
        JobView, ViewOptions,
    },
};

#[derive(Parser)]
#[command(name = "sheep-counter", version, about = "Count the sheep in an image")]
struct Cli {
    /// Backend base URL (overrides API_BASE_URL)
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload an image and follow the new job until it finishes
    Submit { path: PathBuf },
    /// Show a job (or the upload prompt) with recent jobs, polling until done
    Show {
        id: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u64,
    },
    /// List one page of recent jobs
    Jobs {
        #[arg(long, default_value_t = 1)]
        page: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment
    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = cli.api_base_url {
        config.api_base_url = url;
    }

    init_logging(&config);

    let api = match HttpJobApi::new(&config.api_base_url, config.request_timeout()) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize job service client");
            return ExitCode::FAILURE;
        }
    };
    let base_url = api.base_url().to_string();

    let mut view = JobView::new(
        api as Arc<dyn JobApi>,
        ViewOptions {
            poll_interval: config.poll_interval(),
            page_size: config.page_size,
        },
    );

    match cli.command {
        Command::Submit { path } => {
            let file = match UploadFile::from_path(&path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            view.mount(None).await;
            match view.upload(file).await {
                Ok(id) => println!("Created job {id}\n"),
                Err(e) => {
                    eprintln!("Upload failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
            follow(&view, &base_url).await;
        }
        Command::Show { id, page } => {
            view.mount_at(id, page).await;
            follow(&view, &base_url).await;
        }
        Command::Jobs { page } => {
            view.mount_at(None, page).await;
            print!("{}", render_recent(&view.snapshot()));
        }
    }

    view.unmount();
    ExitCode::SUCCESS
}

/// Print the view every time it changes until nothing more will happen.
async fn follow(view: &JobView, base_url: &str) {
    let mut rx = view.subscribe();
    let mut last = String::new();
    loop {
        let (screen, settled) = {
            let snapshot = rx.borrow_and_update();
            (render(&snapshot, base_url), snapshot.is_settled())
        };
        if screen != last {
            println!("{screen}");
            last = screen;
        }
        if settled || rx.changed().await.is_err() {
            break;
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
