use std::sync::Arc;

use colored::{Color, Colorize};
use log::{error, info, warn};
use thiserror::Error;
use tokio::runtime::{self, Runtime};
use wewatch_collab::{
    ArcedDatabase, Collab, Config, ConfigError, DatabaseError, LocalFileStore, MemoryDatabase,
    PgDatabase, SystemClock,
};

mod logging;

pub struct WeWatch {
    collab: Arc<Collab>,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum WeWatchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),

    #[error("Could not prepare the upload directory: {0}")]
    Uploads(std::io::Error),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl WeWatch {
    fn new() -> Result<Self, WeWatchError> {
        let config = Config::from_env()?;

        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("wewatch-async")
            .build()
            .map_err(|e| WeWatchError::Fatal(e.to_string()))?;

        let database: ArcedDatabase = if config.use_memory_store {
            warn!("Using the in-memory store, nothing will survive a restart");
            Arc::new(MemoryDatabase::new())
        } else {
            info!("Connecting to database...");
            let database = runtime.block_on(PgDatabase::new(&config.database.url()))?;
            runtime.block_on(database.migrate())?;

            Arc::new(database)
        };

        std::fs::create_dir_all(&config.upload_dir).map_err(WeWatchError::Uploads)?;
        let files = Arc::new(LocalFileStore::new(config.upload_dir.clone()));

        let collab = Collab::new(config, database, files, Arc::new(SystemClock));

        Ok(Self {
            collab: Arc::new(collab),
            runtime,
        })
    }

    fn run(&self) -> Result<(), WeWatchError> {
        self.runtime.block_on(async move {
            self.collab.reaper().spawn();

            wewatch_server::run_server(self.collab.clone())
                .await
                .map_err(|e| WeWatchError::Fatal(e.to_string()))
        })
    }
}

impl WeWatchError {
    fn hint(&self) -> String {
        match self {
            WeWatchError::Config(_) => "Check the environment variables or the .env file. JWT_SECRET is always required, and the LIVEKIT_* variables must be set together.".to_string(),
            WeWatchError::Database(_) => "This is a database error. Make sure Postgres is running and the DB_* variables point to it, or set WEWATCH_STORE=memory.".to_string(),
            WeWatchError::Uploads(_) => "Make sure UPLOAD_DIR points to a writable directory.".to_string(),
            WeWatchError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn report(error: WeWatchError) {
    error!(
        "{} Read the error below to troubleshoot the issue.",
        "wewatch failed!".bold().color(Color::Red)
    );
    error!("{}", error);
    error!(
        "{}",
        format!("Hint: {}", error.hint())
            .color(Color::BrightBlack)
            .italic()
    );
}

fn main() {
    logging::init_logger();

    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let result = WeWatch::new().and_then(|wewatch| {
        info!("Initialized successfully.");
        wewatch.run()
    });

    if let Err(error) = result {
        report(error);
        std::process::exit(1);
    }
}
