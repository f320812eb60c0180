//! CLI entry point: parses arguments, loads configuration, wires up the
//! Metadata Index, Cache Manager, Object-Store Adapter, Worker Pool, Job
//! Executor and Operation Engine, then mounts the filesystem. Grounded on
//! the teacher's `client/src/main.rs`, generalized to use the modular
//! `FsWrapper` (the teacher's own `main.rs` still called the legacy
//! monolithic filesystem, which this crate does not carry forward) and
//! extended with `clap` argument parsing and optional daemonization, per
//! the ambient stack this crate's CLI needs that the teacher's simple
//! two-process client/server split never did.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use bucketfs::cache::CacheManager;
use bucketfs::config::Config;
use bucketfs::engine::Engine;
use bucketfs::fs::FsWrapper;
use bucketfs::index::Index;
use bucketfs::job_executor::JobExecutor;
use bucketfs::object_store::http::HttpObjectStore;
use bucketfs::object_store::ObjectStore;

#[derive(Parser, Debug)]
#[command(name = "bucketfs-mount", version, about = "Mount a remote object store as a local FUSE filesystem")]
struct Args {
    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Path to a TOML configuration file.
    #[arg(short, long, default_value = "/etc/bucketfs/mount.toml")]
    config: PathBuf,

    /// Stay attached to the terminal instead of daemonizing.
    #[arg(long)]
    foreground: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = Config::load(&args.config);
    config.mount_dir = args.mountpoint.clone();

    if !args.foreground {
        let daemon = daemonize::Daemonize::new().working_directory(".");
        if let Err(e) = daemon.start() {
            tracing::error!(error = %e, "failed to daemonize, continuing in foreground");
        }
    }

    if let Err(e) = std::fs::create_dir_all(&config.cache_dir) {
        tracing::error!(path = %config.cache_dir.display(), error = %e, "failed to create cache directory");
        std::process::exit(1);
    }

    let store: Arc<dyn ObjectStore> = match HttpObjectStore::authenticate(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to authenticate against object store");
            std::process::exit(1);
        }
    };

    let index_path = config.cache_dir.join("index.json");
    let index = match Index::load_from_disk(index_path) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load persisted index, starting empty");
            Arc::new(Index::new(None))
        }
    };

    if config.metadata_collection == bucketfs::config::MetadataCollection::Prefetch {
        prefetch_index(&store, &index);
    }

    let cache = Arc::new(CacheManager::new(config.cache_dir.clone()));
    let pool = Arc::new(bucketfs::worker::Pool::new(store.clone(), config.worker_pool_size));
    let job_executor = Arc::new(JobExecutor::new(
        index.clone(),
        config.max_upload_attempts.max(config.max_download_attempts),
        Duration::from_millis(config.read_wait_poll_interval_ms),
    ));
    job_executor.start();

    let engine = Arc::new(Engine::new(
        index.clone(),
        cache,
        store,
        pool,
        job_executor.clone(),
        config.clone(),
    ));

    let fs = FsWrapper::new(engine);

    tracing::info!(mountpoint = %config.mount_dir.display(), "mounting");
    let options = vec![fuser::MountOption::FSName("bucketfs".to_string())];
    if let Err(e) = fuser::mount2(fs, &config.mount_dir, &options) {
        tracing::error!(error = %e, "mount failed");
        std::process::exit(1);
    }

    job_executor.shutdown();
    if let Err(e) = index.persist_to_disk() {
        tracing::warn!(error = %e, "failed to persist index on shutdown");
    }
}

/// Eagerly populates the index from the full object listing at startup,
/// for `metadata_collection = prefetch` mounts. Grounded on the original's
/// Moodle-specific prefetch path in `file_system_cache_init.py`, minus its
/// two-level hex-bucket cache-directory pre-creation, which was specific
/// to that deployment and is not carried forward here.
fn prefetch_index(store: &Arc<dyn ObjectStore>, index: &Arc<Index>) {
    match store.list() {
        Ok(objects) => {
            index.table_reset();
            for obj in objects {
                if let Some(node) = bucketfs::fsnode::FsNode::from_remote_headers(&obj.name, &obj.headers) {
                    index.upsert(node);
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "prefetch listing failed, starting with empty index"),
    }
}
