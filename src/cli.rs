use clap::{Parser, Subcommand};

use crate::config::{BackendKind, Config, DEFAULT_CONCURRENT_EXTENSIONS, DEFAULT_REINDEX_CONCURRENCY, VERSION};

/// Top-level flags configure the collaborators (backend, cache, gallery);
/// the subcommand picks what to do with them.
#[derive(Parser)]
#[command(version = VERSION, about = "Self-hosted mirror and wire-compatible gallery for a code-editor extension marketplace")]
pub struct Cli {
    /// Which object backend to use
    #[arg(long, value_enum, default_value = "fs", env = "MIRROR_BACKEND")]
    pub backend: BackendKind,

    /// Filesystem backend root directory
    #[arg(long, default_value = "./data", env = "MIRROR_FS_ROOT")]
    pub fs_root: String,

    /// SQLite cache file path (":memory:" for an ephemeral cache)
    #[arg(long, default_value = "./cache.sqlite3", env = "MIRROR_CACHE_PATH")]
    pub cache_path: String,

    /// S3-compatible endpoint URL, for non-AWS object storage
    #[arg(long, env = "MIRROR_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 bucket name
    #[arg(long, env = "MIRROR_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Path to an AWS shared credentials file
    #[arg(long, env = "MIRROR_S3_CREDENTIALS_FILE")]
    pub s3_credentials_file: Option<String>,

    /// Named profile within the credentials file
    #[arg(long, env = "MIRROR_S3_CREDENTIALS_PROFILE")]
    pub s3_credentials_profile: Option<String>,

    /// Key prefix under which all objects are stored
    #[arg(long, default_value = "", env = "MIRROR_S3_KEY_PREFIX")]
    pub s3_key_prefix: String,

    /// Write a zero-byte delta marker alongside every S3 write
    #[arg(long, default_value_t = false, env = "MIRROR_S3_DELTA_MARKERS")]
    pub s3_delta_markers: bool,

    /// Address the gallery HTTP server binds to
    #[arg(long, default_value = "127.0.0.1:7777", env = "MIRROR_LISTEN_ADDR")]
    pub gallery_listen_addr: String,

    /// Base URL editor clients use to reach this mirror, for asset rewriting
    #[arg(long, default_value = "http://127.0.0.1:7777", env = "MIRROR_EXTERNAL_URL")]
    pub external_url: String,

    /// Target platform assumed when a command doesn't specify one
    #[arg(long, env = "MIRROR_DEFAULT_PLATFORM")]
    pub default_platform: Option<String>,

    /// Extensions acquired concurrently by add/update/reindex
    #[arg(long, default_value_t = DEFAULT_CONCURRENT_EXTENSIONS, env = "MIRROR_CONCURRENCY")]
    pub concurrent_extensions: usize,

    #[arg(long, default_value_t = DEFAULT_REINDEX_CONCURRENCY, env = "MIRROR_REINDEX_CONCURRENCY")]
    pub reindex_concurrency: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Acquire an extension (and, for packs, everything it bundles)
    Add {
        uid: String,
        #[arg(long = "target-platform")]
        target_platforms: Vec<String>,
        #[arg(long)]
        pre_release: bool,
        #[arg(long)]
        force: bool,
    },
    /// Re-acquire already-tracked extensions, picking up new versions
    Update {
        /// Limit to one uid; omit to refresh everything tracked
        uid: Option<String>,
        #[arg(long = "target-platform")]
        target_platforms: Vec<String>,
        #[arg(long)]
        pre_release: bool,
    },
    /// Remove an extension, a version, or a platform variant
    Remove { tag: String },
    /// List tracked extensions, optionally filtered by a uid prefix
    List { prefix: Option<String> },
    /// Full-text search the cache
    Search {
        text: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one extension's cached metadata
    Info { uid: String },
    /// List the version/platform pairs tracked for one extension
    Versions { uid: String },
    /// Run the gallery HTTP server
    Serve,
    /// Rebuild the cache from the backend
    Reindex,
    /// Remove backend/cache entries that fail the valid-version invariant
    Prune,
}

impl Cli {
    pub fn to_config(&self) -> Config {
        Config {
            backend_kind: self.backend,
            fs_root: self.fs_root.clone(),
            cache_path: self.cache_path.clone(),
            s3_endpoint: self.s3_endpoint.clone(),
            s3_bucket: self.s3_bucket.clone(),
            s3_credentials_file: self.s3_credentials_file.clone(),
            s3_credentials_profile: self.s3_credentials_profile.clone(),
            s3_key_prefix: self.s3_key_prefix.clone(),
            s3_delta_markers: self.s3_delta_markers,
            gallery_listen_addr: self.gallery_listen_addr.clone(),
            external_url: self.external_url.clone(),
            default_platform: self.default_platform.clone(),
            concurrent_extensions: self.concurrent_extensions,
            reindex_concurrency: self.reindex_concurrency,
        }
    }
}
