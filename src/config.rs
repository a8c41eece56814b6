/// Upstream marketplace endpoints and wire constants.
pub const UPSTREAM_QUERY_URL: &str =
    "https://marketplace.visualstudio.com/_apis/public/gallery/extensionquery";
pub const UPSTREAM_GALLERY_HOST: &str = "marketplace.visualstudio.com";
pub const MARKETPLACE_API_VERSION: &str = "3.0-preview.1";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const USER_AGENT: &str = concat!("oss-gallery-mirror/", env!("CARGO_PKG_VERSION"));

/// Default number of in-flight extensions the acquisition pipeline allows
/// concurrently.
pub const DEFAULT_CONCURRENT_EXTENSIONS: usize = 5;

/// Default bounded parallelism for a full-store reindex.
pub const DEFAULT_REINDEX_CONCURRENCY: usize = 20;

/// Reserved metadata filenames under the filesystem/object-storage key
/// layout. Asset type key segments must never collide with these.
pub const EXTENSION_METADATA_FILE: &str = "_ext_metadata.json";
pub const VERSION_METADATA_FILE: &str = "_ver_metadata.json";

/// Legacy reserved names carried for compatibility; never written by this
/// implementation (see DESIGN.md's Open Question decisions).
pub const LEGACY_EXTENSION_METADATA_FILE: &str = "_vsix_db_extension_metadata.json";
pub const LEGACY_VERSION_METADATA_FILE: &str = "_vsix_db_version_metadata.json";

/// Which object backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Fs,
    S3,
}

/// Everything the core collaborators (Backend, Cache, UpstreamClient,
/// pipeline, gallery server) need, assembled once by the composition root
/// (`main.rs`) and passed in — no singletons, no process-level caches.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_kind: BackendKind,
    pub fs_root: String,
    pub cache_path: String,
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_credentials_file: Option<String>,
    pub s3_credentials_profile: Option<String>,
    pub s3_key_prefix: String,
    pub s3_delta_markers: bool,
    pub gallery_listen_addr: String,
    pub external_url: String,
    pub default_platform: Option<String>,
    pub concurrent_extensions: usize,
    pub reindex_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_kind: BackendKind::Fs,
            fs_root: "./data".to_string(),
            cache_path: "./cache.sqlite3".to_string(),
            s3_endpoint: None,
            s3_bucket: None,
            s3_credentials_file: None,
            s3_credentials_profile: None,
            s3_key_prefix: String::new(),
            s3_delta_markers: false,
            gallery_listen_addr: "127.0.0.1:7777".to_string(),
            external_url: "http://127.0.0.1:7777".to_string(),
            default_platform: None,
            concurrent_extensions: DEFAULT_CONCURRENT_EXTENSIONS,
            reindex_concurrency: DEFAULT_REINDEX_CONCURRENCY,
        }
    }
}
