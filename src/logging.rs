/// Initializes `env_logger`, deferring entirely to `RUST_LOG` for level and
/// per-target filtering (the subsystems log under their module path, e.g.
/// `gallery_mirror::pipeline`, so `RUST_LOG=gallery_mirror::pipeline=debug`
/// narrows to one subsystem instead of toggling everything at once).
pub fn init() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_env(env_logger::Env::default())
        .init();
}
