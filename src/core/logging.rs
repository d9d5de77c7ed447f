//! Logging initialization and utilities

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable. Calling it more than once
/// is harmless; later calls keep the first logger.
///
/// # Example
/// ```
/// voxmesh::core::logging::init();
/// log::info!("Mesher started");
/// ```
pub fn init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
