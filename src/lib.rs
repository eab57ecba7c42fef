pub mod capture;
pub mod cli;
pub mod config;
pub mod emulator;
pub mod ident;
pub mod index;
pub mod pipeline;
pub mod screen;
pub mod segment;
pub mod session;
pub mod stage;

/// Initialize tracing with a default filter if `RUST_LOG` is unset.
pub fn init_tracing() {
    let default_filter = "ttyscribe=info";
    let filter_layer = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .compact()
        .init();
}
