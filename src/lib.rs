pub mod asset;
pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod time;

pub use asset::{AssetCache, Assets, Handle};
pub use error::RenderError;
pub use renderer::{Pmrem, PmremGenerator, RenderTarget, Renderer};
pub use scene::{Camera, Scene};
pub use settings::RendererSettings;

#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::warn!("Logger was already initialized");
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
