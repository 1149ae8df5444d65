mod settings;

pub use settings::{
    save_default_mode, save_default_mode_at, CaptureConfig, Config, FetchConfig, StoreConfig,
    EXAMPLE_CONFIG,
};
