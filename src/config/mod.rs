mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{LoggingSettings, RoomSettings, ServerSettings, Settings};

/// Prefix of environment overrides, e.g. `ROOMCAST__ROOMS__QUEUE_CAPACITY`.
pub const ENV_PREFIX: &str = "ROOMCAST";

/// Loads the configuration from `config/default` and environment variables,
/// then fills anything still missing from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
