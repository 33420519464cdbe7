use serde::de::DeserializeOwned;

use crate::Result;

pub static CONFIG_FILE: &'static str = "prospekt.toml";

/// Application configuration. Defines all the aspects of the engine that are
/// to be handled on the `prospekt` level.
///
/// # Sensible defaults
///
/// Configuration provided through `Config::default()` allows for quick setup
/// with the recommended workflow. Using the *struct update syntax* one can
/// initialize a new `Config`, making a few changes right in the definition.
///
/// ```ignore
/// let cfg = Config {
///     sending: Sending {
///         pace_ms: 0,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub version: String,

    /// Domain name of the site hosting the public unsubscribe endpoint.
    /// Also used as the domain part of the `noreply` reply-to address.
    pub domain: String,

    pub database: Database,
    pub tracing: Tracing,

    pub email: Email,
    pub sending: Sending,
    pub unsubscribe: Unsubscribe,

    /// Development mode configuration.
    pub dev: DevMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "localhost".to_string(),
            database: Database::default(),
            tracing: Tracing::default(),
            email: Email::default(),
            sending: Sending::default(),
            unsubscribe: Unsubscribe::default(),
            dev: DevMode::default(),
        }
    }
}

/// Loads application config from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads application config from toml file at standard path using provided
/// name.
///
/// For example for `name` == `prospekt.toml` we will load both
/// `prospekt.toml` and `secret.prospekt.toml` from the main project
/// directory. The secret file is the place for smtp credentials and the
/// unsubscribe signing secret, and is expected to be kept out of version
/// control.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Database {
    /// Path to the sled database directory. Note that the path is relative
    /// to the current working directory.
    pub path: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: "db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Email {
    /// Address the engine sends campaign email from.
    pub address: String,

    // Smtp server and credentials.
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
}

/// Bulk sending behavior.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sending {
    /// Pause between consecutive sends within a campaign run, in
    /// milliseconds. Zero disables pacing.
    pub pace_ms: u64,
}

impl Default for Sending {
    fn default() -> Self {
        Self { pace_ms: 100 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Unsubscribe {
    /// Secret key for signing unsubscribe tokens. Keep it in the secret
    /// config file. Changing it invalidates every link sent so far.
    pub secret: String,

    /// Base url of the public unsubscribe endpoint the links point at, e.g.
    /// `https://example.com/unsubscribe`.
    pub base_url: String,
}

impl Default for Unsubscribe {
    fn default() -> Self {
        Self {
            secret: "".to_string(),
            base_url: "http://localhost:8080/unsubscribe".to_string(),
        }
    }
}

/// NOTE: make sure to disable on production.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DevMode {
    /// Regenerative mocking behavior controls whether to regenerate mocks
    /// that are already present in the database.
    pub mock_regen: bool,
}
