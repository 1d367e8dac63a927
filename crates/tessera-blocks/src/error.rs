use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("material `{key}` has a color with {len} channels (expected 3 or 4)")]
    BadColor { key: String, len: usize },
    #[error("block `{name}` references unknown material `{material}`")]
    UnknownMaterial { name: String, material: String },
    #[error("block id {id} is defined twice (`{first}` and `{second}`)")]
    DuplicateId {
        id: u16,
        first: String,
        second: String,
    },
    #[error("block id 0 is reserved for air, got `{0}`")]
    ReservedAirId(String),
}
