mod apps;
mod base;
mod metadata;
mod shares;

pub use apps::JsonFileApps;
pub use base::{get_app_registry, get_metadata_provider, get_share_registry};
pub use base::{AppRegistry, MetadataProvider, ShareRegistry};
pub use metadata::NoMetadata;
pub use shares::DirShares;
