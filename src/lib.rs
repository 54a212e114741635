pub mod config;
pub mod error;
pub mod herd;
pub mod listing;
pub mod logging;
pub mod metrics;
pub mod ports;
pub mod proxies;
pub mod restart;
pub mod sites;
pub mod templates;
pub mod types;

pub use config::{Config, HerdPaths};
pub use error::{ErrorCategory, HerdError, Result};
pub use proxies::ProxyRegistry;
pub use sites::{ApplyReport, SiteManager};
pub use types::{DesiredSite, ProxyRecord, SiteRecord, SiteType};
