pub mod client;
pub mod error;
pub mod libcal;
pub mod vemcount;

use std::sync::Arc;

use wstorage::config::CredentialProvider;
use wstorage::errors::{Result, StorageError};
use wstorage::fetch::RemoteSource;

pub use crate::error::FetchError;
pub use crate::libcal::{LibCalClient, LibCalConfig};
pub use crate::vemcount::{VemcountClient, VemcountConfig};

/// Builds a client for every upstream whose credentials are available.
///
/// Sources with missing credentials are skipped with a warning so one
/// unconfigured upstream does not keep the other from syncing.
pub fn configured_sources(
    credentials: &dyn CredentialProvider,
) -> Result<Vec<Arc<dyn RemoteSource>>> {
    let mut sources: Vec<Arc<dyn RemoteSource>> = Vec::new();

    match LibCalConfig::from_credentials(credentials) {
        Ok(config) => sources.push(Arc::new(LibCalClient::new(config)?)),
        Err(StorageError::Config(detail)) => log::warn!("LibCal not configured: {}", detail),
        Err(err) => return Err(err),
    }

    match VemcountConfig::from_credentials(credentials) {
        Ok(config) => sources.push(Arc::new(VemcountClient::new(config)?)),
        Err(StorageError::Config(detail)) => log::warn!("Vemcount not configured: {}", detail),
        Err(err) => return Err(err),
    }

    Ok(sources)
}
