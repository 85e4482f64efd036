use crate::catalog_service::{authorized_scenario, expiry_after};
use crate::catalog_store::{CatalogStore, DownloadHistoryEntry};
use crate::config::{CdnConfig, StorageLayout};
use crate::data_division::DataDivision;
use crate::error::CatalogResult;
use crate::url_signer::UrlSigner;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a download request. Unauthorized, absent and unknown-division
/// requests produce an empty result rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadResult {
    pub download_url: Option<String>,
}

impl DownloadResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Issues signed archive downloads and records them
pub struct DownloadService {
    store: Arc<dyn CatalogStore>,
    signer: Arc<dyn UrlSigner>,
    layout: Arc<StorageLayout>,
    cdn: CdnConfig,
}

impl DownloadService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        signer: Arc<dyn UrlSigner>,
        layout: Arc<StorageLayout>,
        cdn: CdnConfig,
    ) -> Self {
        Self {
            store,
            signer,
            layout,
            cdn,
        }
    }

    /// Sign the archive of one data division and append a history entry.
    ///
    /// The URL is signed before history is written; a failed history write
    /// is logged and the URL is still returned.
    #[instrument(skip(self), fields(uuid = %uuid, division = %division_code, user_id = %user_id))]
    pub async fn download(
        &self,
        uuid: &str,
        division_code: &str,
        user_id: &str,
    ) -> CatalogResult<DownloadResult> {
        metrics::counter!("catalog.download.requests").increment(1);

        if authorized_scenario(self.store.as_ref(), uuid, user_id)
            .await?
            .is_none()
        {
            debug!("Scenario absent or not authorized");
            return Ok(DownloadResult::empty());
        }

        let Some(division) = DataDivision::from_code(division_code) else {
            warn!(division = %division_code, "Unknown data division requested");
            return Ok(DownloadResult::empty());
        };

        let resource = download_resource(&self.cdn.distribution_domain, &self.layout, uuid, division);
        let expires_at = expiry_after(self.cdn.download_expiry())?;
        let url = self.signer.sign(&resource, expires_at).await?;

        let entry = DownloadHistoryEntry {
            uuid: uuid.to_string(),
            user_id: user_id.to_string(),
            division,
            recorded_at: Utc::now(),
        };

        match self.store.append_download_history(&entry).await {
            Ok(()) => info!(
                uuid = %entry.uuid,
                user_id = %entry.user_id,
                division = %entry.division,
                "Download history recorded"
            ),
            Err(e) => error!(error = %e, code = e.code(), "Failed to record download history"),
        }

        Ok(DownloadResult {
            download_url: Some(url),
        })
    }
}

/// CDN URL of a division's archive:
/// `{domain}{prefix}{uuid}{content path}/{uuid}{suffix}`
pub fn download_resource(
    distribution_domain: &str,
    layout: &StorageLayout,
    uuid: &str,
    division: DataDivision,
) -> String {
    format!(
        "{domain}{prefix}{uuid}{content_path}/{uuid}{suffix}",
        domain = distribution_domain,
        prefix = layout.prefix_path,
        content_path = layout.content_path_for(division),
        suffix = layout.suffix_for(division),
    )
}
