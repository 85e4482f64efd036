use crate::catalog_store::{
    CatalogStore, Location, NearMissCode, ScenarioFilter, ScenarioRow, Section,
};
use crate::config::{CdnConfig, StorageLayout};
use crate::data_division::{classify, format_size, DataDivision};
use crate::error::{CatalogError, CatalogResult};
use crate::object_locator::{file_name, find_archives, find_single_key, ObjectLocator};
use crate::url_signer::UrlSigner;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Search conditions and paging as received from the caller
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub near_miss_types: Vec<String>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub created_on: Option<NaiveDate>,
    pub section_id: Option<String>,
    pub location_id: Option<String>,
}

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 1000;

impl SearchRequest {
    /// Rows to skip before the requested page
    pub fn skip(&self) -> CatalogResult<i64> {
        i64::from(self.page.saturating_sub(1))
            .checked_mul(i64::from(self.page_size))
            .ok_or_else(|| {
                CatalogError::Validation("requestPage is beyond the last possible page".to_string())
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSummary {
    pub uuid: String,
    pub near_miss_types: Vec<String>,
    pub thumbnail_url: String,
    pub section_name: String,
    pub location_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub total: i64,
    pub scenarios: Vec<ScenarioSummary>,
}

/// Archive attached to a scenario
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub name: String,
    /// `None` when the name matches no configured suffix
    pub division: Option<DataDivision>,
    /// Human-readable size, e.g. `12.50KB`
    pub size: String,
}

#[derive(Debug, Clone)]
pub struct ScenarioDetail {
    pub scenario: ScenarioRow,
    pub near_miss_types: Vec<String>,
    pub video_url: String,
    pub thumbnail_url: String,
    /// Sorted by division
    pub scenario_data: Vec<DataFile>,
    /// In listing order
    pub ml_data: Vec<DataFile>,
}

/// Choices for the search form
#[derive(Debug, Clone, PartialEq)]
pub struct CodeList {
    pub near_miss_types: Vec<NearMissCode>,
    pub sections: Vec<Section>,
}

/// Search, detail and search-form lookups over the catalog
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    locator: ObjectLocator,
    signer: Arc<dyn UrlSigner>,
    layout: Arc<StorageLayout>,
    cdn: CdnConfig,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        locator: ObjectLocator,
        signer: Arc<dyn UrlSigner>,
        layout: Arc<StorageLayout>,
        cdn: CdnConfig,
    ) -> Self {
        Self {
            store,
            locator,
            signer,
            layout,
            cdn,
        }
    }

    /// One page of scenarios matching the request, each with a signed
    /// thumbnail URL, plus the total number of matches.
    #[instrument(skip(self, request), fields(user_id = %user_id, page = request.page, page_size = request.page_size))]
    pub async fn search(&self, request: &SearchRequest, user_id: &str) -> CatalogResult<SearchResult> {
        metrics::counter!("catalog.search.requests").increment(1);

        if request.page == 0 || request.page_size == 0 {
            return Err(CatalogError::Validation(
                "requestPage and itemsPerPage must be at least 1".to_string(),
            ));
        }
        if request.page_size > MAX_PAGE_SIZE {
            return Err(CatalogError::Validation(format!(
                "itemsPerPage must not exceed {MAX_PAGE_SIZE}"
            )));
        }

        let skip = request.skip()?;

        let filter = ScenarioFilter {
            user_id: user_id.to_string(),
            near_miss_types: request.near_miss_types.clone(),
            created_on: request.created_on,
            section_id: request.section_id.clone(),
            location_id: request.location_id.clone(),
        };

        let rows = self
            .store
            .scenario_page(&filter, skip, i64::from(request.page_size))
            .await?;

        let mut scenarios = Vec::with_capacity(rows.len());
        for row in rows {
            let thumbnail_key = self
                .locator
                .find_key(&self.layout.media_prefix(&row.uuid), &self.layout.thumbnail_suffix)
                .await?;
            let thumbnail_url = self
                .sign_media(&thumbnail_key, self.cdn.media_expiry())
                .await?;

            scenarios.push(ScenarioSummary {
                near_miss_types: row.near_miss_types(),
                thumbnail_url,
                uuid: row.uuid,
                section_name: row.section_name,
                location_name: row.location_name,
            });
        }

        let total = self.store.scenario_count(&filter).await?;

        debug!(total, returned = scenarios.len(), "Search completed");
        Ok(SearchResult { total, scenarios })
    }

    /// Scenario detail with signed media URLs and the archives the caller
    /// may download. Absent and unauthorized scenarios look the same.
    #[instrument(skip(self), fields(uuid = %uuid, user_id = %user_id))]
    pub async fn detail(&self, uuid: &str, user_id: &str) -> CatalogResult<ScenarioDetail> {
        metrics::counter!("catalog.detail.requests").increment(1);

        let scenario = authorized_scenario(self.store.as_ref(), uuid, user_id)
            .await?
            .ok_or(CatalogError::NotAuthorizedOrNotFound)?;

        let media = self
            .locator
            .list_objects(&self.layout.media_prefix(&scenario.uuid))
            .await?;
        let video_key = find_single_key(&media, &self.layout.video_suffix)?;
        let thumbnail_key = find_single_key(&media, &self.layout.thumbnail_suffix)?;
        let video_url = self.sign_media(video_key, self.cdn.media_expiry()).await?;
        let thumbnail_url = self.sign_media(thumbnail_key, self.cdn.media_expiry()).await?;

        let flags = self.store.download_flags(user_id).await?.unwrap_or_default();

        let mut scenario_data = Vec::new();
        if flags.is_scenario_allowed() {
            scenario_data = self
                .data_files(&self.layout.scenario_prefix(&scenario.uuid))
                .await?;
            scenario_data.sort_by_key(|file| file.division);
        }

        let mut ml_data = Vec::new();
        if flags.is_ml_allowed() {
            ml_data = self.data_files(&self.layout.ml_prefix(&scenario.uuid)).await?;
        }

        Ok(ScenarioDetail {
            near_miss_types: scenario.near_miss_types(),
            scenario,
            video_url,
            thumbnail_url,
            scenario_data,
            ml_data,
        })
    }

    /// Near-miss types and the caller's sections for the search form
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn code_list(&self, user_id: &str) -> CatalogResult<CodeList> {
        let mut near_miss_types = self.store.near_miss_codes().await?;
        if near_miss_types.is_empty() {
            return Err(CatalogError::MissingRequiredData("near-miss type"));
        }
        near_miss_types.sort_by(|a, b| a.code.cmp(&b.code));

        let sections = self.store.sections_for_user(user_id).await?;
        if sections.is_empty() {
            return Err(CatalogError::MissingRequiredData("section"));
        }

        Ok(CodeList {
            near_miss_types,
            sections,
        })
    }

    /// Locations of a section visible to the caller
    #[instrument(skip(self), fields(section_id = %section_id, user_id = %user_id))]
    pub async fn location_list(
        &self,
        section_id: &str,
        user_id: &str,
    ) -> CatalogResult<Vec<Location>> {
        let locations = self.store.locations_for_section(section_id, user_id).await?;
        if locations.is_empty() {
            return Err(CatalogError::MissingLocations);
        }
        Ok(locations)
    }

    async fn sign_media(&self, key: &str, window: Duration) -> CatalogResult<String> {
        let resource = format!("{}{}", self.cdn.distribution_domain, key);
        let url = self.signer.sign(&resource, expiry_after(window)?).await?;
        Ok(url)
    }

    async fn data_files(&self, prefix: &str) -> CatalogResult<Vec<DataFile>> {
        let objects = self.locator.list_objects(prefix).await?;

        Ok(find_archives(&objects, &self.layout.archive_suffix)
            .into_iter()
            .map(|obj| {
                let name = file_name(&obj.key);
                DataFile {
                    division: classify(name, &self.layout),
                    name: name.to_string(),
                    size: format_size(obj.size),
                }
            })
            .collect())
    }
}

/// The scenario if it exists and its section is searchable by the user
pub async fn authorized_scenario(
    store: &dyn CatalogStore,
    uuid: &str,
    user_id: &str,
) -> CatalogResult<Option<ScenarioRow>> {
    let sections = store.authorized_sections(user_id).await?;
    if sections.is_empty() {
        debug!("User has no searchable sections");
        return Ok(None);
    }

    let scenario = store.scenario_by_id(uuid).await?;
    Ok(scenario.filter(|s| sections.contains(&s.section_id)))
}

/// Instant `window` from now
pub(crate) fn expiry_after(window: Duration) -> CatalogResult<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_add_signed(w))
        .ok_or_else(|| CatalogError::Internal("Expiry window out of range".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog_store::{DownloadFlags, MockCatalogStore};
    use crate::object_locator::{MockObjectStore, ObjectPage, StorageObject};
    use crate::url_signer::{MockUrlSigner, SigningError};
    use chrono::TimeZone;
    use mockall::predicate::*;

    pub(crate) const USER: &str = "analyst@example.com";
    pub(crate) const UUID: &str = "4f1c7a52-0b4e-4a3c-9d0e-2b6f3c1d9e10";

    pub(crate) fn cdn_config() -> CdnConfig {
        CdnConfig {
            distribution_domain: "https://cdn.example.com/".to_string(),
            key_pair_id: "KID".to_string(),
            private_key_path: "/unused.pem".to_string(),
            download_expiry_hours: 1,
            media_expiry_minutes: 60,
        }
    }

    pub(crate) fn scenario_row(uuid: &str, section_id: &str) -> ScenarioRow {
        ScenarioRow {
            id: 1,
            uuid: uuid.to_string(),
            section_id: section_id.to_string(),
            section_name: "Tomei Expressway".to_string(),
            location_name: "Yokohama IC".to_string(),
            nearmiss_type: Some("101,102".to_string()),
            latitude: 35.5,
            longitude: 139.6,
            scenario_create_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    pub(crate) fn objects<K: AsRef<str>>(keys: &[(K, u64)]) -> Vec<StorageObject> {
        keys.iter()
            .map(|(key, size)| StorageObject {
                key: key.as_ref().to_string(),
                size: *size,
            })
            .collect()
    }

    /// Object store answering each prefix with a fixed single page
    pub(crate) fn object_store(listings: Vec<(String, Vec<StorageObject>)>) -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_list_page().returning(move |_, prefix, _| {
            let objects = listings
                .iter()
                .find(|(p, _)| p == prefix)
                .map(|(_, objects)| objects.clone())
                .unwrap_or_default();
            Ok(ObjectPage {
                objects,
                next_continuation: None,
            })
        });
        store
    }

    pub(crate) fn media_listing(uuid: &str) -> (String, Vec<StorageObject>) {
        let prefix = format!("scenario/{uuid}/format");
        let media = objects(&[
            (format!("{prefix}/{uuid}.mp4"), 1000),
            (format!("{prefix}/{uuid}.jpeg"), 100),
        ]);
        (prefix, media)
    }

    pub(crate) fn echo_signer() -> MockUrlSigner {
        let mut signer = MockUrlSigner::new();
        signer
            .expect_sign()
            .returning(|url, _| Ok(format!("{url}?signed")));
        signer
    }

    fn service(store: MockCatalogStore, objects: MockObjectStore, signer: MockUrlSigner) -> CatalogService {
        CatalogService::new(
            Arc::new(store),
            ObjectLocator::new(Arc::new(objects), "scenarios"),
            Arc::new(signer),
            Arc::new(StorageLayout::default()),
            cdn_config(),
        )
    }

    fn flags(scenario: &str, ml: &str) -> DownloadFlags {
        DownloadFlags {
            scenario_possibility_flag: scenario.to_string(),
            ml_possibility_flag: ml.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_queries_page_window() {
        let mut store = MockCatalogStore::new();
        store
            .expect_scenario_page()
            .withf(|filter, skip, limit| filter.user_id == USER && *skip == 10 && *limit == 10)
            .times(1)
            .returning(|_, _, _| Ok(vec![scenario_row(UUID, "S01")]));
        store.expect_scenario_count().times(1).returning(|_| Ok(11));

        let svc = service(store, object_store(vec![media_listing(UUID)]), echo_signer());
        let request = SearchRequest {
            page: 2,
            page_size: 10,
            ..Default::default()
        };

        let result = svc.search(&request, USER).await.unwrap();

        assert_eq!(result.total, 11);
        assert_eq!(result.scenarios.len(), 1);
        let summary = &result.scenarios[0];
        assert_eq!(summary.near_miss_types, vec!["101", "102"]);
        assert_eq!(
            summary.thumbnail_url,
            format!("https://cdn.example.com/scenario/{UUID}/format/{UUID}.jpeg?signed")
        );
    }

    #[tokio::test]
    async fn test_search_empty_result_is_not_an_error() {
        let mut store = MockCatalogStore::new();
        store.expect_scenario_page().returning(|_, _, _| Ok(vec![]));
        store.expect_scenario_count().returning(|_| Ok(0));
        let mut signer = MockUrlSigner::new();
        signer.expect_sign().never();

        let svc = service(store, MockObjectStore::new(), signer);
        let request = SearchRequest {
            page: 1,
            page_size: 20,
            ..Default::default()
        };

        let result = svc.search(&request, USER).await.unwrap();
        assert_eq!(result.total, 0);
        assert!(result.scenarios.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_page_zero() {
        let mut store = MockCatalogStore::new();
        store.expect_scenario_page().never();

        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());
        let request = SearchRequest {
            page: 0,
            page_size: 10,
            ..Default::default()
        };

        let err = svc.search(&request, USER).await.unwrap_err();
        assert_eq!(err.code(), "E4V001");
    }

    #[tokio::test]
    async fn test_search_fails_when_thumbnail_missing() {
        let mut store = MockCatalogStore::new();
        store
            .expect_scenario_page()
            .returning(|_, _, _| Ok(vec![scenario_row(UUID, "S01")]));
        store.expect_scenario_count().never();

        let svc = service(store, object_store(vec![]), MockUrlSigner::new());
        let request = SearchRequest {
            page: 1,
            page_size: 10,
            ..Default::default()
        };

        let err = svc.search(&request, USER).await.unwrap_err();
        assert_eq!(err.code(), "E4L004");
    }

    #[tokio::test]
    async fn test_detail_without_sections_is_not_found() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .with(eq(USER))
            .returning(|_| Ok(vec![]));
        store.expect_scenario_by_id().never();

        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());

        let err = svc.detail(UUID, USER).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotAuthorizedOrNotFound));
    }

    #[tokio::test]
    async fn test_detail_outside_sections_matches_absent() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .returning(|_| Ok(vec!["S02".to_string()]));
        store
            .expect_scenario_by_id()
            .with(eq(UUID))
            .returning(|uuid| Ok(Some(scenario_row(uuid, "S01"))));
        store
            .expect_scenario_by_id()
            .with(eq("missing"))
            .returning(|_| Ok(None));

        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());

        let unauthorized = svc.detail(UUID, USER).await.unwrap_err();
        let absent = svc.detail("missing", USER).await.unwrap_err();
        assert_eq!(unauthorized.code(), absent.code());
        assert_eq!(unauthorized.code(), "E4L005");
    }

    #[tokio::test]
    async fn test_detail_lists_allowed_archives() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .returning(|_| Ok(vec!["S01".to_string()]));
        store
            .expect_scenario_by_id()
            .returning(|uuid| Ok(Some(scenario_row(uuid, "S01"))));
        store
            .expect_download_flags()
            .returning(|_| Ok(Some(flags("0", "0"))));

        let scenario_prefix = format!("scenario/{UUID}/scenario");
        let ml_prefix = format!("scenario/{UUID}/ml_img");
        let listings = object_store(vec![
            media_listing(UUID),
            (
                scenario_prefix.clone(),
                objects(&[
                    (&format!("{scenario_prefix}/{UUID}_openscenario.zip"), 2048),
                    (&format!("{scenario_prefix}/{UUID}_opendrive.zip"), 1_048_576),
                    (&format!("{scenario_prefix}/notes.txt"), 10),
                    (&format!("{scenario_prefix}/extra.zip"), 512),
                ]),
            ),
            (
                ml_prefix.clone(),
                objects(&[(&format!("{ml_prefix}/{UUID}_ml_img.zip"), 3 * 1_048_576)]),
            ),
        ]);

        let svc = service(store, listings, echo_signer());
        let detail = svc.detail(UUID, USER).await.unwrap();

        assert!(detail.video_url.ends_with(&format!("{UUID}.mp4?signed")));
        assert!(detail.thumbnail_url.ends_with(&format!("{UUID}.jpeg?signed")));
        assert_eq!(detail.near_miss_types, vec!["101", "102"]);

        let divisions: Vec<Option<DataDivision>> =
            detail.scenario_data.iter().map(|f| f.division).collect();
        assert_eq!(
            divisions,
            vec![
                None,
                Some(DataDivision::OpenDrive),
                Some(DataDivision::OpenScenario)
            ]
        );
        assert_eq!(detail.scenario_data[1].name, format!("{UUID}_opendrive.zip"));
        assert_eq!(detail.scenario_data[1].size, "1.00MB");
        assert_eq!(detail.scenario_data[2].size, "2.00KB");

        assert_eq!(detail.ml_data.len(), 1);
        assert_eq!(detail.ml_data[0].division, Some(DataDivision::MachineLearning));
        assert_eq!(detail.ml_data[0].size, "3.00MB");
    }

    #[tokio::test]
    async fn test_detail_scenario_flag_denied_hides_archives() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .returning(|_| Ok(vec!["S01".to_string()]));
        store
            .expect_scenario_by_id()
            .returning(|uuid| Ok(Some(scenario_row(uuid, "S01"))));
        store
            .expect_download_flags()
            .returning(|_| Ok(Some(flags("1", "1"))));

        let scenario_prefix = format!("scenario/{UUID}/scenario");
        let listings = object_store(vec![
            media_listing(UUID),
            (
                scenario_prefix.clone(),
                objects(&[(&format!("{scenario_prefix}/{UUID}_opendrive.zip"), 10)]),
            ),
        ]);

        let svc = service(store, listings, echo_signer());
        let detail = svc.detail(UUID, USER).await.unwrap();

        assert!(detail.scenario_data.is_empty());
        assert!(detail.ml_data.is_empty());
    }

    #[tokio::test]
    async fn test_detail_without_download_row_hides_archives() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .returning(|_| Ok(vec!["S01".to_string()]));
        store
            .expect_scenario_by_id()
            .returning(|uuid| Ok(Some(scenario_row(uuid, "S01"))));
        store.expect_download_flags().returning(|_| Ok(None));

        let svc = service(store, object_store(vec![media_listing(UUID)]), echo_signer());
        let detail = svc.detail(UUID, USER).await.unwrap();

        assert!(detail.scenario_data.is_empty());
        assert!(detail.ml_data.is_empty());
    }

    #[tokio::test]
    async fn test_detail_signing_failure_is_business_error() {
        let mut store = MockCatalogStore::new();
        store
            .expect_authorized_sections()
            .returning(|_| Ok(vec!["S01".to_string()]));
        store
            .expect_scenario_by_id()
            .returning(|uuid| Ok(Some(scenario_row(uuid, "S01"))));
        let mut signer = MockUrlSigner::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_, _| Err(SigningError::KeyMalformed));

        let svc = service(store, object_store(vec![media_listing(UUID)]), signer);

        let err = svc.detail(UUID, USER).await.unwrap_err();
        assert_eq!(err.code(), "E4L004");
    }

    #[tokio::test]
    async fn test_code_list_sorted_by_code() {
        let mut store = MockCatalogStore::new();
        store.expect_near_miss_codes().returning(|| {
            Ok(vec![
                NearMissCode {
                    code: "103".into(),
                    value: "Pedestrian".into(),
                },
                NearMissCode {
                    code: "101".into(),
                    value: "Cut-in".into(),
                },
            ])
        });
        store.expect_sections_for_user().returning(|_| {
            Ok(vec![Section {
                section_id: "S01".into(),
                section_name: "Tomei Expressway".into(),
            }])
        });

        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());
        let codes = svc.code_list(USER).await.unwrap();

        let order: Vec<&str> = codes.near_miss_types.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(order, vec!["101", "103"]);
        assert_eq!(codes.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_code_list_missing_master_data() {
        let mut store = MockCatalogStore::new();
        store.expect_near_miss_codes().returning(|| Ok(vec![]));
        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());
        let err = svc.code_list(USER).await.unwrap_err();
        assert!(matches!(err, CatalogError::MissingRequiredData("near-miss type")));

        let mut store = MockCatalogStore::new();
        store.expect_near_miss_codes().returning(|| {
            Ok(vec![NearMissCode {
                code: "101".into(),
                value: "Cut-in".into(),
            }])
        });
        store.expect_sections_for_user().returning(|_| Ok(vec![]));
        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());
        let err = svc.code_list(USER).await.unwrap_err();
        assert!(matches!(err, CatalogError::MissingRequiredData("section")));
        assert_eq!(err.code(), "E4L001");
    }

    #[tokio::test]
    async fn test_location_list_empty() {
        let mut store = MockCatalogStore::new();
        store
            .expect_locations_for_section()
            .with(eq("S01"), eq(USER))
            .returning(|_, _| Ok(vec![]));

        let svc = service(store, MockObjectStore::new(), MockUrlSigner::new());
        let err = svc.location_list("S01", USER).await.unwrap_err();
        assert_eq!(err.code(), "E4L003");
    }

    #[test]
    fn test_skip_computation() {
        let request = SearchRequest {
            page: 3,
            page_size: 25,
            ..Default::default()
        };
        assert_eq!(request.skip().unwrap(), 50);
    }

    #[test]
    fn test_expiry_window_out_of_range() {
        let err = expiry_after(Duration::from_secs(u64::MAX)).unwrap_err();
        assert_eq!(err.code(), "E5S001");
    }

    #[test]
    fn test_skip_overflow_is_a_validation_error() {
        let request = SearchRequest {
            page: u32::MAX,
            page_size: u32::MAX,
            ..Default::default()
        };
        assert_eq!(request.skip().unwrap_err().code(), "E4V001");
    }

    #[tokio::test]
    async fn test_search_rejects_unaddressable_page_before_querying() {
        let svc = service(MockCatalogStore::new(), MockObjectStore::new(), MockUrlSigner::new());
        let request = SearchRequest {
            page: u32::MAX,
            page_size: u32::MAX,
            ..Default::default()
        };

        let err = svc.search(&request, USER).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }
}
