//! Catalog discovery and in-memory downloads.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::CatalogConfig;
use crate::error::CollectorError;

const API_KEY_HEADER: &str = "chave-api-dados-abertos";

// =============================================================================
// Catalog Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    #[serde(default)]
    recursos: Vec<RawResource>,
}

/// A resource descriptor exactly as the catalog lists it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub titulo: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub formato: String,
}

/// A catalog resource matched to one target year and one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdaResource {
    pub id: String,
    pub title: String,
    pub url: String,
    pub format: String,
    pub year: i32,
    pub service: String,
}

impl IdaResource {
    /// Name recorded as the fact rows' source file.
    pub fn file_name(&self) -> String {
        format!("{}_{}.ods", self.service, self.year)
    }
}

/// Keep the resources whose title names both a target year and a target
/// service. The first year and the first service in list order win.
pub fn select_resources(
    raw: &[RawResource],
    years: &[i32],
    services: &[String],
) -> Vec<IdaResource> {
    raw.iter()
        .filter_map(|resource| {
            let title_upper = resource.titulo.to_uppercase();
            let year = years
                .iter()
                .copied()
                .find(|y| resource.titulo.contains(&y.to_string()))?;
            let service = services
                .iter()
                .find(|s| title_upper.contains(s.as_str()))?;

            Some(IdaResource {
                id: resource.id.clone(),
                title: resource.titulo.clone(),
                url: resource.link.replace('\\', "/"),
                format: resource.formato.clone(),
                year,
                service: service.clone(),
            })
        })
        .collect()
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the dados.gov.br catalog.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, CollectorError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CollectorError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// List the dataset resources and keep those matching the targets.
    #[instrument(skip(self), fields(dataset = %self.config.dataset_id))]
    pub async fn discover(&self) -> Result<Vec<IdaResource>, CollectorError> {
        let url = format!(
            "{}/conjuntos-dados/{}",
            self.config.base_url, self.config.dataset_id
        );

        let mut request = self.http.get(&url).timeout(self.config.discovery_timeout);
        if let Some(key) = &self.config.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CollectorError::from_reqwest(&url, e))?;

        let dataset: DatasetResponse =
            response
                .json()
                .await
                .map_err(|source| CollectorError::Decode {
                    url: url.clone(),
                    source,
                })?;

        let selected = select_resources(
            &dataset.recursos,
            &self.config.target_years,
            &self.config.target_services,
        );

        info!(
            listed = dataset.recursos.len(),
            selected = selected.len(),
            "catalog resources discovered"
        );
        for resource in &selected {
            debug!(service = %resource.service, year = resource.year, title = %resource.title, "resource selected");
        }

        Ok(selected)
    }

    /// Download a resource into memory, retrying transient failures.
    #[instrument(skip(self, resource), fields(service = %resource.service, year = resource.year))]
    pub async fn download(&self, resource: &IdaResource) -> Result<Vec<u8>, CollectorError> {
        if resource.url.trim().is_empty() {
            return Err(CollectorError::EmptyUrl(resource.title.clone()));
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.download_once(&resource.url).await {
                Ok(bytes) => {
                    info!(bytes = bytes.len(), attempt, "resource downloaded");
                    return Ok(bytes);
                }
                Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                    let backoff = self.config.retry_backoff * attempt;
                    warn!(error = %err, attempt, ?backoff, "download failed, retrying");
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn download_once(&self, url: &str) -> Result<Vec<u8>, CollectorError> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CollectorError::from_reqwest(url, e))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CollectorError::from_reqwest(url, e))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(titulo: &str, link: &str) -> RawResource {
        RawResource {
            id: format!("id-{titulo}"),
            titulo: titulo.to_string(),
            link: link.to_string(),
            formato: "ODS".to_string(),
        }
    }

    fn services() -> Vec<String> {
        vec!["SMP".to_string(), "STFC".to_string(), "SCM".to_string()]
    }

    // -------------------------------------------------------------------------
    // RESOURCE SELECTION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_select_requires_year_and_service() {
        let listed = vec![
            raw("IDA SMP 2018", "https://x/smp2018.ods"),
            raw("IDA SMP 2015", "https://x/smp2015.ods"),
            raw("IDA TV por Assinatura 2018", "https://x/seac2018.ods"),
        ];
        let selected = select_resources(&listed, &[2017, 2018, 2019], &services());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].service, "SMP");
        assert_eq!(selected[0].year, 2018);
    }

    #[test]
    fn test_select_service_is_case_insensitive() {
        let listed = vec![raw("Índice de Desempenho - stfc - 2017", "https://x/a.ods")];
        let selected = select_resources(&listed, &[2017], &services());
        assert_eq!(selected[0].service, "STFC");
    }

    #[test]
    fn test_select_normalizes_backslashes_in_link() {
        let listed = vec![raw("SCM 2019", "https:\\\\x\\dados\\scm2019.ods")];
        let selected = select_resources(&listed, &[2019], &services());
        assert_eq!(selected[0].url, "https://x/dados/scm2019.ods");
    }

    #[test]
    fn test_file_name_from_service_and_year() {
        let listed = vec![raw("SMP 2019", "https://x/a.ods")];
        let selected = select_resources(&listed, &[2019], &services());
        assert_eq!(selected[0].file_name(), "SMP_2019.ods");
    }

    #[test]
    fn test_dataset_response_tolerates_missing_fields() {
        let body = r#"{"titulo": "IDA", "recursos": [{"titulo": "SMP 2018"}, {"link": "x"}]}"#;
        let parsed: DatasetResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.recursos.len(), 2);
        assert_eq!(parsed.recursos[0].link, "");
    }

    #[tokio::test]
    async fn test_download_rejects_empty_url() {
        let client = CatalogClient::new(CatalogConfig::default()).unwrap();
        let resource = IdaResource {
            id: "1".to_string(),
            title: "SMP 2018".to_string(),
            url: "  ".to_string(),
            format: "ODS".to_string(),
            year: 2018,
            service: "SMP".to_string(),
        };
        let err = client.download(&resource).await.unwrap_err();
        assert!(matches!(err, CollectorError::EmptyUrl(_)));
    }
}
