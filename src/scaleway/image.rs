//! Boot image resolution.
//!
//! Project-scoped images win over public ones; within the chosen source the
//! newest available image for the configured architecture is used.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use super::{ScalewayProvider, ScalewayProviderError};
use crate::config::ScalewayConfig;

/// Image label used when no image can be resolved and none is configured.
pub const FALLBACK_IMAGE_LABEL: &str = "ubuntu_noble";

/// Lookup parameters taken from configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct ImageQuery {
    pub(super) label: String,
    pub(super) arch: String,
    pub(super) zone: String,
    pub(super) project_id: String,
    pub(super) organization_id: Option<String>,
}

impl ImageQuery {
    pub(super) fn from_config(config: &ScalewayConfig) -> Self {
        Self {
            label: config.default_image.clone(),
            arch: config.default_architecture.clone(),
            zone: config.default_zone.clone(),
            project_id: config.default_project_id.clone(),
            organization_id: config.default_organization_id.clone(),
        }
    }
}

impl ScalewayProvider {
    pub(super) async fn resolve_image_id(
        &self,
        query: &ImageQuery,
    ) -> Result<String, ScalewayProviderError> {
        resolve_image_id_with(
            query,
            || async move {
                if query.project_id.is_empty() {
                    Ok(Vec::new())
                } else {
                    let mut scoped =
                        ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                            .public(true)
                            .project(&query.project_id)
                            .name(&query.label)
                            .arch(&query.arch);
                    if let Some(org) = &query.organization_id {
                        scoped = scoped.organization(org);
                    }
                    scoped.run_async().await.map_err(ScalewayProviderError::from)
                }
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &query.zone)
                    .public(true)
                    .name(&query.label)
                    .arch(&query.arch)
                    .run_async()
                    .await
                    .map_err(ScalewayProviderError::from)
            },
        )
        .await
    }
}

/// Queries project images first and falls back to public ones only when the
/// project has none.
pub(super) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
    query: &ImageQuery,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ScalewayProviderError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
{
    let project_images = project_fetch().await?;
    let primary = if project_images.is_empty() {
        public_fetch().await?
    } else {
        project_images
    };
    select_image_id(primary, query)
}

pub(super) fn select_image_id(
    images: Vec<ScalewayImage>,
    query: &ImageQuery,
) -> Result<String, ScalewayProviderError> {
    images
        .into_iter()
        .filter(|image| image.arch == query.arch && image.state == "available")
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
        .ok_or_else(|| ScalewayProviderError::ImageNotFound {
            label: query.label.clone(),
            arch: query.arch.clone(),
            zone: query.zone.clone(),
        })
}
