//! Command dispatch
//!
//! Every command prints one JSON document on stdout. Diagnostics go through
//! `tracing` on stderr.

use crate::cli::args::{Args, CacheCommand, Command, ReposArgs, TagsArgs};
use crate::common::utils::FormatUtils;
use crate::error::Result;
use crate::image::Manifest;
use crate::query::{QueryPage, RepositoryQueryService, SearchQuery, TagQuery};
use crate::registry::{RegistryClient, TagInfo};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct Runner {
    args: Args,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    pub async fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        let client = RegistryClient::connect(self.args.client_config()?).await?;
        let output = self.execute(client).await?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Command completed");
        Ok(())
    }

    async fn execute(&self, client: RegistryClient) -> Result<serde_json::Value> {
        let queries = RepositoryQueryService::new(Arc::new(client.clone()));

        match &self.args.command {
            Command::Repos(repos) => {
                let query = repos_query(repos);
                debug!(?query, "Running repository query");
                to_value(&queries.query(&query).await?)
            }
            Command::Tags(tags) => {
                let query = tags_query(tags);
                to_value(&tag_rows(queries.query_tags(&tags.repository, &query).await?))
            }
            Command::Manifest { repository, reference } => {
                let manifest = client.get_manifest(repository, reference).await?;
                to_value(&ManifestView::new(&manifest))
            }
            Command::Suggest { partial, limit } => to_value(&queries.suggest(partial, *limit).await?),
            // Hit and miss counters start at zero in every process, so only
            // the store itself is reported.
            Command::Cache(CacheCommand::Stats) => {
                let stats = client.cache_stats().await?;
                Ok(json!({
                    "entry_count": stats.entry_count,
                    "path": client.cache().path().display().to_string(),
                }))
            }
            Command::Cache(CacheCommand::Clear { expired: true, .. }) => {
                let removed = client.cache().purge_expired().await?;
                Ok(json!({ "removed": removed }))
            }
            Command::Cache(CacheCommand::Clear { prefix, .. }) => {
                let removed = client.clear_cache(prefix.as_deref()).await?;
                Ok(json!({ "removed": removed }))
            }
        }
    }
}

/// A tag as printed by `tags`
#[derive(Serialize)]
struct TagRow {
    #[serde(flatten)]
    tag: TagInfo,
    formatted_size: String,
}

fn tag_rows(page: QueryPage<TagInfo>) -> QueryPage<TagRow> {
    QueryPage {
        results: page
            .results
            .into_iter()
            .map(|tag| TagRow {
                formatted_size: tag.formatted_size(),
                tag,
            })
            .collect(),
        total_count: page.total_count,
        page_info: page.page_info,
    }
}

#[derive(Serialize)]
struct ManifestView<'a> {
    #[serde(flatten)]
    manifest: &'a Manifest,
    layer_count: usize,
    formatted_size: String,
}

impl<'a> ManifestView<'a> {
    fn new(manifest: &'a Manifest) -> Self {
        Self {
            manifest,
            layer_count: manifest.layer_count(),
            formatted_size: FormatUtils::format_size(manifest.total_size),
        }
    }
}

fn repos_query(args: &ReposArgs) -> SearchQuery {
    SearchQuery {
        search: args.search.clone(),
        sort: args.sort,
        direction: args.order,
        page: args.page,
        page_size: args.page_size,
    }
}

fn tags_query(args: &TagsArgs) -> TagQuery {
    TagQuery {
        search: args.search.clone(),
        sort: args.sort,
        direction: args.order,
        page: args.page,
        page_size: args.page_size,
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}
