use tracing::debug;

use crate::backend::{GraphQueryClient, NodeRow};
use crate::error::Image360Error;
use crate::query::{Branch, PageCursor, QueryRequest};

/// Every page of one collection query, flattened per branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQueryResult {
    pub collections: Vec<NodeRow>,
    pub images: Vec<NodeRow>,
    pub stations: Vec<NodeRow>,
    pub pages: usize,
}

/// Pages through a collection query by advancing the images cursor alone.
///
/// Images and stations are fetched in the same window; continuing the
/// stations branch on its own cursor would return stations that no longer
/// belong to the images on the page. Collections are bounded by the number of
/// requested identifiers and arrive complete on the first page.
#[derive(Debug, Clone)]
pub struct PaginatedFetcher<C> {
    client: C,
}

impl<C: GraphQueryClient> PaginatedFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn fetch_all(&self, query: &QueryRequest) -> Result<RawQueryResult, Image360Error> {
        let images_limit = query
            .limit(Branch::Images)
            .ok_or_else(|| Image360Error::Schema("query has no images branch".to_string()))?;

        let mut result = RawQueryResult::default();
        let mut request = query.clone();
        loop {
            ensure_single_images_cursor(&request)?;
            let mut page = self.client.query(&request).await?;
            result.pages += 1;
            let exhausted = page.is_empty();

            let images = page.take_rows(Branch::Images);
            let page_images = images.len();
            let stations = page.take_rows(Branch::Stations);
            debug!(
                page = result.pages,
                images = page_images,
                stations = stations.len(),
                "fetched collection query page"
            );
            if result.pages == 1 {
                result.collections = page.take_rows(Branch::ImageCollections);
            }
            result.images.extend(images);
            result.stations.extend(stations);

            // A short or empty page is the last one, whatever cursors came
            // with it.
            let next = match page.cursor(Branch::Images) {
                Some(cursor) if !exhausted && page_images == images_limit => cursor.to_string(),
                _ => break,
            };
            request = query.with_cursor(PageCursor {
                branch: Branch::Images,
                cursor: next,
            });
        }
        Ok(result)
    }
}

fn ensure_single_images_cursor(request: &QueryRequest) -> Result<(), Image360Error> {
    let cursors = request.cursors();
    if cursors.len() > 1 {
        return Err(Image360Error::CursorInvariant(format!(
            "{} cursors attached, at most one is allowed",
            cursors.len()
        )));
    }
    match cursors.keys().next() {
        Some(branch) if *branch != Branch::Images => Err(Image360Error::CursorInvariant(format!(
            "cursor attached to the {branch} branch; only images may be paginated"
        ))),
        _ => Ok(()),
    }
}
