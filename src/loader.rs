use std::collections::HashMap;
use std::future::Future;

use futures::future::join_all;
use tracing::debug;

use crate::assembler::{DEFAULT_FACE_MIME_TYPE, ResultAssembler};
use crate::backend::GraphQueryClient;
use crate::coalescer::{
    BatchFetch, CoalescerConfig, RequestCoalescer, Scheduler, TokioScheduler,
};
use crate::domain::{HistoricalImageSet, InstanceRef};
use crate::error::Image360Error;
use crate::fetcher::PaginatedFetcher;
use crate::query::{DEFAULT_IMAGES_PER_COLLECTION, QueryBuilder, ViewSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    pub coalescer: CoalescerConfig,
    pub views: ViewSettings,
    pub images_per_collection: usize,
    pub face_mime_type: String,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            coalescer: CoalescerConfig::default(),
            views: ViewSettings::default(),
            images_per_collection: DEFAULT_IMAGES_PER_COLLECTION,
            face_mime_type: DEFAULT_FACE_MIME_TYPE.to_string(),
        }
    }
}

/// One batch of collections: build the query, page through it, assemble.
pub struct CollectionBatchFetch<C> {
    builder: QueryBuilder,
    fetcher: PaginatedFetcher<C>,
    assembler: ResultAssembler,
}

impl<C: GraphQueryClient> CollectionBatchFetch<C> {
    pub fn new(client: C, settings: &LoaderSettings) -> Self {
        Self {
            builder: QueryBuilder::new(settings.views.clone(), settings.images_per_collection),
            fetcher: PaginatedFetcher::new(client),
            assembler: ResultAssembler::new(settings.views.clone(), &settings.face_mime_type),
        }
    }

    pub fn client(&self) -> &C {
        self.fetcher.client()
    }
}

impl<C: GraphQueryClient + 'static> BatchFetch for CollectionBatchFetch<C> {
    type Key = InstanceRef;
    type Value = Vec<HistoricalImageSet>;

    async fn fetch_batch(
        &self,
        keys: Vec<InstanceRef>,
    ) -> Result<HashMap<InstanceRef, Vec<HistoricalImageSet>>, Image360Error> {
        let query = self.builder.build(&keys);
        let raw = self.fetcher.fetch_all(&query).await?;
        debug!(
            collections = keys.len(),
            pages = raw.pages,
            images = raw.images.len(),
            stations = raw.stations.len(),
            "collection query complete"
        );
        Ok(self.assembler.assemble(&keys, &raw))
    }

    fn default_value(&self, _key: &InstanceRef) -> Vec<HistoricalImageSet> {
        Vec::new()
    }
}

/// Loads historical image sets per collection, coalescing concurrent loads
/// into shared backend queries.
pub struct CollectionLoader<C, S = TokioScheduler>
where
    C: GraphQueryClient + 'static,
    S: Scheduler,
{
    coalescer: RequestCoalescer<CollectionBatchFetch<C>, S>,
}

impl<C: GraphQueryClient + 'static, S: Scheduler> Clone for CollectionLoader<C, S> {
    fn clone(&self) -> Self {
        Self {
            coalescer: self.coalescer.clone(),
        }
    }
}

impl<C: GraphQueryClient + 'static> CollectionLoader<C> {
    pub fn new(client: C, settings: LoaderSettings) -> Self {
        Self::with_scheduler(client, TokioScheduler, settings)
    }
}

impl<C: GraphQueryClient + 'static, S: Scheduler> CollectionLoader<C, S> {
    pub fn with_scheduler(client: C, scheduler: S, settings: LoaderSettings) -> Self {
        let fetch = CollectionBatchFetch::new(client, &settings);
        Self {
            coalescer: RequestCoalescer::with_scheduler(fetch, scheduler, settings.coalescer),
        }
    }

    pub fn client(&self) -> &C {
        self.coalescer.fetcher().client()
    }

    /// Image sets of one collection, in station order. An unknown collection
    /// yields an empty list.
    pub fn load(
        &self,
        collection: InstanceRef,
    ) -> impl Future<Output = Result<Vec<HistoricalImageSet>, Image360Error>> + Send + 'static + use<C, S>
    {
        self.coalescer.load(collection)
    }

    /// Loads every collection concurrently and returns the outcomes in input
    /// order.
    pub async fn load_many(
        &self,
        collections: Vec<InstanceRef>,
    ) -> Vec<(InstanceRef, Result<Vec<HistoricalImageSet>, Image360Error>)> {
        let pending: Vec<_> = collections
            .iter()
            .map(|collection| self.load(collection.clone()))
            .collect();
        collections.into_iter().zip(join_all(pending).await).collect()
    }
}
