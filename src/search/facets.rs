use super::query::SearchQuery;
use crate::catalog::AudioItem;
use crate::error::Result;
use crate::metadata_store::MetadataStore;
use crate::taxonomy::Taxonomy;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Items matching a query plus how many of them fall under each category
/// and language.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Matching item ids in import order.
    pub audio_item_ids: Vec<String>,
    category_facets: BTreeMap<String, usize>,
    language_facets: BTreeMap<String, usize>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.audio_item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio_item_ids.is_empty()
    }

    /// Matching items that hold `category_id` directly or below it.
    pub fn facet_count(&self, category_id: &str) -> usize {
        self.category_facets.get(category_id).copied().unwrap_or(0)
    }

    pub fn language_facet_count(&self, language: &str) -> usize {
        self.language_facets
            .get(&language.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn category_facets(&self) -> &BTreeMap<String, usize> {
        &self.category_facets
    }

    pub fn language_facets(&self) -> &BTreeMap<String, usize> {
        &self.language_facets
    }
}

/// Category set of `item` closed under ancestors of `taxonomy`, in case the
/// stored set predates a taxonomy change.
fn closed_categories(item: &AudioItem, taxonomy: Option<&Taxonomy>) -> BTreeSet<String> {
    let mut closed = item.categories().clone();
    if let Some(taxonomy) = taxonomy {
        for id in item.categories() {
            if let Ok(ancestors) = taxonomy.ancestors(id) {
                closed.extend(ancestors);
            }
        }
    }
    closed
}

/// Filters `items` (expected in import order) and counts facets over the
/// matches.
pub fn run_query(
    query: &SearchQuery,
    taxonomy: Option<&Taxonomy>,
    items: &[AudioItem],
) -> SearchResult {
    let mut result = SearchResult::default();
    for item in items.iter().filter(|item| query.matches(item)) {
        result.audio_item_ids.push(item.id.clone());
        for category in closed_categories(item, taxonomy) {
            *result.category_facets.entry(category).or_insert(0) += 1;
        }
        if let Some(language) = item.language() {
            *result
                .language_facets
                .entry(language.to_lowercase())
                .or_insert(0) += 1;
        }
    }
    result
}

/// Cached search result for one query, recomputed whenever the store's
/// change counter has moved since it was computed.
#[derive(Debug, Default)]
pub struct FacetIndex {
    query: SearchQuery,
    cached: Option<(u64, SearchResult)>,
}

impl FacetIndex {
    pub fn new(query: SearchQuery) -> Self {
        Self {
            query,
            cached: None,
        }
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn set_query(&mut self, query: SearchQuery) {
        if query != self.query {
            self.query = query;
            self.cached = None;
        }
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Change count the cached result was computed at, if any.
    pub fn computed_at(&self) -> Option<u64> {
        self.cached.as_ref().map(|(count, _)| *count)
    }

    pub fn result<S: MetadataStore>(&mut self, store: &S) -> Result<&SearchResult> {
        let current = store.change_count()?;
        let entry = match self.cached.take() {
            Some((count, result)) if count == current => (count, result),
            _ => {
                debug!("Recomputing facets at change count {}", current);
                (current, store.search(&self.query)?)
            }
        };
        Ok(&self.cached.insert(entry).1)
    }

    pub fn facet_count<S: MetadataStore>(&mut self, store: &S, category_id: &str) -> Result<usize> {
        Ok(self.result(store)?.facet_count(category_id))
    }

    pub fn language_facet_count<S: MetadataStore>(
        &mut self,
        store: &S,
        language: &str,
    ) -> Result<usize> {
        Ok(self.result(store)?.language_facet_count(language))
    }
}
