mod facets;
mod query;

pub use facets::{run_query, FacetIndex, SearchResult};
pub use query::SearchQuery;
