use hwscope_core::DeviceRecord;

/// Case-insensitive token search over a record's descriptive fields.
///
/// An empty query matches everything. Otherwise every whitespace-separated
/// token must occur somewhere in [`DeviceRecord::search_text`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    query: String,
    tokens: Vec<String>,
}

impl DeviceFilter {
    pub fn new(query: &str) -> Self {
        let query = query.trim().to_string();
        let tokens = query
            .split_whitespace()
            .map(|token| token.to_lowercase())
            .collect();
        Self { query, tokens }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches(&self, record: &DeviceRecord) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        let haystack = record.search_text().to_lowercase();
        self.tokens.iter().all(|token| haystack.contains(token.as_str()))
    }

    /// Lazy view over `records`; clone the iterator to walk it again.
    pub fn apply<'a>(
        &'a self,
        records: &'a [DeviceRecord],
    ) -> impl Iterator<Item = &'a DeviceRecord> + Clone + 'a {
        records.iter().filter(move |record| self.matches(record))
    }
}
