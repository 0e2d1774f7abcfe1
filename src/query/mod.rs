use chrono::NaiveDate;
use reqwest::Url;
use thiserror::Error;

use crate::range::ResolvedRange;

pub const SEARCH_PAGE_SIZE: u32 = 5000;
pub const EXPORT_PAGE_SIZE: u32 = 5000;
pub const RECENT_EXPORT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterId {
    CompanyId,
    StoreId,
    User,
    Functionality,
    EventType,
    Message,
    ExtendedHistory,
}

impl FilterId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterId::CompanyId => "companyId",
            FilterId::StoreId => "storeId",
            FilterId::User => "user",
            FilterId::Functionality => "functionality",
            FilterId::EventType => "eventType",
            FilterId::Message => "message",
            FilterId::ExtendedHistory => "extendedHistory",
        }
    }

    /// Filters whose selection is invalidated when this one changes.
    fn dependents(&self) -> &'static [FilterId] {
        match self {
            FilterId::CompanyId => &[FilterId::StoreId],
            FilterId::Functionality => &[FilterId::EventType],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
}

impl FilterOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    Text {
        value: String,
    },
    Dropdown {
        selected: Option<String>,
        options: Vec<FilterOption>,
    },
    Checkbox {
        checked: bool,
    },
}

impl FilterKind {
    fn name(&self) -> &'static str {
        match self {
            FilterKind::Text { .. } => "text",
            FilterKind::Dropdown { .. } => "dropdown",
            FilterKind::Checkbox { .. } => "checkbox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: FilterId,
    pub label: String,
    pub kind: FilterKind,
}

impl Filter {
    pub fn text(id: FilterId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            kind: FilterKind::Text {
                value: String::new(),
            },
        }
    }

    pub fn dropdown(id: FilterId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            kind: FilterKind::Dropdown {
                selected: None,
                options: Vec::new(),
            },
        }
    }

    pub fn checkbox(id: FilterId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            kind: FilterKind::Checkbox { checked: false },
        }
    }

    /// The trimmed text or selected value, when non-empty.
    pub fn value(&self) -> Option<&str> {
        let raw = match &self.kind {
            FilterKind::Text { value } => Some(value.as_str()),
            FilterKind::Dropdown { selected, .. } => selected.as_deref(),
            FilterKind::Checkbox { .. } => None,
        };
        raw.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn has_value(&self) -> bool {
        match &self.kind {
            FilterKind::Checkbox { checked } => *checked,
            _ => self.value().is_some(),
        }
    }

    /// Display label of the selected dropdown option, looked up in the
    /// options currently loaded into this filter.
    pub fn selected_label(&self) -> Option<&str> {
        let FilterKind::Dropdown { options, .. } = &self.kind else {
            return None;
        };
        let selected = self.value()?;
        options
            .iter()
            .find(|option| option.value == selected)
            .map(|option| option.label.as_str())
    }

    pub fn options(&self) -> &[FilterOption] {
        match &self.kind {
            FilterKind::Dropdown { options, .. } => options,
            _ => &[],
        }
    }

    fn clear_value(&mut self) {
        match &mut self.kind {
            FilterKind::Text { value } => value.clear(),
            FilterKind::Dropdown { selected, .. } => *selected = None,
            FilterKind::Checkbox { checked } => *checked = false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter {id} is a {actual} filter, not a {expected} filter")]
    KindMismatch {
        id: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("no filter with id {0}")]
    Unknown(&'static str),
}

/// The filter panel owned by the host view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new(vec![
            Filter::dropdown(FilterId::CompanyId, "Company"),
            Filter::dropdown(FilterId::StoreId, "Store"),
            Filter::text(FilterId::User, "User"),
            Filter::dropdown(FilterId::Functionality, "Functionality"),
            Filter::dropdown(FilterId::EventType, "Event Type"),
            Filter::text(FilterId::Message, "Message"),
            Filter::checkbox(
                FilterId::ExtendedHistory,
                "Search Audits older than 90Days",
            ),
        ])
    }
}

impl FilterSet {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn as_slice(&self) -> &[Filter] {
        &self.filters
    }

    pub fn get(&self, id: FilterId) -> Option<&Filter> {
        self.filters.iter().find(|filter| filter.id == id)
    }

    pub fn set_text(&mut self, id: FilterId, text: impl Into<String>) -> Result<(), FilterError> {
        let filter = self.get_mut(id)?;
        match &mut filter.kind {
            FilterKind::Text { value } => {
                *value = text.into();
                Ok(())
            }
            other => Err(mismatch(id, "text", other)),
        }
    }

    /// Select a dropdown value, resetting any dependent filters.
    pub fn select(&mut self, id: FilterId, value: Option<String>) -> Result<(), FilterError> {
        let filter = self.get_mut(id)?;
        match &mut filter.kind {
            FilterKind::Dropdown { selected, .. } => *selected = value,
            other => return Err(mismatch(id, "dropdown", other)),
        }

        for dependent in id.dependents() {
            if let Ok(child) = self.get_mut(*dependent) {
                if let FilterKind::Dropdown { selected, options } = &mut child.kind {
                    *selected = None;
                    options.clear();
                }
            }
        }
        Ok(())
    }

    pub fn set_options(&mut self, id: FilterId, new_options: Vec<FilterOption>) -> Result<(), FilterError> {
        let filter = self.get_mut(id)?;
        match &mut filter.kind {
            FilterKind::Dropdown { options, .. } => {
                *options = new_options;
                Ok(())
            }
            other => Err(mismatch(id, "dropdown", other)),
        }
    }

    pub fn set_checked(&mut self, id: FilterId, value: bool) -> Result<(), FilterError> {
        let filter = self.get_mut(id)?;
        match &mut filter.kind {
            FilterKind::Checkbox { checked } => {
                *checked = value;
                Ok(())
            }
            other => Err(mismatch(id, "checkbox", other)),
        }
    }

    /// Clear every value, keeping loaded options.
    pub fn reset_values(&mut self) {
        for filter in &mut self.filters {
            filter.clear_value();
        }
    }

    fn get_mut(&mut self, id: FilterId) -> Result<&mut Filter, FilterError> {
        self.filters
            .iter_mut()
            .find(|filter| filter.id == id)
            .ok_or(FilterError::Unknown(id.as_str()))
    }
}

fn mismatch(id: FilterId, expected: &'static str, actual: &FilterKind) -> FilterError {
    FilterError::KindMismatch {
        id: id.as_str(),
        expected,
        actual: actual.name(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Search,
    Export,
}

/// Ordered query-string pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters {
    pairs: Vec<(String, String)>,
}

impl QueryParameters {
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Append every pair to `url` using form encoding.
    pub fn append_to(&self, url: &mut Url) {
        if self.pairs.is_empty() {
            return;
        }
        url.query_pairs_mut().extend_pairs(self.iter());
    }
}

/// Map the filter panel and range onto request parameters for `mode`.
///
/// Search and export deliberately use different key names for the same
/// filters; both consume the same normalized range.
pub fn build(
    filters: &[Filter],
    range: Option<&ResolvedRange>,
    mode: QueryMode,
    today: NaiveDate,
) -> QueryParameters {
    let mut params = QueryParameters::default();
    params.push("page_number", "1");
    if mode == QueryMode::Search {
        params.push("page_size", SEARCH_PAGE_SIZE.to_string());
    }

    let window = range
        .copied()
        .unwrap_or_else(|| ResolvedRange::full_day(today));
    params.push("from_date", window.from_param());
    params.push("to_date", window.to_param());

    let mut has_filters = false;
    for filter in filters.iter().filter(|filter| filter.has_value()) {
        has_filters = true;
        if let Some((key, value)) = map_filter(filter, mode) {
            params.push(key, value);
        }
    }

    if mode == QueryMode::Export {
        if has_filters || range.is_some() {
            params.push("recent", "false");
            params.push("page_size", EXPORT_PAGE_SIZE.to_string());
        } else {
            params.push("recent", "true");
            params.push("page_size", RECENT_EXPORT_PAGE_SIZE.to_string());
        }
    }

    params
}

fn filter_key(id: FilterId, mode: QueryMode) -> Option<&'static str> {
    let key = match (id, mode) {
        (FilterId::CompanyId, _) => "company_id",
        (FilterId::StoreId, QueryMode::Search) => "store_id",
        (FilterId::StoreId, QueryMode::Export) => "store_location_id",
        (FilterId::User, QueryMode::Search) => "user",
        (FilterId::User, QueryMode::Export) => "username",
        (FilterId::Functionality, QueryMode::Search) => "functionality",
        (FilterId::Functionality, QueryMode::Export) => "functionality_name",
        (FilterId::EventType, QueryMode::Search) => "event_type",
        (FilterId::EventType, QueryMode::Export) => "event_type_name",
        (FilterId::Message, _) => "message_pattern",
        (FilterId::ExtendedHistory, _) => return None,
    };
    Some(key)
}

fn map_filter(filter: &Filter, mode: QueryMode) -> Option<(&'static str, String)> {
    let key = filter_key(filter.id, mode)?;
    let value = match filter.id {
        FilterId::Functionality | FilterId::EventType => filter.selected_label()?,
        _ => filter.value()?,
    };
    Some((key, value.to_string()))
}
