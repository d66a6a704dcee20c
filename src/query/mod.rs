//! Filter list <-> URL query string, and the dashboard location that keeps
//! the two in sync.

use url::form_urlencoded;

use crate::filters::dedupe;

pub const FILTER_KEY: &str = "q";
pub const SHARE_KEY: &str = "m";

/// Result of parsing the search part of a dashboard URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSearch {
    pub filters: Vec<String>,
    /// `true` when the URL carried no `q` key at all and the caller should
    /// fall back to its configured default filters.
    pub defaults_used: bool,
    /// Every non-filter parameter, in the order it appeared.
    pub params: Vec<(String, String)>,
}

impl DecodedSearch {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Serializes filters as repeated `q=` pairs. Indexed keys (`q[0]=`) are
/// never produced since the backend parser only understands bare repeats.
pub fn encode<S: AsRef<str>>(filters: &[S]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for filter in dedupe(filters) {
        serializer.append_pair(FILTER_KEY, &filter);
    }
    serializer.finish()
}

pub fn decode(search: &str) -> DecodedSearch {
    let query = match search.split_once('?') {
        Some((_, query)) => query,
        None => search,
    };

    let mut seen_key = false;
    let mut filters = Vec::new();
    let mut params = Vec::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if is_filter_key(&key) {
            seen_key = true;
            filters.push(value.into_owned());
        } else {
            params.push((key.into_owned(), value.into_owned()));
        }
    }

    DecodedSearch {
        filters: dedupe(&filters),
        defaults_used: !seen_key,
        params,
    }
}

fn is_filter_key(key: &str) -> bool {
    key == FILTER_KEY || key == "q[]" || (key.starts_with("q[") && key.ends_with(']'))
}

/// Rewrites the filter part of `search`, keeping every other parameter.
pub fn update_search<S: AsRef<str>>(search: &str, filters: &[S]) -> String {
    let decoded = decode(search);

    let filters = dedupe(filters);
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if filters.is_empty() {
        // keep an explicit empty filter so reloads don't bring defaults back
        serializer.append_pair(FILTER_KEY, "");
    }
    for filter in &filters {
        serializer.append_pair(FILTER_KEY, filter);
    }
    for (key, value) in &decoded.params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Joins a backend base URI and an endpoint path.
pub fn backend_uri(base: &str, path: &str) -> String {
    let base = if base.is_empty() { "." } else { base };
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// The dashboard's own URL, updated every time the filter list changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    base: String,
    search: String,
    history: Vec<String>,
}

impl Location {
    pub fn new(href: &str) -> Self {
        let (base, search) = match href.split_once('?') {
            Some((base, search)) => (base.to_string(), search.to_string()),
            None => (href.to_string(), String::new()),
        };
        Self {
            base,
            search,
            history: Vec::new(),
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn href(&self) -> String {
        if self.search.is_empty() {
            self.base.clone()
        } else {
            format!("{}?{}", self.base, self.search)
        }
    }

    /// Every href pushed so far, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn decode(&self) -> DecodedSearch {
        decode(&self.search)
    }

    pub fn push_filters<S: AsRef<str>>(&mut self, filters: &[S]) {
        self.search = update_search(&self.search, filters);
        self.history.push(self.href());
    }

    /// Link that restores a shared silence form, see `silence::share`.
    pub fn share_link(&self, encoded_form: &str) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair(SHARE_KEY, encoded_form);
        format!("{}?{}", self.base, serializer.finish())
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new("")
    }
}
