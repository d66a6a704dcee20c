use std::collections::{BTreeSet, HashMap};

use crate::protocol::{ApiFilter, Operator};

/// One query clause as typed by the user, plus whatever the backend told us
/// about it on the last round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub raw: String,
    pub name: String,
    pub matcher: Option<Operator>,
    pub value: String,
    pub applied: bool,
    pub is_valid: bool,
    pub hits: u64,
}

impl Filter {
    pub fn unapplied(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            name: String::new(),
            matcher: None,
            value: String::new(),
            applied: false,
            is_valid: true,
            hits: 0,
        }
    }

    fn acknowledge(&mut self, filter: &ApiFilter) {
        self.applied = true;
        self.is_valid = filter.is_valid;
        self.hits = filter.hits;
        self.name = filter.name.clone();
        self.matcher = filter.matcher.clone();
        self.value = filter.value.clone();
    }
}

/// Ordered list of active filters. Never holds an empty `raw` and never
/// holds the same `raw` twice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    values: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[Filter] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, raw: &str) -> Option<&Filter> {
        self.values.iter().find(|filter| filter.raw == raw)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.get(raw).is_some()
    }

    pub fn raws(&self) -> Vec<String> {
        self.values.iter().map(|filter| filter.raw.clone()).collect()
    }

    /// Sorted, deduplicated view used to match responses against the query
    /// that produced them.
    pub fn raw_set(&self) -> BTreeSet<&str> {
        self.values.iter().map(|filter| filter.raw.as_str()).collect()
    }

    /// Number of filters still waiting for the backend to acknowledge them.
    pub fn pending(&self) -> usize {
        self.values.iter().filter(|filter| !filter.applied).count()
    }

    /// Returns `true` when the list changed.
    pub fn add(&mut self, raw: &str) -> bool {
        if raw.is_empty() || self.contains(raw) {
            return false;
        }
        self.values.push(Filter::unapplied(raw));
        true
    }

    pub fn remove(&mut self, raw: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|filter| filter.raw != raw);
        self.values.len() != before
    }

    /// Swaps `old_raw` for `new_raw` in place. When `new_raw` is already
    /// present the old entry is dropped instead, so no duplicate appears.
    pub fn replace(&mut self, old_raw: &str, new_raw: &str) -> bool {
        let Some(index) = self.values.iter().position(|filter| filter.raw == old_raw) else {
            return false;
        };
        if old_raw == new_raw {
            return false;
        }
        if new_raw.is_empty() || self.contains(new_raw) {
            return self.remove(old_raw);
        }
        self.values[index] = Filter::unapplied(new_raw);
        true
    }

    /// Resets the whole list to fresh, unapplied filters.
    pub fn set<S: AsRef<str>>(&mut self, raws: &[S]) {
        self.values = dedupe(raws).into_iter().map(Filter::unapplied).collect();
    }

    /// Rebuilds the list from `raws`, keeping server state for every entry
    /// whose `raw` was already known.
    pub fn set_from_raws<S: AsRef<str>>(&mut self, raws: &[S]) {
        let mut known: HashMap<String, Filter> = self
            .values
            .drain(..)
            .map(|filter| (filter.raw.clone(), filter))
            .collect();

        self.values = dedupe(raws)
            .into_iter()
            .map(|raw| known.remove(&raw).unwrap_or_else(|| Filter::unapplied(raw)))
            .collect();
    }

    pub fn apply_all(&mut self) {
        for filter in &mut self.values {
            filter.applied = true;
        }
    }

    /// Copies the server-computed fields onto the local filter with the same
    /// `raw`. Unknown filters are ignored.
    pub fn acknowledge(&mut self, filter: &ApiFilter) -> bool {
        match self.values.iter_mut().find(|local| local.raw == filter.text) {
            Some(local) => {
                local.acknowledge(filter);
                true
            }
            None => false,
        }
    }
}

/// Drops empty values and later duplicates, keeping first-seen order.
pub fn dedupe<S: AsRef<str>>(raws: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raws.iter()
        .map(AsRef::as_ref)
        .filter(|raw| !raw.is_empty())
        .filter(|raw| seen.insert(*raw))
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_filter(text: &str, hits: u64) -> ApiFilter {
        ApiFilter {
            text: text.to_string(),
            name: "cluster".to_string(),
            matcher: Some(Operator::Equal),
            value: "prod".to_string(),
            hits,
            is_valid: true,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let mut filters = FilterSet::new();
        assert!(filters.add("cluster=prod"));
        assert!(!filters.add("cluster=prod"));
        assert_eq!(filters.raws(), vec!["cluster=prod"]);
        assert!(!filters.values()[0].applied);
    }

    #[test]
    fn add_ignores_empty_raw() {
        let mut filters = FilterSet::new();
        assert!(!filters.add(""));
        assert!(filters.is_empty());
    }

    #[test]
    fn remove_missing_filter_is_noop() {
        let mut filters = FilterSet::new();
        filters.add("a=1");
        assert!(!filters.remove("b=2"));
        assert!(filters.remove("a=1"));
        assert!(filters.is_empty());
    }

    #[test]
    fn replace_preserves_position() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "b=2", "c=3"]);
        assert!(filters.replace("b=2", "d=4"));
        assert_eq!(filters.raws(), vec!["a=1", "d=4", "c=3"]);
    }

    #[test]
    fn replace_onto_existing_filter_drops_old() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "b=2", "c=3"]);
        assert!(filters.replace("a=1", "c=3"));
        assert_eq!(filters.raws(), vec!["b=2", "c=3"]);
    }

    #[test]
    fn replace_there_and_back_restores_list() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "b=2", "c=3"]);
        let original = filters.raws();

        filters.replace("b=2", "x=9");
        filters.replace("x=9", "b=2");

        assert_eq!(filters.raws(), original);
    }

    #[test]
    fn set_drops_duplicates_and_empty_values() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "", "b=2", "a=1"]);
        assert_eq!(filters.raws(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_from_raws_keeps_known_server_state() {
        let mut filters = FilterSet::new();
        filters.set(&["cluster=prod", "job=node"]);
        filters.acknowledge(&server_filter("cluster=prod", 7));

        filters.set_from_raws(&["job=node", "cluster=prod", "team=infra"]);

        assert_eq!(filters.raws(), vec!["job=node", "cluster=prod", "team=infra"]);
        let kept = filters.get("cluster=prod").expect("kept filter");
        assert!(kept.applied);
        assert_eq!(kept.hits, 7);
        assert!(!filters.get("team=infra").expect("new filter").applied);
    }

    #[test]
    fn acknowledge_matches_by_raw_not_index() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "cluster=prod"]);

        assert!(filters.acknowledge(&server_filter("cluster=prod", 3)));
        assert!(!filters.acknowledge(&server_filter("unknown=1", 3)));

        assert!(!filters.values()[0].applied);
        assert!(filters.values()[1].applied);
        assert_eq!(filters.values()[1].hits, 3);
        assert_eq!(filters.values()[1].matcher, Some(Operator::Equal));
        assert_eq!(filters.pending(), 1);
    }

    #[test]
    fn apply_all_clears_pending() {
        let mut filters = FilterSet::new();
        filters.set(&["a=1", "b=2"]);
        assert_eq!(filters.pending(), 2);
        filters.apply_all();
        assert_eq!(filters.pending(), 0);
    }
}
