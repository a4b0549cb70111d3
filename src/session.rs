use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    filter::{ConfigLabel, DateWindow, Mode, RawFilter, TrafficType},
    settings::Defaults,
};

/// Everything the dashboard URL carries. Values are kept as given and only
/// validated when a [`FilterContext`](crate::filter::FilterContext) is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DashboardState {
    pub(crate) b: String,
    pub(crate) e: String,
    pub(crate) mode: String,
    pub(crate) d: String,
    pub(crate) l: String,
    pub(crate) t: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) s: Option<String>,
    pub(crate) tab: String,
    /// Free-text term for the test-search panel; the subject when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) q: Option<String>,
}

pub(crate) const DEFAULT_TAB: &str = "related";

impl DashboardState {
    pub(crate) fn with_defaults(defaults: &Defaults) -> Self {
        Self {
            b: defaults.business_id.to_string(),
            e: defaults.experience_key.clone(),
            mode: Mode::default().code().to_string(),
            d: DateWindow::default().code(),
            l: ConfigLabel::default().code().to_string(),
            t: TrafficType::default().code().to_string(),
            s: None,
            tab: DEFAULT_TAB.to_string(),
            q: None,
        }
    }

    /// Reads the state from URL query parameters. Absent or blank keys take
    /// their defaults; everything else is kept verbatim.
    pub(crate) fn from_query(params: &HashMap<String, String>, defaults: &Defaults) -> Self {
        let mut state = Self::with_defaults(defaults);
        for (key, value) in params {
            if value.trim().is_empty() {
                continue;
            }
            state.set(key, value);
        }
        state
    }

    fn set(&mut self, key: &str, value: &str) {
        let value = value.to_string();
        match key {
            "b" => self.b = value,
            "e" => self.e = value,
            "mode" => self.mode = value,
            "d" => self.d = value,
            "l" => self.l = value,
            "t" => self.t = value,
            "s" => self.s = Some(value),
            "tab" => self.tab = value,
            "q" => self.q = Some(value),
            _ => {}
        }
    }

    /// A copy of this state with one key changed.
    ///
    /// Switching mode, business or experience drops the subject, since it
    /// would not name anything in the new selection.
    pub(crate) fn with(&self, key: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.set(key, value);
        if matches!(key, "mode" | "b" | "e") && next != *self {
            next.s = None;
        }
        if matches!(key, "mode" | "b" | "e" | "s") {
            next.q = None;
        }
        next
    }

    /// Serializes the state for a URL. The URL is derived from the state,
    /// never the other way around.
    pub(crate) fn to_query_string(&self) -> String {
        serde_urlencoded::to_string(self).unwrap_or_default()
    }

    pub(crate) fn raw_filter(&self, subject: &str) -> RawFilter {
        RawFilter {
            business_id: self.b.clone(),
            experience_key: self.e.clone(),
            date_window: self.d.clone(),
            traffic_type: self.t.clone(),
            config_label: self.l.clone(),
            subject: subject.to_string(),
            mode: self.mode.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_defaults() -> Defaults {
    Defaults {
        business_id: 42,
        experience_key: "exp1".to_string(),
        platform_url: "https://www.example.com".parse().unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn empty_query_uses_defaults() {
        let state = DashboardState::from_query(&HashMap::new(), &sample_defaults());

        assert_eq!(state.b, "42");
        assert_eq!(state.e, "exp1");
        assert_eq!(state.mode, "SEARCH_TERM");
        assert_eq!(state.d, "30");
        assert_eq!(state.l, "PRODUCTION");
        assert_eq!(state.t, "EXTERNAL");
        assert_eq!(state.s, None);
        assert_eq!(state.tab, DEFAULT_TAB);
    }

    #[test]
    fn present_values_are_kept_verbatim() {
        let state = DashboardState::from_query(
            &params(&[("mode", "CLUSTER"), ("d", "14"), ("s", "connectivity"), ("x", "1")]),
            &sample_defaults(),
        );

        assert_eq!(state.mode, "CLUSTER");
        assert_eq!(state.d, "14");
        assert_eq!(state.s.as_deref(), Some("connectivity"));
    }

    #[test]
    fn query_string_round_trips_through_from_query() {
        let state = DashboardState::with_defaults(&sample_defaults()).with("s", "wifi & router");
        let encoded = state.to_query_string();
        assert!(encoded.contains("s=wifi+%26+router"));

        let decoded: HashMap<String, String> = serde_urlencoded::from_str(&encoded).unwrap();
        assert_eq!(DashboardState::from_query(&decoded, &sample_defaults()), state);
    }

    #[test]
    fn absent_subject_is_not_serialized() {
        let state = DashboardState::with_defaults(&sample_defaults());
        assert!(!state.to_query_string().contains("s="));
    }

    #[test]
    fn changing_mode_drops_subject() {
        let state = DashboardState::with_defaults(&sample_defaults()).with("s", "wifi");

        assert_eq!(state.with("mode", "CLUSTER").s, None);
        assert_eq!(state.with("mode", "SEARCH_TERM").s.as_deref(), Some("wifi"));
        assert_eq!(state.with("tab", "logs").s.as_deref(), Some("wifi"));

        let searched = state.with("q", "router reset");
        assert_eq!(searched.with("s", "modem").q, None);
    }
}
