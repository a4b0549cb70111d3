use std::fmt;

use crate::error::{Error, Result};

/// Which template family a dashboard session queries with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum Mode {
    #[default]
    SearchTerm,
    Cluster,
}

impl Mode {
    pub(crate) const ALL: [Mode; 2] = [Mode::SearchTerm, Mode::Cluster];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SEARCH_TERM" | "SEARCH TERM" => Some(Self::SearchTerm),
            "CLUSTER" => Some(Self::Cluster),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            Self::SearchTerm => "SEARCH_TERM",
            Self::Cluster => "CLUSTER",
        }
    }

    /// Lower-case noun used in sentences ("this search term").
    pub(crate) fn noun(self) -> &'static str {
        match self {
            Self::SearchTerm => "search term",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum DateWindow {
    Last7Days,
    #[default]
    Last30Days,
    Last90Days,
    Last12Weeks,
}

impl DateWindow {
    pub(crate) const ALL: [DateWindow; 4] = [
        DateWindow::Last7Days,
        DateWindow::Last30Days,
        DateWindow::Last90Days,
        DateWindow::Last12Weeks,
    ];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|w| {
            w.days().to_string() == value || w.label().eq_ignore_ascii_case(value)
        })
    }

    pub(crate) fn days(self) -> u32 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
            Self::Last12Weeks => 84,
        }
    }

    /// Day offset from today, always negative.
    pub(crate) fn offset(self) -> i64 {
        -i64::from(self.days())
    }

    pub(crate) fn code(self) -> String {
        self.days().to_string()
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Last7Days => "Last 7 Days",
            Self::Last30Days => "Last 30 Days",
            Self::Last90Days => "Last 90 Days",
            Self::Last12Weeks => "Last 12 Weeks",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum TrafficType {
    All,
    #[default]
    External,
    Internal,
}

impl TrafficType {
    pub(crate) const ALL: [TrafficType; 3] =
        [TrafficType::All, TrafficType::External, TrafficType::Internal];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(value) || t.label().eq_ignore_ascii_case(value))
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::External => "EXTERNAL",
            Self::Internal => "INTERNAL",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::All => "All Traffic",
            Self::External => "External",
            Self::Internal => "Internal",
        }
    }

    /// Predicate applied to `user_data.traffic_source`.
    pub(crate) fn predicate(self) -> &'static str {
        match self {
            Self::All => "in ('EXTERNAL', 'INTERNAL')",
            Self::External => "= 'EXTERNAL'",
            Self::Internal => "= 'INTERNAL'",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum ConfigLabel {
    All,
    Staging,
    #[default]
    Production,
}

impl ConfigLabel {
    pub(crate) const ALL: [ConfigLabel; 3] =
        [ConfigLabel::All, ConfigLabel::Staging, ConfigLabel::Production];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(value) || l.label().eq_ignore_ascii_case(value))
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Staging => "STAGING",
            Self::Production => "PRODUCTION",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::All => "All Configuration Labels",
            Self::Staging => "STAGING",
            Self::Production => "PRODUCTION",
        }
    }

    /// Predicate applied to `searches.version_label`.
    pub(crate) fn predicate(self) -> &'static str {
        match self {
            Self::All => "in ('STAGING','PRODUCTION')",
            Self::Staging => "= 'STAGING'",
            Self::Production => "= 'PRODUCTION'",
        }
    }
}

/// Unvalidated filter values as they arrive from a URL or a GraphQL input.
#[derive(Clone, Debug, Default)]
pub(crate) struct RawFilter {
    pub(crate) business_id: String,
    pub(crate) experience_key: String,
    pub(crate) date_window: String,
    pub(crate) traffic_type: String,
    pub(crate) config_label: String,
    pub(crate) subject: String,
    pub(crate) mode: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FilterContext {
    pub(crate) business_id: u64,
    pub(crate) experience_key: String,
    pub(crate) date_window: DateWindow,
    pub(crate) traffic_type: TrafficType,
    pub(crate) config_label: ConfigLabel,
    pub(crate) subject: String,
    pub(crate) mode: Mode,
}

impl FilterContext {
    /// Validates every field of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown mode and
    /// [`Error::Validation`] naming the first offending field otherwise.
    pub(crate) fn build(raw: &RawFilter) -> Result<Self> {
        let mode = Mode::parse(&raw.mode).ok_or_else(|| Error::Configuration(raw.mode.clone()))?;
        let business_id = parse_business_id(&raw.business_id)?;
        let experience_key = non_empty("experience_key", &raw.experience_key)?;
        let date_window = DateWindow::parse(&raw.date_window)
            .ok_or_else(|| unknown_member("date_window", &raw.date_window))?;
        let traffic_type = TrafficType::parse(&raw.traffic_type)
            .ok_or_else(|| unknown_member("traffic_type", &raw.traffic_type))?;
        let config_label = ConfigLabel::parse(&raw.config_label)
            .ok_or_else(|| unknown_member("config_label", &raw.config_label))?;
        let subject = non_empty("subject", &raw.subject)?;

        Ok(Self {
            business_id,
            experience_key,
            date_window,
            traffic_type,
            config_label,
            subject,
            mode,
        })
    }

    /// Validates everything but the subject, for queries that list subjects
    /// rather than analyze one. Resolving a template that needs `{s}` with
    /// this context fails.
    pub(crate) fn listing(raw: &RawFilter) -> Result<Self> {
        let with_subject = RawFilter {
            subject: "-".to_string(),
            ..raw.clone()
        };
        Ok(Self {
            subject: String::new(),
            ..Self::build(&with_subject)?
        })
    }
}

pub(crate) fn parse_business_id(value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::validation(
            "business_id",
            format!("`{value}` is not a positive integer"),
        )),
    }
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn unknown_member(field: &'static str, value: &str) -> Error {
    Error::validation(field, format!("`{value}` is not a recognized option"))
}

#[cfg(test)]
pub(crate) fn sample_filter() -> RawFilter {
    RawFilter {
        business_id: "42".to_string(),
        experience_key: "exp1".to_string(),
        date_window: "30".to_string(),
        traffic_type: "EXTERNAL".to_string(),
        config_label: "PRODUCTION".to_string(),
        subject: "wifi password".to_string(),
        mode: "SEARCH_TERM".to_string(),
    }
}
