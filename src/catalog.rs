//! Fixed SQL templates for every analysis purpose and mode.
//!
//! Templates carry the named placeholders `{b}` (business id), `{e}`
//! (experience key), `{d}` (day offset), `{t}` (traffic predicate), `{l}`
//! (configuration label predicate) and `{s}` (subject). Each skeleton is
//! written once; the per-mode differences come from [`ModeFragments`].

use std::{collections::HashMap, fmt};

use async_graphql::Enum;

use crate::filter::Mode;

#[derive(Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Purpose {
    /// Daily searches, sessions, clicks, CTR and KG result rate.
    Analytics,
    /// Related search terms sharing a cluster.
    Cluster,
    /// Most clicked result entities.
    Results,
    /// Most clicked verticals.
    Vertical,
    /// Engagement by integration source.
    Source,
    /// Most recent individual searches.
    Logs,
    /// The 50 most searched subjects of the last 30 days.
    Popular,
}

impl Purpose {
    #[cfg(test)]
    pub(crate) const ALL: [Purpose; 7] = [
        Purpose::Analytics,
        Purpose::Cluster,
        Purpose::Results,
        Purpose::Vertical,
        Purpose::Source,
        Purpose::Logs,
        Purpose::Popular,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Cluster => "cluster",
            Self::Results => "results",
            Self::Vertical => "vertical",
            Self::Source => "source",
            Self::Logs => "logs",
            Self::Popular => "popular",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The only SQL that differs between the two template families.
struct ModeFragments {
    cluster_join: &'static str,
    subject_column: &'static str,
}

const CLUSTER_JOIN_MARKER: &str = "    @cluster_join@\n";
const SUBJECT_COLUMN_MARKER: &str = "@subject_column@";

fn fragments(mode: Mode) -> ModeFragments {
    match mode {
        Mode::SearchTerm => ModeFragments {
            cluster_join: "",
            subject_column: "searches.tokenizer_normalized_query",
        },
        Mode::Cluster => ModeFragments {
            cluster_join: "    join current_cluster_search_terms on searches.business_id = current_cluster_search_terms.business_id and searches.experience_key = current_cluster_search_terms.experience_key and searches.tokenizer_normalized_query = current_cluster_search_terms.search_term\n",
            subject_column: "current_cluster_search_terms.cluster_name",
        },
    }
}

/// Skeletons shared by both modes unless an entry names a mode.
const SKELETONS: &[(Purpose, Option<Mode>, &str)] = &[
    (Purpose::Popular, None, POPULAR),
    (Purpose::Analytics, None, ANALYTICS),
    (Purpose::Cluster, Some(Mode::SearchTerm), RELATED_TERMS),
    (Purpose::Cluster, Some(Mode::Cluster), CLUSTER_MEMBERS),
    (Purpose::Results, None, RESULTS),
    (Purpose::Vertical, None, VERTICALS),
    (Purpose::Source, None, SOURCES),
    (Purpose::Logs, None, LOGS),
];

/// Process-wide, read-only template table.
#[derive(Debug)]
pub(crate) struct Catalog {
    templates: HashMap<(Mode, Purpose), String>,
}

impl Catalog {
    pub(crate) fn new() -> Self {
        let mut templates = HashMap::new();
        for mode in Mode::ALL {
            let fragments = fragments(mode);
            for &(purpose, only, skeleton) in SKELETONS {
                if only.is_some_and(|m| m != mode) {
                    continue;
                }
                let template = skeleton
                    .replace(CLUSTER_JOIN_MARKER, fragments.cluster_join)
                    .replace(SUBJECT_COLUMN_MARKER, fragments.subject_column);
                templates.insert((mode, purpose), template);
            }
        }
        Self { templates }
    }

    #[cfg(test)]
    pub(crate) fn from_templates(templates: HashMap<(Mode, Purpose), String>) -> Self {
        Self { templates }
    }

    pub(crate) fn template(&self, mode: Mode, purpose: Purpose) -> Option<&str> {
        self.templates.get(&(mode, purpose)).map(String::as_str)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

const POPULAR: &str = "
select @subject_column@ as subject
from
    searches
    @cluster_join@
where
    date(searches.timestamp) > dateadd('day', -30, current_date())
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
group by 1
order by count(distinct searches.query_id) desc
limit 50
";

const ANALYTICS: &str = "
select
    date(searches.timestamp) as date,
    count(distinct user_data.session_id) as sessions,
    count(distinct searches.query_id) as searches,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    round(div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)), 2) as ctr,
    round(div0(count(distinct case when searches.has_kg_results then searches.query_id end), count(distinct searches.query_id)), 2) as kg_result_rate
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
    left join user_events on searches.id = user_events.search_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
group by 1
";

const RELATED_TERMS: &str = "
with cluster as (
    select business_id, experience_key, cluster_id
    from current_cluster_search_terms
    where
        search_term = '{s}'
        and business_id = {b}
        and experience_key = '{e}'
        and not is_noise
        and not is_overlarge
)
select
    search_term,
    count(distinct searches.query_id) as searches,
    count(distinct user_data.session_id) as sessions,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    round(div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)), 2) as ctr
from
    cluster
    join current_cluster_search_terms using (business_id, experience_key, cluster_id)
    left join searches on searches.business_id = cluster.business_id and searches.experience_key = cluster.experience_key and searches.tokenizer_normalized_query = current_cluster_search_terms.search_term
    left join user_data on searches.id = user_data.search_id
    left join user_events on searches.id = user_events.search_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and search_term != '{s}'
group by 1
order by 2 desc
limit 10
";

const CLUSTER_MEMBERS: &str = "
select
    current_cluster_search_terms.search_term,
    count(distinct searches.query_id) as searches,
    count(distinct user_data.session_id) as sessions,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    round(div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)), 2) as ctr
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
    left join user_events on searches.id = user_events.search_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
group by 1
order by 2 desc
limit 10
";

const RESULTS: &str = "
select
    results.entity_id,
    count(distinct searches.query_id) as searches,
    count(distinct user_data.session_id) as sessions,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    round(div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)), 2) as ctr
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
    left join vertical_searchers on searches.id = vertical_searchers.search_id
    left join results on vertical_searchers.id = results.vertical_searcher_id
    left join user_events on searches.id = user_events.search_id and vertical_searchers.id = user_events.vertical_searcher_id and results.entity_id = user_events.entity_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
group by 1
having clicks > 0
order by clicks desc, searches desc
limit 10
";

const VERTICALS: &str = "
select
    vertical_searchers.vertical_id,
    count(distinct searches.query_id) as searches,
    count(distinct user_data.session_id) as sessions,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)) as ctr
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
    left join vertical_searchers on searches.id = vertical_searchers.search_id
    left join user_events on searches.id = user_events.search_id and vertical_searchers.id = user_events.vertical_searcher_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
group by 1
having clicks > 0
order by clicks desc, searches desc
limit 10
";

const SOURCES: &str = "
select
    user_data.query_source,
    count(distinct searches.query_id) as searches,
    count(distinct user_data.session_id) as sessions,
    count(case when user_event_types.is_click_event then 1 end) as clicks,
    div0(count(distinct case when user_event_types.is_click_event then searches.query_id end), count(distinct searches.query_id)) as ctr
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
    left join user_events on searches.id = user_events.search_id
    left join user_event_types on user_events.user_event_type_id = user_event_types.id
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
group by 1
having clicks > 0
order by clicks desc, searches desc
limit 10
";

const LOGS: &str = r#"
select
    searches.timestamp,
    searches.query_id,
    searches.tokenizer_normalized_query as query,
    concat(user_data.city, ', ', user_data.region) as city,
    user_data.country,
    concat(user_data.latitude, ', ', user_data.longitude) as "LAT, LONG"
from
    searches
    join user_data on searches.id = user_data.search_id
    @cluster_join@
where
    date(searches.timestamp) > dateadd('day', {d}, current_date())
    and user_data.traffic_source {t}
    and searches.version_label {l}
    and searches.business_id = {b}
    and searches.experience_key = '{e}'
    and @subject_column@ = '{s}'
order by 1 desc
limit 10
"#;
