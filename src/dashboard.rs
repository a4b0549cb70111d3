//! Assembles every section of the dashboard for one state.
//!
//! Sections are computed independently and carry their own outcome, so a
//! failing query only blanks the section that issued it.

use std::{collections::HashMap, sync::Arc};

use reqwest::Url;
use tracing::warn;

use crate::{
    catalog::{Catalog, Purpose},
    error::{Error, Result},
    filter::{FilterContext, Mode},
    resolver::{resolve, ResolvedQuery},
    search::{entity_names, vertical_previews, SearchGate, VerticalPreview},
    session::DashboardState,
    settings::Defaults,
    table::{daily_series, Cell, Column, ColumnKind, DailyPoint, Overview, Table},
    warehouse::Warehouse,
};

/// Number of entity cards shown per vertical in the test-search panel.
const PREVIEW_LIMIT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tab {
    Related,
    Results,
    Verticals,
    Source,
    Logs,
}

impl Tab {
    pub(crate) const ALL: [Tab; 5] = [
        Tab::Related,
        Tab::Results,
        Tab::Verticals,
        Tab::Source,
        Tab::Logs,
    ];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == value.trim())
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::Results => "results",
            Self::Verticals => "verticals",
            Self::Source => "source",
            Self::Logs => "logs",
        }
    }

    pub(crate) fn title(self) -> &'static str {
        match self {
            Self::Related => "Related Search Terms",
            Self::Results => "Most Popular Results",
            Self::Verticals => "Most Popular Verticals",
            Self::Source => "Integration Source",
            Self::Logs => "Search Logs",
        }
    }

    pub(crate) fn purpose(self) -> Purpose {
        match self {
            Self::Related => Purpose::Cluster,
            Self::Results => Purpose::Results,
            Self::Verticals => Purpose::Vertical,
            Self::Source => Purpose::Source,
            Self::Logs => Purpose::Logs,
        }
    }

    fn description(self, mode: Mode) -> String {
        let noun = mode.noun();
        match (self, mode) {
            (Self::Related, Mode::SearchTerm) => {
                "Other search terms in the same cluster as this search term.".to_string()
            }
            (Self::Related, Mode::Cluster) => "Search terms in this cluster.".to_string(),
            (Self::Results, _) => {
                format!("The most clicked results for this {noun}, sorted by popularity.")
            }
            (Self::Verticals, _) => {
                format!("The most clicked verticals for this {noun}, sorted by popularity.")
            }
            (Self::Source, _) => {
                "Search volume and engagement by custom integration source.".to_string()
            }
            (Self::Logs, _) => format!("A log of the most recent searches for this {noun}."),
        }
    }

    fn empty_message(self, mode: Mode) -> String {
        let noun = mode.noun();
        match (self, mode) {
            (Self::Related, Mode::SearchTerm) => "Search term is not part of a cluster.".to_string(),
            (Self::Related, Mode::Cluster) => {
                "No search terms in this cluster for the selected filters.".to_string()
            }
            (Self::Results, _) => {
                format!("No entities have been clicked for this {noun} with the selected filters.")
            }
            (Self::Verticals, _) => {
                format!("No verticals clicked for this {noun} with the selected filters.")
            }
            (Self::Source, _) => format!(
                "No searches on any integration sources for this {noun} with the selected filters."
            ),
            (Self::Logs, _) => {
                format!("No recent searches for this {noun} with the selected filters.")
            }
        }
    }
}

/// Where a linked cell's value goes in the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkTarget {
    /// Appended as the last path segment.
    PathSegment,
    /// Appended as the named query parameter.
    Query(&'static str),
}

/// Renders `column` cells as links built from `base` and the cell value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ColumnLink {
    pub(crate) column: String,
    pub(crate) base: Url,
    pub(crate) target: LinkTarget,
}

impl ColumnLink {
    pub(crate) fn href(&self, value: &str) -> String {
        match self.target {
            LinkTarget::PathSegment => platform_link(&self.base, &[value]),
            LinkTarget::Query(name) => {
                let mut url = self.base.clone();
                url.query_pairs_mut().append_pair(name, value);
                url.into()
            }
        }
    }
}

/// Appends `segments` to `base`, percent-encoding each one.
pub(crate) fn platform_link(base: &Url, segments: &[&str]) -> String {
    platform_url(base, segments).into()
}

fn platform_url(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SectionView {
    pub(crate) tab: Tab,
    pub(crate) description: String,
    pub(crate) table: Table,
    pub(crate) empty_message: String,
    pub(crate) links: Vec<ColumnLink>,
    /// A degraded but non-fatal condition, such as missing entity names.
    pub(crate) note: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AnalyticsView {
    pub(crate) overview: Overview,
    pub(crate) daily: Vec<DailyPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TestSearchView {
    pub(crate) term: String,
    pub(crate) previews: Result<Vec<VerticalPreview>, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SubjectView {
    pub(crate) subject: String,
    pub(crate) analytics: Result<AnalyticsView, String>,
    pub(crate) section: Result<SectionView, String>,
    /// Label and SQL of every query the page ran, for display.
    pub(crate) queries: Vec<(&'static str, String)>,
    pub(crate) test_search: TestSearchView,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DashboardView {
    pub(crate) state: DashboardState,
    pub(crate) mode: Mode,
    pub(crate) platform_url: Url,
    pub(crate) popular: Result<Vec<String>, String>,
    pub(crate) body: Result<SubjectView, String>,
}

/// The query-side services every dashboard request shares.
pub(crate) struct Dashboard {
    catalog: Arc<Catalog>,
    warehouse: Arc<Warehouse>,
    search: Arc<SearchGate>,
    defaults: Defaults,
}

impl Dashboard {
    pub(crate) fn new(
        catalog: Arc<Catalog>,
        warehouse: Arc<Warehouse>,
        search: Arc<SearchGate>,
        defaults: Defaults,
    ) -> Self {
        Self {
            catalog,
            warehouse,
            search,
            defaults,
        }
    }

    pub(crate) fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub(crate) fn resolve(&self, purpose: Purpose, ctx: &FilterContext) -> Result<ResolvedQuery> {
        resolve(&self.catalog, purpose, ctx)
    }

    pub(crate) async fn table(&self, purpose: Purpose, ctx: &FilterContext) -> Result<Arc<Table>> {
        let query = self.resolve(purpose, ctx)?;
        self.warehouse.fetch(&query).await
    }

    /// The most searched subjects of the last 30 days, most popular first.
    pub(crate) async fn popular(&self, ctx: &FilterContext) -> Result<Vec<String>> {
        let table = self.table(Purpose::Popular, ctx).await?;
        Ok(table
            .column("SUBJECT")
            .filter_map(|cell| match cell {
                Cell::Null => None,
                other => Some(other.to_string()),
            })
            .collect())
    }

    pub(crate) async fn analytics(&self, ctx: &FilterContext) -> Result<AnalyticsView> {
        let table = self.table(Purpose::Analytics, ctx).await?;
        Ok(AnalyticsView {
            overview: Overview::from_table(&table),
            daily: daily_series(&table),
        })
    }

    pub(crate) async fn entity_names(
        &self,
        term: &str,
        experience_key: &str,
    ) -> Result<HashMap<String, String>> {
        let response = self.search.search(term, experience_key).await?;
        Ok(entity_names(&response))
    }

    pub(crate) async fn section(&self, tab: Tab, ctx: &FilterContext) -> Result<SectionView> {
        let table = self.table(tab.purpose(), ctx).await?;
        let mut section = SectionView {
            tab,
            description: tab.description(ctx.mode),
            table: (*table).clone(),
            empty_message: tab.empty_message(ctx.mode),
            links: Vec::new(),
            note: None,
        };

        match tab {
            Tab::Related => {
                section.table =
                    section
                        .table
                        .select(&["SEARCH_TERM", "SEARCHES", "SESSIONS", "CLICKS", "CTR"]);
            }
            Tab::Results => {
                let names = match self.entity_names(&ctx.subject, &ctx.experience_key).await {
                    Ok(names) => names,
                    Err(e) => {
                        warn!(subject = %ctx.subject, "Entity names unavailable. {e}");
                        section.note = Some(format!("Entity names are unavailable: {e}"));
                        HashMap::new()
                    }
                };
                add_entity_names(&mut section.table, &names);
                section.table = section.table.select(&[
                    "ENTITY_ID",
                    "NAME",
                    "SEARCHES",
                    "SESSIONS",
                    "CLICKS",
                    "CTR",
                ]);
                let business_id = ctx.business_id.to_string();
                section.links.push(ColumnLink {
                    column: "ENTITY_ID".to_string(),
                    base: platform_url(
                        &self.defaults.platform_url,
                        &["s", &business_id, "entity", "edit3"],
                    ),
                    target: LinkTarget::Query("entityIds"),
                });
            }
            Tab::Logs => {
                let business_id = ctx.business_id.to_string();
                section.links.push(ColumnLink {
                    column: "QUERY_ID".to_string(),
                    base: platform_url(
                        &self.defaults.platform_url,
                        &[
                            "s",
                            &business_id,
                            "answers",
                            "experiences",
                            &ctx.experience_key,
                            "searchQueryLogDetails",
                        ],
                    ),
                    target: LinkTarget::PathSegment,
                });
            }
            Tab::Verticals | Tab::Source => {}
        }
        Ok(section)
    }

    async fn test_search(&self, term: &str, experience_key: &str) -> TestSearchView {
        let previews = self
            .search
            .search(term, experience_key)
            .await
            .map(|response| vertical_previews(&response, PREVIEW_LIMIT))
            .map_err(|e| e.to_string());
        TestSearchView {
            term: term.to_string(),
            previews,
        }
    }

    /// Builds the page for `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the state names no known mode;
    /// every other failure is reported inside the view.
    pub(crate) async fn build(&self, state: DashboardState) -> Result<DashboardView> {
        let mode = Mode::parse(&state.mode).ok_or_else(|| Error::Configuration(state.mode.clone()))?;

        let popular = match FilterContext::listing(&state.raw_filter("")) {
            Ok(ctx) => self.popular(&ctx).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let subject = state
            .s
            .clone()
            .or_else(|| popular.as_ref().ok().and_then(|p| p.first().cloned()));

        let body = match subject {
            None => Err(match &popular {
                Err(e) => e.clone(),
                Ok(_) => format!(
                    "No searches found for this experience; enter a {} to analyze.",
                    mode.noun()
                ),
            }),
            Some(subject) => match FilterContext::build(&state.raw_filter(&subject)) {
                Ok(ctx) => Ok(self.subject_view(&state, ctx).await),
                Err(e) => Err(e.to_string()),
            },
        };

        Ok(DashboardView {
            state,
            mode,
            platform_url: self.defaults.platform_url.clone(),
            popular,
            body,
        })
    }

    async fn subject_view(&self, state: &DashboardState, ctx: FilterContext) -> SubjectView {
        let tab = Tab::parse(&state.tab).ok_or_else(|| format!("Unknown tab `{}`.", state.tab));
        let term = state.q.clone().unwrap_or_else(|| ctx.subject.clone());

        let section = async {
            match &tab {
                Ok(tab) => self.section(*tab, &ctx).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.clone()),
            }
        };
        let (analytics, section, test_search) = tokio::join!(
            self.analytics(&ctx),
            section,
            self.test_search(&term, &ctx.experience_key),
        );

        let mut queries = Vec::new();
        if let Ok(query) = self.resolve(Purpose::Analytics, &ctx) {
            queries.push(("Analytics Overview", query.to_string()));
        }
        if let Some(query) = tab.ok().and_then(|t| self.resolve(t.purpose(), &ctx).ok()) {
            queries.push(("Details Query", query.to_string()));
        }

        SubjectView {
            subject: ctx.subject.clone(),
            analytics: analytics.map_err(|e| e.to_string()),
            section,
            queries,
            test_search,
        }
    }
}

fn add_entity_names(table: &mut Table, names: &HashMap<String, String>) {
    let Some(id) = table.column_index("ENTITY_ID") else {
        return;
    };
    table.push_column(Column::new("NAME", ColumnKind::Text), |row| {
        let name = row
            .get(id)
            .and_then(|cell| names.get(&cell.to_string()))
            .cloned()
            .unwrap_or_default();
        Cell::Text(name)
    });
}
