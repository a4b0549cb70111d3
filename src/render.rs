//! Template structs for the HTML dashboard.
//!
//! Views are flattened into plain strings here so the templates only loop
//! and branch. Askama escapes every interpolated value.

use askama::Template;

use crate::{
    dashboard::{platform_link, DashboardView, SectionView, Tab},
    filter::{ConfigLabel, DateWindow, Mode, TrafficType},
    search::VerticalPreview,
    session::DashboardState,
    table::{DailyPoint, Overview},
};

const CHART_WIDTH: f64 = 640.0;
const CHART_HEIGHT: f64 = 180.0;

/// A selectable option rendered as a link to the state it selects.
pub(crate) struct Choice {
    pub(crate) label: String,
    pub(crate) href: String,
    pub(crate) selected: bool,
}

pub(crate) struct Indicator {
    pub(crate) label: &'static str,
    pub(crate) value: String,
}

pub(crate) struct Series {
    pub(crate) name: &'static str,
    pub(crate) class: &'static str,
    pub(crate) points: String,
}

pub(crate) struct Chart {
    pub(crate) width: f64,
    pub(crate) height: f64,
    pub(crate) first_date: String,
    pub(crate) last_date: String,
    pub(crate) series: Vec<Series>,
}

pub(crate) struct HtmlCell {
    pub(crate) text: String,
    pub(crate) href: Option<String>,
}

pub(crate) struct SectionBlock {
    pub(crate) description: String,
    pub(crate) note: Option<String>,
    pub(crate) headers: Vec<String>,
    pub(crate) rows: Vec<Vec<HtmlCell>>,
    /// Set when the table has no rows.
    pub(crate) empty_message: Option<String>,
}

pub(crate) struct QueryBlock {
    pub(crate) label: &'static str,
    pub(crate) sql: String,
}

pub(crate) struct HiddenField {
    pub(crate) name: &'static str,
    pub(crate) value: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub(crate) struct DashboardPage {
    pub(crate) title: String,
    pub(crate) business_id: String,
    pub(crate) experience_key: String,
    pub(crate) breadcrumb_label: &'static str,
    pub(crate) breadcrumb_href: String,
    pub(crate) modes: Vec<Choice>,
    pub(crate) popular: Vec<Choice>,
    pub(crate) popular_error: Option<String>,
    pub(crate) dates: Vec<Choice>,
    pub(crate) labels: Vec<Choice>,
    pub(crate) traffic: Vec<Choice>,
    pub(crate) body_error: Option<String>,
    pub(crate) indicators: Vec<Indicator>,
    pub(crate) chart: Option<Chart>,
    pub(crate) analytics_error: Option<String>,
    pub(crate) tabs: Vec<Choice>,
    pub(crate) section: Option<SectionBlock>,
    pub(crate) section_error: Option<String>,
    pub(crate) queries: Vec<QueryBlock>,
    pub(crate) experience_fields: Vec<HiddenField>,
    pub(crate) search_fields: Vec<HiddenField>,
    pub(crate) search_term: String,
    pub(crate) previews: Vec<VerticalPreview>,
    pub(crate) search_error: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub(crate) struct ErrorPage {
    pub(crate) message: String,
}

fn choice(state: &DashboardState, key: &str, value: &str, label: &str, selected: bool) -> Choice {
    Choice {
        label: label.to_string(),
        href: format!("?{}", state.with(key, value).to_query_string()),
        selected,
    }
}

fn hidden_fields(state: &DashboardState, skip: &[&str]) -> Vec<HiddenField> {
    let fields: [(&'static str, Option<&String>); 9] = [
        ("b", Some(&state.b)),
        ("e", Some(&state.e)),
        ("mode", Some(&state.mode)),
        ("d", Some(&state.d)),
        ("l", Some(&state.l)),
        ("t", Some(&state.t)),
        ("s", state.s.as_ref()),
        ("tab", Some(&state.tab)),
        ("q", state.q.as_ref()),
    ];
    fields
        .into_iter()
        .filter(|(name, _)| !skip.contains(name))
        .filter_map(|(name, value)| {
            value.map(|value| HiddenField {
                name,
                value: value.clone(),
            })
        })
        .collect()
}

fn indicators(overview: &Overview) -> Vec<Indicator> {
    vec![
        Indicator {
            label: "Searches",
            value: overview.searches.to_string(),
        },
        Indicator {
            label: "Sessions",
            value: overview.sessions.to_string(),
        },
        Indicator {
            label: "Clicks",
            value: overview.clicks.to_string(),
        },
        Indicator {
            label: "CTR",
            value: format!("{:.2}", overview.ctr),
        },
        Indicator {
            label: "KG Result Rate",
            value: format!("{:.2}", overview.kg_result_rate),
        },
    ]
}

/// Line chart of the daily totals, scaled to the largest value.
pub(crate) fn chart(daily: &[DailyPoint]) -> Option<Chart> {
    let (first, last) = (daily.first()?, daily.last()?);
    #[allow(clippy::cast_precision_loss)]
    let max = daily
        .iter()
        .map(|p| p.searches.max(p.sessions).max(p.clicks))
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    #[allow(clippy::cast_precision_loss)]
    let step = if daily.len() > 1 {
        CHART_WIDTH / (daily.len() - 1) as f64
    } else {
        0.0
    };

    let points = |value: fn(&DailyPoint) -> i64| {
        daily
            .iter()
            .enumerate()
            .map(|(i, p)| {
                #[allow(clippy::cast_precision_loss)]
                let x = step * i as f64;
                #[allow(clippy::cast_precision_loss)]
                let y = CHART_HEIGHT - (value(p) as f64 / max) * CHART_HEIGHT;
                format!("{x:.1},{y:.1}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    };

    Some(Chart {
        width: CHART_WIDTH,
        height: CHART_HEIGHT,
        first_date: first.date.clone(),
        last_date: last.date.clone(),
        series: vec![
            Series {
                name: "Searches",
                class: "searches",
                points: points(|p| p.searches),
            },
            Series {
                name: "Sessions",
                class: "sessions",
                points: points(|p| p.sessions),
            },
            Series {
                name: "Clicks",
                class: "clicks",
                points: points(|p| p.clicks),
            },
        ],
    })
}

pub(crate) fn section_block(section: &SectionView) -> SectionBlock {
    let table = &section.table;
    let links: Vec<_> = table
        .columns
        .iter()
        .map(|c| {
            section
                .links
                .iter()
                .find(|l| l.column.eq_ignore_ascii_case(&c.name))
        })
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&links)
                .map(|(cell, link)| {
                    let text = cell.to_string();
                    HtmlCell {
                        href: link.map(|link| link.href(&text)),
                        text,
                    }
                })
                .collect()
        })
        .collect();

    SectionBlock {
        description: section.description.clone(),
        note: section.note.clone(),
        headers: table.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
        empty_message: table.is_empty().then(|| section.empty_message.clone()),
    }
}

impl DashboardPage {
    pub(crate) fn new(view: &DashboardView) -> Self {
        let state = &view.state;
        let subject = view.body.as_ref().ok().map(|b| b.subject.clone());
        let (breadcrumb_label, breadcrumb_page) = match view.mode {
            Mode::SearchTerm => ("Search Terms", "uniqueQueries"),
            Mode::Cluster => ("Search Term Clusters", "clusters"),
        };
        let current_subject = subject.clone().unwrap_or_default();
        let date = DateWindow::parse(&state.d);
        let config_label = ConfigLabel::parse(&state.l);
        let traffic = TrafficType::parse(&state.t);
        let tab = Tab::parse(&state.tab);

        let mut page = Self {
            title: subject.unwrap_or_else(|| "Search Term Dashboard".to_string()),
            business_id: state.b.clone(),
            experience_key: state.e.clone(),
            breadcrumb_label,
            breadcrumb_href: platform_link(
                &view.platform_url,
                &["s", &state.b, "answers", "experiences", &state.e, breadcrumb_page],
            ),
            modes: Mode::ALL
                .iter()
                .map(|m| {
                    let label = match m {
                        Mode::SearchTerm => "Search Term",
                        Mode::Cluster => "Cluster",
                    };
                    choice(state, "mode", m.code(), label, *m == view.mode)
                })
                .collect(),
            popular: Vec::new(),
            popular_error: None,
            dates: DateWindow::ALL
                .iter()
                .map(|d| choice(state, "d", &d.code(), d.label(), date == Some(*d)))
                .collect(),
            labels: ConfigLabel::ALL
                .iter()
                .map(|l| choice(state, "l", l.code(), l.label(), config_label == Some(*l)))
                .collect(),
            traffic: TrafficType::ALL
                .iter()
                .map(|t| choice(state, "t", t.code(), t.label(), traffic == Some(*t)))
                .collect(),
            body_error: None,
            indicators: Vec::new(),
            chart: None,
            analytics_error: None,
            tabs: Tab::ALL
                .iter()
                .map(|t| choice(state, "tab", t.code(), t.title(), tab == Some(*t)))
                .collect(),
            section: None,
            section_error: None,
            queries: Vec::new(),
            experience_fields: hidden_fields(state, &["b", "e", "s", "q"]),
            search_fields: hidden_fields(state, &["q"]),
            search_term: String::new(),
            previews: Vec::new(),
            search_error: None,
        };

        match &view.popular {
            Ok(subjects) => {
                page.popular = subjects
                    .iter()
                    .map(|s| choice(state, "s", s, s, *s == current_subject))
                    .collect();
            }
            Err(e) => page.popular_error = Some(e.clone()),
        }

        let body = match &view.body {
            Ok(body) => body,
            Err(e) => {
                page.body_error = Some(e.clone());
                return page;
            }
        };

        match &body.analytics {
            Ok(analytics) => {
                page.indicators = indicators(&analytics.overview);
                page.chart = chart(&analytics.daily);
            }
            Err(e) => page.analytics_error = Some(e.clone()),
        }
        match &body.section {
            Ok(section) => page.section = Some(section_block(section)),
            Err(e) => page.section_error = Some(e.clone()),
        }
        page.queries = body
            .queries
            .iter()
            .map(|(label, sql)| QueryBlock {
                label: *label,
                sql: sql.clone(),
            })
            .collect();
        page.search_term = body.test_search.term.clone();
        match &body.test_search.previews {
            Ok(previews) => page.previews = previews.clone(),
            Err(e) => page.search_error = Some(e.clone()),
        }
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dashboard::{AnalyticsView, ColumnLink, LinkTarget, SubjectView, TestSearchView},
        session::sample_defaults,
        table::{Cell, Column, ColumnKind, Table},
    };

    fn section(table: Table) -> SectionView {
        SectionView {
            tab: Tab::Logs,
            description: "A log of the most recent searches for this search term.".to_string(),
            table,
            empty_message: "No recent searches for this search term with the selected filters."
                .to_string(),
            links: vec![ColumnLink {
                column: "QUERY_ID".to_string(),
                base: "https://www.example.com/logs".parse().unwrap(),
                target: LinkTarget::PathSegment,
            }],
            note: None,
        }
    }

    fn view(section: Result<SectionView, String>) -> DashboardView {
        DashboardView {
            state: DashboardState::with_defaults(&sample_defaults()).with("s", "wifi <password>"),
            mode: Mode::SearchTerm,
            platform_url: "https://www.example.com".parse().unwrap(),
            popular: Ok(vec!["wifi <password>".to_string()]),
            body: Ok(SubjectView {
                subject: "wifi <password>".to_string(),
                analytics: Ok(AnalyticsView {
                    overview: Overview::default(),
                    daily: Vec::new(),
                }),
                section,
                queries: vec![("Details Query", "select 1".to_string())],
                test_search: TestSearchView {
                    term: "wifi <password>".to_string(),
                    previews: Ok(Vec::new()),
                },
            }),
        }
    }

    #[test]
    fn empty_table_renders_no_data_message() {
        let html = DashboardPage::new(&view(Ok(section(Table::default()))))
            .render()
            .unwrap();

        assert!(html.contains("No recent searches for this search term with the selected filters."));
        assert!(!html.contains("<table class=\"section\">"));
    }

    #[test]
    fn linked_cells_render_as_anchors() {
        let table = Table::new(
            vec![Column::new("QUERY_ID", ColumnKind::Text)],
            vec![
                vec![Cell::Text("q-1".to_string())],
                vec![Cell::Text("q 2?x#y".to_string())],
            ],
        );
        let block = section_block(&section(table));

        assert_eq!(block.empty_message, None);
        assert_eq!(
            block.rows[0][0].href.as_deref(),
            Some("https://www.example.com/logs/q-1")
        );
        assert_eq!(
            block.rows[1][0].href.as_deref(),
            Some("https://www.example.com/logs/q%202%3Fx%23y")
        );
        assert_eq!(block.rows[1][0].text, "q 2?x#y");
    }

    #[test]
    fn breadcrumb_encodes_experience_key() {
        let mut view = view(Ok(section(Table::default())));
        view.state.e = "help center?v=2".to_string();
        let page = DashboardPage::new(&view);

        assert_eq!(
            page.breadcrumb_href,
            "https://www.example.com/s/42/answers/experiences/help%20center%3Fv=2/uniqueQueries"
        );
    }

    #[test]
    fn labelled_filter_values_mark_their_choice() {
        let mut view = view(Ok(section(Table::default())));
        view.state.d = "last 90 days".to_string();
        view.state.t = "all traffic".to_string();
        let page = DashboardPage::new(&view);

        let selected = |choices: &[Choice]| {
            choices
                .iter()
                .filter(|c| c.selected)
                .map(|c| c.label.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(selected(&page.dates), vec!["Last 90 Days"]);
        assert_eq!(selected(&page.traffic), vec!["All Traffic"]);
        assert_eq!(selected(&page.labels), vec!["PRODUCTION"]);
        assert_eq!(selected(&page.modes), vec!["Search Term"]);
        assert_eq!(selected(&page.tabs), vec!["Related Search Terms"]);
    }

    #[test]
    fn subject_is_escaped() {
        let html = DashboardPage::new(&view(Ok(section(Table::default()))))
            .render()
            .unwrap();

        assert!(html.contains("wifi &lt;password&gt;"));
        assert!(!html.contains("wifi <password>"));
    }

    #[test]
    fn section_error_does_not_hide_overview() {
        let html = DashboardPage::new(&view(Err("warehouse query failed: boom".to_string())))
            .render()
            .unwrap();

        assert!(html.contains("warehouse query failed: boom"));
        assert!(html.contains("KG Result Rate"));
    }

    #[test]
    fn chart_scales_to_largest_value() {
        let daily = vec![
            DailyPoint {
                date: "2024-01-01".to_string(),
                searches: 10,
                sessions: 5,
                clicks: 0,
            },
            DailyPoint {
                date: "2024-01-02".to_string(),
                searches: 5,
                sessions: 5,
                clicks: 5,
            },
        ];
        let chart = chart(&daily).unwrap();

        assert_eq!(chart.series[0].points, "0.0,0.0 640.0,90.0");
        assert_eq!(chart.series[2].points, "0.0,180.0 640.0,90.0");
        assert!(super::chart(&[]).is_none());
    }
}
