use std::sync::Arc;

use async_graphql::{Context, Object, Result, SimpleObject};

use crate::{
    api::FilterInput,
    catalog::Purpose,
    dashboard::{Dashboard, Tab},
    filter::{FilterContext, RawFilter},
    table::{DailyPoint, Overview, Table},
};

#[derive(Default)]
pub(super) struct AnalyticsQuery {}

/// A query result with every cell rendered as text.
#[derive(SimpleObject, Debug)]
struct TableView {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,

    /// Shown instead of the table when it has no rows.
    empty_message: Option<String>,

    /// A degraded condition, such as entity names being unavailable.
    note: Option<String>,
}

impl From<&Table> for TableView {
    fn from(table: &Table) -> Self {
        Self {
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            rows: table
                .rows
                .iter()
                .map(|row| row.iter().map(ToString::to_string).collect())
                .collect(),
            empty_message: None,
            note: None,
        }
    }
}

#[Object]
impl AnalyticsQuery {
    /// Headline indicators for the subject over the filter's window.
    async fn overview(&self, ctx: &Context<'_>, filter: FilterInput) -> Result<Overview> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let filter = FilterContext::build(&RawFilter::from(filter))?;
        Ok(dashboard.analytics(&filter).await?.overview)
    }

    /// Daily searches, sessions and clicks, ordered by date.
    async fn daily_series(
        &self,
        ctx: &Context<'_>,
        filter: FilterInput,
    ) -> Result<Vec<DailyPoint>> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let filter = FilterContext::build(&RawFilter::from(filter))?;
        Ok(dashboard.analytics(&filter).await?.daily)
    }

    /// The result table behind `purpose`. Purposes shown as dashboard tabs
    /// come back the way the tab presents them.
    async fn section(
        &self,
        ctx: &Context<'_>,
        filter: FilterInput,
        purpose: Purpose,
    ) -> Result<TableView> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let filter = FilterContext::build(&RawFilter::from(filter))?;

        match Tab::ALL.into_iter().find(|t| t.purpose() == purpose) {
            Some(tab) => {
                let section = dashboard.section(tab, &filter).await?;
                let mut view = TableView::from(&section.table);
                view.empty_message = section
                    .table
                    .is_empty()
                    .then_some(section.empty_message);
                view.note = section.note;
                Ok(view)
            }
            None => {
                let table = dashboard.table(purpose, &filter).await?;
                Ok(TableView::from(&*table))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::TestSchema,
        dashboard::tests::{dashboard, standard_executor},
        search::tests::FakeSearch,
        warehouse::tests::FakeExecutor,
    };

    const FILTER: &str =
        r#"{businessId: "42", experienceKey: "exp1", subject: "wifi password"}"#;

    #[tokio::test]
    async fn overview() {
        let schema = TestSchema::new();
        let query = format!(
            "{{ overview(filter: {FILTER}) {{ searches sessions clicks ctr kgResultRate }} }}"
        );
        let res = schema.execute(&query).await;
        assert_eq!(
            res.data.to_string(),
            "{overview: {searches: 10, sessions: 8, clicks: 4, ctr: 0.3, kgResultRate: 0.9}}"
        );
    }

    #[tokio::test]
    async fn daily_series() {
        let schema = TestSchema::new();
        let query = format!("{{ dailySeries(filter: {FILTER}) {{ date searches }} }}");
        let res = schema.execute(&query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{dailySeries: [{date: "2024-01-01", searches: 10}]}"#
        );
    }

    #[tokio::test]
    async fn results_section_carries_entity_names() {
        let schema = TestSchema::new();
        let query = format!(
            "{{ section(filter: {FILTER}, purpose: RESULTS) {{ columns rows emptyMessage }} }}"
        );
        let res = schema.execute(&query).await;
        let json = res.data.into_json().unwrap();

        assert_eq!(json["section"]["columns"][1], "NAME");
        assert_eq!(json["section"]["rows"][0][1], "Find your wifi password");
        assert!(json["section"]["emptyMessage"].is_null());
    }

    #[tokio::test]
    async fn empty_section_has_message() {
        let schema = TestSchema::new();
        let query = format!("{{ section(filter: {FILTER}, purpose: LOGS) {{ rows emptyMessage }} }}");
        let res = schema.execute(&query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{section: {rows: [], emptyMessage: "No recent searches for this search term with the selected filters."}}"#
        );
    }

    #[tokio::test]
    async fn warehouse_failure_is_a_graphql_error() {
        let executor = FakeExecutor {
            fail_on: Some("kg_result_rate".to_string()),
            ..standard_executor()
        };
        let schema = TestSchema::with_dashboard(dashboard(executor, FakeSearch::default()));
        let query = format!("{{ overview(filter: {FILTER}) {{ searches }} }}");
        let res = schema.execute(&query).await;

        assert!(res.errors[0].message.starts_with("warehouse query failed"));
    }
}
