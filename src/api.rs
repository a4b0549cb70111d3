mod analytics;
mod subject;

use std::sync::Arc;

use async_graphql::{EmptyMutation, EmptySubscription, InputObject, MergedObject};

use crate::{
    dashboard::Dashboard,
    filter::{ConfigLabel, DateWindow, Mode, RawFilter, TrafficType},
};

/// A set of queries defined in the schema.
///
/// This is exposed only for [`Schema`], and not used directly.
#[derive(Default, MergedObject)]
pub(crate) struct Query(subject::SubjectQuery, analytics::AnalyticsQuery);

pub(crate) type Schema = async_graphql::Schema<Query, EmptyMutation, EmptySubscription>;

/// Filter values as the dashboard URL carries them. Omitted optional fields
/// take the dashboard defaults; present values are validated strictly.
#[derive(InputObject, Debug)]
pub(crate) struct FilterInput {
    /// Positive integer identifying the account.
    business_id: String,
    experience_key: String,
    /// The analyzed search term or cluster name.
    subject: String,
    /// `SEARCH_TERM` or `CLUSTER`.
    mode: Option<String>,
    /// Window length in days: 7, 30, 90 or 84.
    date_window: Option<String>,
    /// `ALL`, `EXTERNAL` or `INTERNAL`.
    traffic_type: Option<String>,
    /// `ALL`, `STAGING` or `PRODUCTION`.
    config_label: Option<String>,
}

impl From<FilterInput> for RawFilter {
    fn from(input: FilterInput) -> Self {
        Self {
            business_id: input.business_id,
            experience_key: input.experience_key,
            date_window: input
                .date_window
                .unwrap_or_else(|| DateWindow::default().code()),
            traffic_type: input
                .traffic_type
                .unwrap_or_else(|| TrafficType::default().code().to_string()),
            config_label: input
                .config_label
                .unwrap_or_else(|| ConfigLabel::default().code().to_string()),
            subject: input.subject,
            mode: input
                .mode
                .unwrap_or_else(|| Mode::default().code().to_string()),
        }
    }
}

pub(crate) fn schema(dashboard: Arc<Dashboard>) -> Schema {
    Schema::build(Query::default(), EmptyMutation, EmptySubscription)
        .data(dashboard)
        .finish()
}

#[cfg(test)]
struct TestSchema {
    schema: Schema,
}

#[cfg(test)]
impl TestSchema {
    fn new() -> Self {
        Self::with_dashboard(crate::dashboard::tests::dashboard(
            crate::dashboard::tests::standard_executor(),
            crate::search::tests::FakeSearch::default(),
        ))
    }

    fn with_dashboard(dashboard: Dashboard) -> Self {
        Self {
            schema: schema(Arc::new(dashboard)),
        }
    }

    async fn execute(&self, query: &str) -> async_graphql::Response {
        let request: async_graphql::Request = query.into();
        self.schema.execute(request).await
    }
}
