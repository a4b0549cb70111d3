use std::sync::Arc;

use async_graphql::{Context, Object, Result, SimpleObject};

use crate::{
    api::FilterInput,
    catalog::Purpose,
    dashboard::Dashboard,
    filter::{FilterContext, RawFilter},
    session::DashboardState,
};

#[derive(Default)]
pub(super) struct SubjectQuery {}

#[derive(SimpleObject, Debug, PartialEq)]
struct EntityName {
    uid: String,
    name: String,
}

#[Object]
impl SubjectQuery {
    /// The most searched subjects of the experience over the last 30 days,
    /// most popular first.
    async fn popular_subjects(
        &self,
        ctx: &Context<'_>,
        business_id: String,
        experience_key: String,
        mode: Option<String>,
    ) -> Result<Vec<String>> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let mut state = DashboardState::with_defaults(dashboard.defaults())
            .with("b", &business_id)
            .with("e", &experience_key);
        if let Some(mode) = mode {
            state = state.with("mode", &mode);
        }
        let filter = FilterContext::listing(&state.raw_filter(""))?;
        Ok(dashboard.popular(&filter).await?)
    }

    /// The SQL the dashboard runs for `purpose`, with every placeholder
    /// substituted.
    #[allow(clippy::unused_async)]
    async fn resolved_query(
        &self,
        ctx: &Context<'_>,
        filter: FilterInput,
        purpose: Purpose,
    ) -> Result<String> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let filter = FilterContext::build(&RawFilter::from(filter))?;
        Ok(dashboard.resolve(purpose, &filter)?.to_string())
    }

    /// Knowledge-base entities the search API returns for `term`, sorted by
    /// uid.
    async fn entity_names(
        &self,
        ctx: &Context<'_>,
        term: String,
        experience_key: String,
    ) -> Result<Vec<EntityName>> {
        let dashboard = ctx.data::<Arc<Dashboard>>()?;
        let mut names: Vec<_> = dashboard
            .entity_names(&term, &experience_key)
            .await?
            .into_iter()
            .map(|(uid, name)| EntityName { uid, name })
            .collect();
        names.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use crate::api::TestSchema;

    #[tokio::test]
    async fn popular_subjects() {
        let schema = TestSchema::new();
        let query = r#"
        {
            popularSubjects(businessId: "42", experienceKey: "exp1")
        }"#;
        let res = schema.execute(query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{popularSubjects: ["wifi password", "router"]}"#
        );
    }

    #[tokio::test]
    async fn popular_subjects_rejects_bad_business_id() {
        let schema = TestSchema::new();
        let query = r#"
        {
            popularSubjects(businessId: "-3", experienceKey: "exp1")
        }"#;
        let res = schema.execute(query).await;
        assert_eq!(res.errors.len(), 1);
        assert!(res.errors[0].message.contains("business_id"));
    }

    #[tokio::test]
    async fn resolved_query_substitutes_filter() {
        let schema = TestSchema::new();
        let query = r#"
        {
            resolvedQuery(
                filter: {businessId: "42", experienceKey: "exp1", subject: "it's down", mode: "CLUSTER"},
                purpose: LOGS
            )
        }"#;
        let res = schema.execute(query).await;
        assert!(res.errors.is_empty(), "{:?}", res.errors);

        let sql = res.data.into_json().unwrap()["resolvedQuery"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(sql.contains("'it''s down'"));
        assert!(sql.contains("cluster_name"));
        assert!(!sql.contains("{s}"));
    }

    #[tokio::test]
    async fn unknown_mode_is_an_error() {
        let schema = TestSchema::new();
        let query = r#"
        {
            resolvedQuery(
                filter: {businessId: "42", experienceKey: "exp1", subject: "wifi", mode: "ENTITY"},
                purpose: ANALYTICS
            )
        }"#;
        let res = schema.execute(query).await;
        assert_eq!(res.errors[0].message, "unrecognized analysis mode: ENTITY");
    }

    #[tokio::test]
    async fn entity_names_are_sorted() {
        let schema = TestSchema::new();
        let query = r#"
        {
            entityNames(term: "wifi", experienceKey: "exp1") {
                uid
                name
            }
        }"#;
        let res = schema.execute(query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{entityNames: [{uid: "1001", name: "Reset your router"}, {uid: "1003", name: "Find your wifi password"}]}"#
        );
    }
}
