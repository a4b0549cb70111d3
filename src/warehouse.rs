use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time;
use tracing::{debug, error, info};

use crate::{
    cache::{CachePolicy, MemoCache},
    error::{Error, Result},
    resolver::ResolvedQuery,
    settings::WarehouseSettings,
    table::{Cell, Column, ColumnKind, Table},
};

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Anything able to run a SQL string and return its rows.
#[async_trait]
pub(crate) trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Table>;
}

/// Memoized, time-bounded access to the warehouse.
pub(crate) struct Warehouse {
    executor: Arc<dyn QueryExecutor>,
    cache: MemoCache<String, Table>,
    timeout: Duration,
}

impl Warehouse {
    pub(crate) fn new(
        executor: Arc<dyn QueryExecutor>,
        policy: CachePolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            cache: MemoCache::new(policy),
            timeout,
        }
    }

    /// Runs `query`, or returns the table memoized for the same SQL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryExecution`] if the warehouse rejects the query
    /// and [`Error::Timeout`] if it does not answer in time.
    pub(crate) async fn fetch(&self, query: &ResolvedQuery) -> Result<Arc<Table>> {
        let executor = Arc::clone(&self.executor);
        let sql = query.sql().to_string();
        let timeout = self.timeout;
        let (purpose, mode) = (query.purpose(), query.mode());

        self.cache
            .get_or_compute(sql.clone(), async move {
                info!(%purpose, %mode, "Running warehouse query");
                let result = match time::timeout(timeout, executor.execute(&sql)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        operation: "warehouse query",
                        after: timeout,
                    }),
                };
                match &result {
                    Ok(table) => debug!(%purpose, rows = table.len(), "Warehouse query finished"),
                    Err(e) => error!(%purpose, %mode, "Problem while running warehouse query. {e}"),
                }
                result
            })
            .await
    }
}

/// Executes statements through the Snowflake SQL API.
pub(crate) struct SqlApiExecutor {
    client: Client,
    endpoint: String,
    settings: WarehouseSettings,
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    warehouse: &'a str,
    database: &'a str,
    schema: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

impl SqlApiExecutor {
    pub(crate) fn new(settings: WarehouseSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("cannot build warehouse HTTP client")?;
        let endpoint = settings.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}.snowflakecomputing.com", settings.account)
        });
        Ok(Self {
            client,
            endpoint,
            settings,
        })
    }

    fn statements_url(&self) -> String {
        format!("{}/api/v2/statements", self.endpoint.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.settings.token)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                &self.settings.token_type,
            )
            .header(header::ACCEPT, "application/json")
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, StatementResponse)> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::QueryExecution(e.to_string()))?;
        let status = response.status();
        let body: StatementResponse = response
            .json()
            .await
            .map_err(|e| Error::QueryExecution(format!("unreadable response ({status}): {e}")))?;
        if status.is_success() {
            Ok((status, body))
        } else {
            Err(Error::QueryExecution(
                body.message.unwrap_or_else(|| status.to_string()),
            ))
        }
    }
}

#[async_trait]
impl QueryExecutor for SqlApiExecutor {
    async fn execute(&self, sql: &str) -> Result<Table> {
        let body = StatementRequest {
            statement: sql,
            timeout: self.settings.timeout_secs,
            warehouse: &self.settings.warehouse,
            database: &self.settings.database,
            schema: &self.settings.schema,
            role: self.settings.role.as_deref(),
        };
        let (mut status, mut response) = self
            .send(self.client.post(self.statements_url()).json(&body))
            .await?;

        // 202 means the statement is still running.
        while status == StatusCode::ACCEPTED {
            let handle = response
                .statement_handle
                .clone()
                .ok_or_else(|| Error::QueryExecution("missing statement handle".to_string()))?;
            time::sleep(POLL_INTERVAL).await;
            (status, response) = self
                .send(
                    self.client
                        .get(format!("{}/{handle}", self.statements_url())),
                )
                .await?;
        }

        let meta = response
            .result_set_meta_data
            .take()
            .ok_or_else(|| Error::QueryExecution("response carries no result set".to_string()))?;
        let mut raw_rows = std::mem::take(&mut response.data);

        if meta.partition_info.len() > 1 {
            let handle = response
                .statement_handle
                .clone()
                .ok_or_else(|| Error::QueryExecution("missing statement handle".to_string()))?;
            for partition in 1..meta.partition_info.len() {
                let (_, page) = self
                    .send(
                        self.client
                            .get(format!("{}/{handle}", self.statements_url()))
                            .query(&[("partition", partition)]),
                    )
                    .await?;
                raw_rows.extend(page.data);
            }
        }

        decode_table(&meta.row_type, raw_rows)
    }
}

fn decode_table(row_type: &[RowType], raw_rows: Vec<Vec<Option<String>>>) -> Result<Table> {
    let columns: Vec<Column> = row_type
        .iter()
        .map(|c| Column::new(c.name.clone(), column_kind(c)))
        .collect();

    let rows = raw_rows
        .into_iter()
        .map(|raw| {
            row_type
                .iter()
                .zip(raw)
                .map(|(meta, value)| decode_cell(meta, value))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table::new(columns, rows))
}

fn column_kind(meta: &RowType) -> ColumnKind {
    match meta.kind.as_str() {
        "fixed" if meta.scale.unwrap_or(0) == 0 => ColumnKind::Integer,
        "fixed" | "real" => ColumnKind::Float,
        "boolean" => ColumnKind::Boolean,
        _ => ColumnKind::Text,
    }
}

fn decode_cell(meta: &RowType, value: Option<String>) -> Result<Cell> {
    let Some(value) = value else {
        return Ok(Cell::Null);
    };
    let invalid =
        |e: &dyn std::fmt::Display| Error::QueryExecution(format!("bad {} value `{value}`: {e}", meta.name));

    let cell = match meta.kind.as_str() {
        "fixed" if meta.scale.unwrap_or(0) == 0 => {
            Cell::Int(value.parse().map_err(|e| invalid(&e))?)
        }
        "fixed" | "real" => Cell::Float(value.parse().map_err(|e| invalid(&e))?),
        "boolean" => Cell::Bool(value.eq_ignore_ascii_case("true")),
        "date" => {
            // Days since the Unix epoch.
            let days: i64 = value.parse().map_err(|e| invalid(&e))?;
            let date = NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days)))
                .ok_or_else(|| invalid(&"out of range"))?;
            Cell::Text(date.format("%Y-%m-%d").to_string())
        }
        kind if kind.starts_with("timestamp") => {
            // Seconds since the epoch, optionally followed by a space and
            // a time zone offset.
            let seconds = value.split_whitespace().next().unwrap_or_default();
            let (secs, frac) = seconds.split_once('.').unwrap_or((seconds, "0"));
            let secs: i64 = secs.parse().map_err(|e| invalid(&e))?;
            let nanos: u32 = format!("{frac:0<9}")[..9].parse().map_err(|e| invalid(&e))?;
            let ts = DateTime::from_timestamp(secs, nanos).ok_or_else(|| invalid(&"out of range"))?;
            Cell::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        _ => Cell::Text(value),
    };
    Ok(cell)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::{
        catalog::{Catalog, Purpose},
        filter::{sample_filter, FilterContext},
        resolver::resolve,
    };

    /// Answers every statement with a fixed table, counting the calls.
    #[derive(Default)]
    pub(crate) struct FakeExecutor {
        pub(crate) calls: AtomicUsize,
        pub(crate) tables: Mutex<Vec<(String, Table)>>,
        pub(crate) fail_on: Option<String>,
        pub(crate) delay: Option<Duration>,
    }

    impl FakeExecutor {
        /// Returns `table` for statements containing `needle`.
        pub(crate) fn answer(self, needle: &str, table: Table) -> Self {
            self.tables
                .lock()
                .unwrap()
                .push((needle.to_string(), table));
            self
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(&self, sql: &str) -> Result<Table> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            if self.fail_on.as_deref().is_some_and(|n| sql.contains(n)) {
                return Err(Error::QueryExecution("relation does not exist".to_string()));
            }
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .iter()
                .find(|(needle, _)| sql.contains(needle.as_str()))
                .map(|(_, t)| t.clone())
                .unwrap_or_default())
        }
    }

    fn query(subject: &str) -> ResolvedQuery {
        let mut raw = sample_filter();
        raw.subject = subject.to_string();
        let ctx = FilterContext::build(&raw).unwrap();
        resolve(&Catalog::new(), Purpose::Analytics, &ctx).unwrap()
    }

    #[tokio::test]
    async fn identical_queries_execute_once() {
        let executor = Arc::new(FakeExecutor::default());
        let warehouse = Warehouse::new(
            executor.clone(),
            CachePolicy::default(),
            Duration::from_secs(5),
        );

        warehouse.fetch(&query("wifi")).await.unwrap();
        warehouse.fetch(&query("wifi")).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        warehouse.fetch(&query("router")).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_surface_and_are_retried_on_next_fetch() {
        let executor = Arc::new(FakeExecutor {
            fail_on: Some("wifi".to_string()),
            ..FakeExecutor::default()
        });
        let warehouse = Warehouse::new(
            executor.clone(),
            CachePolicy::default(),
            Duration::from_secs(5),
        );

        let err = warehouse.fetch(&query("wifi")).await.unwrap_err();
        assert!(matches!(err, Error::QueryExecution(_)));
        warehouse.fetch(&query("wifi")).await.unwrap_err();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_warehouse_times_out() {
        let executor = Arc::new(FakeExecutor {
            delay: Some(Duration::from_millis(200)),
            ..FakeExecutor::default()
        });
        let warehouse = Warehouse::new(
            executor,
            CachePolicy::default(),
            Duration::from_millis(20),
        );

        let err = warehouse.fetch(&query("wifi")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "warehouse query",
                ..
            }
        ));
    }

    #[test]
    fn decodes_sql_api_rows() {
        let response: StatementResponse = serde_json::from_value(serde_json::json!({
            "statementHandle": "01b2",
            "resultSetMetaData": {
                "numRows": 2,
                "rowType": [
                    {"name": "DATE", "type": "date"},
                    {"name": "SEARCHES", "type": "fixed", "scale": 0},
                    {"name": "CTR", "type": "fixed", "scale": 2},
                    {"name": "TIMESTAMP", "type": "timestamp_ntz"},
                    {"name": "QUERY", "type": "text"}
                ],
                "partitionInfo": [{"rowCount": 2}]
            },
            "data": [
                ["19723", "12", "0.25", "1704067200.500000000", "wifi"],
                ["19724", "3", null, "1704153600", null]
            ]
        }))
        .unwrap();

        let meta = response.result_set_meta_data.unwrap();
        let table = decode_table(&meta.row_type, response.data).unwrap();

        assert_eq!(table.columns[1].kind, ColumnKind::Integer);
        assert_eq!(table.columns[2].kind, ColumnKind::Float);
        assert_eq!(table.rows[0][0], Cell::Text("2024-01-01".to_string()));
        assert_eq!(table.rows[0][1], Cell::Int(12));
        assert_eq!(table.rows[0][2], Cell::Float(0.25));
        assert_eq!(table.rows[0][3], Cell::Text("2024-01-01 00:00:00".to_string()));
        assert_eq!(table.rows[1][2], Cell::Null);
        assert_eq!(table.rows[1][4], Cell::Null);
    }

    #[test]
    fn malformed_numbers_are_query_errors() {
        let row_type = vec![RowType {
            name: "SEARCHES".to_string(),
            kind: "fixed".to_string(),
            scale: Some(0),
        }];
        let err = decode_table(&row_type, vec![vec![Some("many".to_string())]]).unwrap_err();
        assert!(matches!(err, Error::QueryExecution(_)));
    }

    fn sql_api(server: &mockito::ServerGuard) -> SqlApiExecutor {
        SqlApiExecutor::new(WarehouseSettings {
            account: "xy12345".to_string(),
            endpoint: Some(server.url()),
            token: "secret".to_string(),
            token_type: "PROGRAMMATIC_ACCESS_TOKEN".to_string(),
            warehouse: "HUMAN_WH".to_string(),
            database: "PROD_ANSWERS".to_string(),
            schema: "PUBLIC".to_string(),
            role: None,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn two_column_meta(partitions: usize) -> Value {
        json!({
            "rowType": [
                {"name": "SEARCH_TERM", "type": "text"},
                {"name": "SEARCHES", "type": "fixed", "scale": 0}
            ],
            "partitionInfo": vec![json!({"rowCount": 1}); partitions]
        })
    }

    #[tokio::test]
    async fn sql_api_polls_running_statements() {
        let mut server = mockito::Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v2/statements")
            .match_header("authorization", "Bearer secret")
            .match_header(
                "x-snowflake-authorization-token-type",
                "PROGRAMMATIC_ACCESS_TOKEN",
            )
            .match_body(Matcher::PartialJson(json!({
                "statement": "select 1",
                "warehouse": "HUMAN_WH",
                "database": "PROD_ANSWERS"
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"statementHandle": "01b2", "message": "Asynchronous execution in progress."}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/api/v2/statements/01b2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "statementHandle": "01b2",
                    "resultSetMetaData": two_column_meta(1),
                    "data": [["wifi", "12"]]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let table = sql_api(&server).execute("select 1").await.unwrap();

        assert_eq!(
            table.rows,
            vec![vec![Cell::Text("wifi".to_string()), Cell::Int(12)]]
        );
        submit.assert_async().await;
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn sql_api_fetches_remaining_partitions() {
        // gzip of {"data":[["router","3"]]}
        const PARTITION_1: [u8; 45] = [
            31, 139, 8, 0, 0, 0, 0, 0, 2, 3, 171, 86, 74, 73, 44, 73, 84, 178, 138, 142, 86, 42,
            202, 47, 45, 73, 45, 82, 210, 81, 50, 86, 138, 141, 173, 5, 0, 159, 197, 95, 177, 25,
            0, 0, 0,
        ];

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/statements")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "statementHandle": "01b3",
                    "resultSetMetaData": two_column_meta(2),
                    "data": [["wifi", "12"]]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let partition = server
            .mock("GET", "/api/v2/statements/01b3")
            .match_query(Matcher::UrlEncoded("partition".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-encoding", "gzip")
            .with_body(PARTITION_1)
            .create_async()
            .await;

        let table = sql_api(&server).execute("select 1").await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1][0], Cell::Text("router".to_string()));
        assert_eq!(table.rows[1][1], Cell::Int(3));
        partition.assert_async().await;
    }

    #[tokio::test]
    async fn sql_api_rejections_carry_the_warehouse_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/statements")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code": "002003", "message": "SQL compilation error: Object 'SEARCHES' does not exist."}"#,
            )
            .create_async()
            .await;

        let err = sql_api(&server).execute("select 1").await.unwrap_err();

        assert_eq!(
            err,
            Error::QueryExecution(
                "SQL compilation error: Object 'SEARCHES' does not exist.".to_string()
            )
        );
    }
}
