use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Query, QueryClass, Workload};
use crate::cache::CacheMode;
use crate::client::BenchClient;
use crate::error::BenchError;

/// Data shapes the harness knows how to generate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkloadPattern {
    /// Ordered timestamps, few distinct metric ids (RLE-friendly)
    TimeSeries { metrics: u32 },
    /// Small dimension table with unique ids
    Dimension,
    /// Skewed user ids, hot keys take most of the traffic
    Events { distinct_users: u64 },
    /// Only active orders kept, tiny status domain
    Sparse,
    /// Date-ordered orders with many rows per key
    Composite,
    /// Sequential ids, one range returning `fraction` of the rows
    Selectivity { fraction: f64 },
    /// `ORDER BY ... DESC` scans
    BackwardScan,
    /// Early-terminating `LIMIT` scans
    Limit,
    /// Scattered `IN (...)` point lookups
    InClause,
    /// Text keys pre-sorted for run-length encoding
    TextKeys(TextKey),
    /// Range scans carrying `columns` INCLUDE payload columns (at most 8)
    IncludeOverhead { columns: usize },
    /// The same access pattern over a narrow, wide or temporal key
    DataType(KeyType),
    /// Covering scans answered from the index alone
    IndexOnly,
    /// Index restricted to the 10% of rows that are active
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKey {
    Uuid,
    /// Accented keys under an ICU collation
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int2,
    Int8,
    Date,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Int2 => "int2",
            KeyType::Int8 => "int8",
            KeyType::Date => "date",
        }
    }
}

const UTF8_COLLATION: &str = "en-US-x-icu";
static INCLUDE_POOL: [&str; 8] = ["inc1", "inc2", "inc3", "inc4", "inc5", "inc6", "inc7", "inc8"];

/// A workload fully described by SQL text
#[derive(Debug, Clone)]
pub struct SqlWorkload {
    id: String,
    description: String,
    table: String,
    index_columns: String,
    include_columns: Vec<String>,
    predicate: Option<String>,
    parallelism: u32,
    /// Executed one statement at a time (VACUUM refuses transaction blocks)
    generate_statements: Vec<String>,
    queries: Vec<Query>,
}

struct Fixture {
    id: String,
    description: String,
    index_columns: &'static str,
    include_columns: &'static [&'static str],
    predicate: Option<&'static str>,
    select: String,
    templates: Vec<Query>,
}

impl SqlWorkload {
    /// Build a workload for `rows` rows whose queries run under each of `cache_modes`.
    pub fn new(pattern: WorkloadPattern, rows: u64, cache_modes: &[CacheMode], seed: u64) -> Self {
        let fixture = fixture(pattern, rows, seed);
        let table = table_name(&fixture.id);

        let generate_statements = vec![
            format!("DROP TABLE IF EXISTS {} CASCADE;", table),
            format!("CREATE UNLOGGED TABLE {} AS {};", table, fixture.select.trim()),
            format!("ALTER TABLE {} SET (autovacuum_enabled = off);", table),
            format!("VACUUM (FREEZE, ANALYZE) {};", table),
        ];

        let mut queries = Vec::new();
        for template in &fixture.templates {
            for &mode in cache_modes {
                let mut q = template.clone().in_mode(mode);
                q.sql = q.sql.replace("{table}", &table);
                queries.push(q);
            }
        }

        Self {
            id: fixture.id,
            description: fixture.description,
            table,
            index_columns: fixture.index_columns.to_string(),
            include_columns: fixture.include_columns.iter().map(|c| c.to_string()).collect(),
            predicate: fixture.predicate.map(str::to_string),
            parallelism: 0,
            generate_statements,
            queries,
        }
    }

    pub fn with_parallelism(mut self, workers: u32) -> Self {
        self.parallelism = workers;
        self
    }
}

#[async_trait]
impl Workload for SqlWorkload {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn index_columns(&self) -> &str {
        &self.index_columns
    }

    fn include_columns(&self) -> &[String] {
        &self.include_columns
    }

    fn index_predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    fn parallelism(&self) -> u32 {
        self.parallelism
    }

    fn queries(&self) -> Vec<Query> {
        self.queries.clone()
    }

    async fn generate(&self, client: &dyn BenchClient) -> Result<(), BenchError> {
        for stmt in &self.generate_statements {
            debug!(workload = %self.id, "generate: {}", stmt.lines().next().unwrap_or(""));
            client.execute(stmt).await.map_err(|e| {
                if e.is_fatal() {
                    e
                } else {
                    BenchError::Generation {
                        workload: self.id.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;
        }
        Ok(())
    }
}

fn table_name(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("bench_{}", sanitized)
}

fn fixture(pattern: WorkloadPattern, rows: u64, seed: u64) -> Fixture {
    let k = rows / 1000;
    match pattern {
        WorkloadPattern::TimeSeries { metrics } => {
            let card = if metrics < 100 {
                "ultra_low"
            } else if metrics < 500 {
                "low"
            } else {
                "med"
            };
            Fixture {
                id: format!("timeseries_{}k_{}m_{}_card", k, metrics, card),
                description: format!("Time-series: {} rows, {} metrics", rows, metrics),
                index_columns: "metric_id",
                include_columns: &["customer_id", "severity"],
                predicate: None,
                select: format!(
                    "SELECT
                        CURRENT_TIMESTAMP - (random() * 0.49 * INTERVAL '365 days') AS ts,
                        (CASE WHEN random() < 0.8
                            THEN floor(random() * {m} * 0.2)::int
                            ELSE floor(random() * {m})::int END) AS metric_id,
                        (random() * 100 + 10 * sin(i::float / 10000.0))::float4 AS value,
                        (random() * 10000)::int AS customer_id,
                        (random() * 5)::smallint AS severity
                    FROM generate_series(1, {rows}) i
                    ORDER BY 2",
                    m = metrics,
                    rows = rows
                ),
                templates: vec![
                    Query::new(
                        "hot_metric",
                        "SELECT count(*), avg(value) FROM {table} WHERE metric_id = 5",
                        QueryClass::Aggregation,
                    )
                    .describe("Single hot metric (equality)"),
                    Query::new(
                        "metric_range",
                        "SELECT count(*), avg(value) FROM {table} WHERE metric_id BETWEEN 10 AND 20",
                        QueryClass::RangeScan,
                    )
                    .describe("Metric range scan"),
                ],
            }
        }
        WorkloadPattern::Dimension => {
            let mut rng = StdRng::seed_from_u64(seed);
            let lookup_id = rng.gen_range(1..=rows.max(1));
            Fixture {
                id: format!("dimension_{}k", k),
                description: format!("Dimension table: {} rows", rows),
                index_columns: "id",
                include_columns: &["country_code", "name"],
                predicate: None,
                select: format!(
                    "SELECT
                        i AS id,
                        (ARRAY['US','CN','IN','BR','ID','PK','NG','BD','RU','MX'])[1 + (i % 10)] AS country_code,
                        'Customer ' || i AS name,
                        (ARRAY['active','inactive','suspended'])[1 + (i % 3)] AS status,
                        ('2020-01-01'::date + (i % 1000)) AS created_date
                    FROM generate_series(1, {rows}) i",
                    rows = rows
                ),
                templates: vec![
                    Query::new(
                        "point_lookup",
                        format!("SELECT * FROM {{table}} WHERE id = {}", lookup_id),
                        QueryClass::PointLookup,
                    )
                    .describe("Point lookup (seeded random id)"),
                    Query::new(
                        "range_scan",
                        format!("SELECT count(*) FROM {{table}} WHERE id >= {}", rows / 2),
                        QueryClass::RangeScan,
                    )
                    .describe("Range scan (50% selectivity)"),
                ],
            }
        }
        WorkloadPattern::Events { distinct_users } => {
            let users = distinct_users.max(100);
            Fixture {
                id: format!("events_{}k_{}_users", k, users),
                description: format!("Event stream: {} rows, {} users", rows, users),
                index_columns: "user_id",
                include_columns: &["event_type", "session_id"],
                predicate: None,
                select: format!(
                    "SELECT
                        CASE
                            WHEN random() < 0.5 THEN floor(random() * ({u} * 0.01))::int
                            WHEN random() < 0.8 THEN floor(random() * ({u} * 0.2))::int
                            ELSE floor(random() * {u})::int
                        END AS user_id,
                        (ARRAY['click','view','purchase','cart_add'])[1 + floor(random() * 4)::int] AS event_type,
                        NOW() - (random() * INTERVAL '30 days') AS event_time,
                        (random() * 1000)::int AS session_id
                    FROM generate_series(1, {rows}) i
                    ORDER BY 1",
                    u = users,
                    rows = rows
                ),
                templates: vec![
                    Query::new(
                        "hot_user",
                        "SELECT count(*), event_type FROM {table} WHERE user_id = 5 GROUP BY 2",
                        QueryClass::Aggregation,
                    )
                    .describe("Hot user events (high duplicate key)"),
                    Query::new(
                        "user_range",
                        "SELECT count(*) FROM {table} WHERE user_id < 100",
                        QueryClass::RangeScan,
                    )
                    .describe("User range scan"),
                ],
            }
        }
        WorkloadPattern::Sparse => Fixture {
            id: format!("sparse_{}k", k),
            description: format!("Sparse index: {} rows filtered to active orders", rows),
            index_columns: "status",
            include_columns: &["order_date", "total"],
            predicate: None,
            select: format!(
                "SELECT * FROM (
                    SELECT
                        i AS order_id,
                        (ARRAY['pending','processing','shipped','delivered','cancelled'])[1 + floor(random() * 5)::int] AS status,
                        NOW() - (random() * INTERVAL '90 days') AS order_date,
                        (random() * 10000)::numeric(10,2) AS total
                    FROM generate_series(1, {rows}) i
                ) o WHERE status IN ('pending', 'processing')",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "pending_orders",
                    "SELECT count(*), sum(total) FROM {table} WHERE status = 'pending'",
                    QueryClass::Aggregation,
                )
                .describe("Pending orders (small key domain)"),
                Query::new(
                    "all_active",
                    "SELECT count(*) FROM {table} WHERE status IN ('pending', 'processing')",
                    QueryClass::FullScan,
                )
                .describe("All active orders"),
            ],
        },
        WorkloadPattern::Composite => Fixture {
            id: format!("composite_{}k", k),
            description: format!("Composite key (date, id): {} rows", rows),
            index_columns: "order_date",
            include_columns: &["order_id", "amount"],
            predicate: None,
            select: format!(
                "SELECT
                    ('2024-01-01'::date + (i % 365)) AS order_date,
                    i AS order_id,
                    (random() * 5000)::int AS amount,
                    (random() * 1000)::int AS customer_id
                FROM generate_series(1, {rows}) i
                ORDER BY 1, 2",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "recent_orders",
                    "SELECT count(*), sum(amount) FROM {table} WHERE order_date >= '2024-10-01'",
                    QueryClass::Aggregation,
                )
                .describe("Recent orders (Q4 2024)"),
                Query::new(
                    "single_day",
                    "SELECT count(*) FROM {table} WHERE order_date >= '2024-06-15' AND order_date < '2024-06-16'",
                    QueryClass::RangeScan,
                )
                .describe("Single day orders"),
            ],
        },
        WorkloadPattern::Selectivity { fraction } => {
            let fraction = fraction.clamp(0.0, 1.0);
            let threshold = (rows as f64 * (1.0 - fraction)) as u64;
            let pct = fraction * 100.0;
            let tag = format!("{:.1}", pct).replace('.', "_");
            Fixture {
                id: format!("selectivity_{}k_{}pct", k, tag),
                description: format!("Selectivity {:.1}%: {} rows", pct, rows),
                index_columns: "id",
                include_columns: &["value"],
                predicate: None,
                select: format!(
                    "SELECT i AS id, (random() * 1000)::int AS value FROM generate_series(1, {rows}) i",
                    rows = rows
                ),
                templates: vec![Query::new(
                    format!("sel_{}pct", tag),
                    format!(
                        "SELECT count(*), sum(value) FROM {{table}} WHERE id >= {}",
                        threshold
                    ),
                    QueryClass::RangeScan,
                )
                .describe(format!("Range scan returning {:.1}% of rows", pct))],
            }
        }
        WorkloadPattern::BackwardScan => Fixture {
            id: format!("backward_{}k", k),
            description: format!("Backward scans: {} rows", rows),
            index_columns: "id",
            include_columns: &["payload"],
            predicate: None,
            select: format!(
                "SELECT i::int4 AS id, (i % 1000)::int4 AS payload FROM generate_series(1, {rows}) i",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "desc_limit100",
                    "SELECT * FROM {table} ORDER BY id DESC LIMIT 100",
                    QueryClass::PointLookup,
                )
                .with_repeat(5)
                .describe("Last 100 rows (backward)"),
                Query::new(
                    "desc_range",
                    format!(
                        "SELECT * FROM {{table}} WHERE id > {} ORDER BY id DESC",
                        rows * 9 / 10
                    ),
                    QueryClass::RangeScan,
                )
                .describe("Range + backward scan"),
            ],
        },
        WorkloadPattern::Limit => Fixture {
            id: format!("limit_{}k", k),
            description: format!("LIMIT queries: {} rows", rows),
            index_columns: "id",
            include_columns: &["category", "value"],
            predicate: None,
            select: format!(
                "SELECT i::int4 AS id, (i % 100)::int4 AS category, (random() * 1000)::int4 AS value
                FROM generate_series(1, {rows}) i",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "range_limit100",
                    format!(
                        "SELECT * FROM {{table}} WHERE id > {} ORDER BY id LIMIT 100",
                        rows / 2
                    ),
                    QueryClass::PointLookup,
                )
                .with_repeat(5)
                .describe("Range scan + LIMIT 100"),
                Query::new(
                    "range_limit10k",
                    format!(
                        "SELECT * FROM {{table}} WHERE id > {} ORDER BY id LIMIT 10000",
                        rows / 2
                    ),
                    QueryClass::RangeScan,
                )
                .describe("Range scan + LIMIT 10000"),
            ],
        },
        WorkloadPattern::InClause => {
            let in_list = |n: u64| {
                let step = (rows / n).max(1);
                (1..=n)
                    .map(|i| (i * step).to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            Fixture {
                id: format!("inclause_{}k", k),
                description: format!("IN clause queries: {} rows", rows),
                index_columns: "id",
                include_columns: &[],
                predicate: None,
                select: format!(
                    "SELECT i::int4 AS id, 'data_' || i AS payload FROM generate_series(1, {rows}) i",
                    rows = rows
                ),
                templates: vec![
                    Query::new(
                        "in_5",
                        format!("SELECT * FROM {{table}} WHERE id IN ({})", in_list(5)),
                        QueryClass::PointLookup,
                    )
                    .describe("IN clause with 5 values"),
                    Query::new(
                        "in_500",
                        format!("SELECT * FROM {{table}} WHERE id IN ({})", in_list(500)),
                        QueryClass::RangeScan,
                    )
                    .describe("IN clause with 500 values"),
                ],
            }
        }
        WorkloadPattern::TextKeys(key) => {
            let (tag, key_gen, low, high) = match key {
                TextKey::Uuid => (
                    "uuid".to_string(),
                    "('00000000-0000-0000-0000-' || lpad((i % 10000)::text, 12, '0'))::uuid"
                        .to_string(),
                    "'00000000-0000-0000-0000-000000005000'::uuid",
                    "'00000000-0000-0000-0000-000000007000'::uuid",
                ),
                TextKey::Utf8 => (
                    format!("text_utf8_{}", collation_tag(UTF8_COLLATION)),
                    format!(
                        "(CASE (i % 5)
                            WHEN 0 THEN 'café-' || (i % 10000)::text
                            WHEN 1 THEN 'naïve-' || (i % 10000)::text
                            WHEN 2 THEN 'résumé-' || (i % 10000)::text
                            WHEN 3 THEN 'Zürich-' || (i % 10000)::text
                            ELSE 'élève-' || (i % 10000)::text
                        END) COLLATE \"{}\"",
                        UTF8_COLLATION
                    ),
                    "'café-5000'",
                    "'café-7000'",
                ),
            };
            Fixture {
                id: format!("textkeys_{}_{}k", tag, k),
                description: format!("Text keys ({}): {} rows", tag, rows),
                index_columns: "key_col",
                include_columns: &["value1", "value2"],
                predicate: None,
                select: format!(
                    "SELECT
                        {key_gen} AS key_col,
                        (random() * 1000)::int AS value1,
                        (random() * 1000)::int AS value2
                    FROM generate_series(1, {rows}) i
                    ORDER BY 1",
                    key_gen = key_gen,
                    rows = rows
                ),
                templates: vec![
                    Query::new(
                        "equality",
                        format!("SELECT count(*) FROM {{table}} WHERE key_col = {}", low),
                        QueryClass::Aggregation,
                    )
                    .describe("Equality on text key"),
                    Query::new(
                        "range",
                        format!(
                            "SELECT count(*) FROM {{table}} WHERE key_col >= {} AND key_col < {}",
                            low, high
                        ),
                        QueryClass::RangeScan,
                    )
                    .describe("Range scan on text key"),
                ],
            }
        }
        WorkloadPattern::IncludeOverhead { columns } => {
            let include = &INCLUDE_POOL[..columns.min(INCLUDE_POOL.len())];
            let n = include.len();
            let select_list = include
                .iter()
                .map(|c| format!("sum({})", c))
                .chain(std::iter::once("count(*)".to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Fixture {
                id: format!("include_{}cols_{}k", n, k),
                description: format!("INCLUDE overhead ({} cols): {} rows", n, rows),
                index_columns: "id",
                include_columns: include,
                predicate: None,
                select: format!(
                    "SELECT i AS id, {} FROM generate_series(1, {rows}) i",
                    INCLUDE_POOL
                        .iter()
                        .map(|c| format!("(random() * 1000)::int AS {}", c))
                        .collect::<Vec<_>>()
                        .join(", "),
                    rows = rows
                ),
                templates: vec![Query::new(
                    format!("scan_{}inc", n),
                    format!(
                        "SELECT {} FROM {{table}} WHERE id >= {}",
                        select_list,
                        rows / 2
                    ),
                    QueryClass::RangeScan,
                )
                .describe(format!("Range scan with {} INCLUDE columns", n))],
            }
        }
        WorkloadPattern::DataType(ty) => {
            let (key_gen, templates) = match ty {
                KeyType::Date => (
                    "('2020-01-01'::date + i)".to_string(),
                    vec![
                        Query::new(
                            "range_1month",
                            "SELECT * FROM {table} WHERE id BETWEEN '2020-06-01' AND '2020-06-30'",
                            QueryClass::RangeScan,
                        )
                        .describe("Date range (1 month)"),
                        Query::new(
                            "recent",
                            "SELECT * FROM {table} WHERE id > '2022-01-01' ORDER BY id DESC LIMIT 1000",
                            QueryClass::RangeScan,
                        )
                        .describe("Recent dates (backward scan)"),
                    ],
                ),
                KeyType::Int2 | KeyType::Int8 => {
                    // int2 wraps at its maximum; keep lookups inside the domain
                    let domain = match ty {
                        KeyType::Int2 => rows.min(i16::MAX as u64),
                        _ => rows * 2,
                    }
                    .max(1);
                    let mid = domain.min(rows) / 2;
                    (
                        format!("(i % {})::{}", domain, ty.as_str()),
                        vec![
                            Query::new(
                                "range_1pct",
                                format!(
                                    "SELECT * FROM {{table}} WHERE id BETWEEN {} AND {}",
                                    mid,
                                    mid + rows / 100
                                ),
                                QueryClass::RangeScan,
                            )
                            .describe("Range scan (1% of rows)"),
                            Query::new(
                                "point",
                                format!("SELECT * FROM {{table}} WHERE id = {}", mid),
                                QueryClass::PointLookup,
                            )
                            .with_repeat(5)
                            .describe("Point lookup"),
                        ],
                    )
                }
            };
            Fixture {
                id: format!("dtype_{}_{}k", ty.as_str(), k),
                description: format!("Data type ({}): {} rows", ty.as_str(), rows),
                index_columns: "id",
                include_columns: &[],
                predicate: None,
                select: format!(
                    "SELECT {} AS id, (i % 1000)::int4 AS payload FROM generate_series(1, {rows}) i",
                    key_gen,
                    rows = rows
                ),
                templates,
            }
        }
        WorkloadPattern::IndexOnly => Fixture {
            id: format!("ios_{}k", k),
            description: format!("Index-only scans: {} rows", rows),
            index_columns: "id",
            include_columns: &[],
            predicate: None,
            select: format!(
                "SELECT
                    i::int4 AS id,
                    (ARRAY['active','pending','completed'])[1 + (i % 3)] AS status,
                    (i % 1000)::int4 AS value,
                    'padding_' || i AS extra
                FROM generate_series(1, {rows}) i",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "ios_range",
                    format!(
                        "SELECT id FROM {{table}} WHERE id BETWEEN {} AND {}",
                        rows / 10,
                        rows / 5
                    ),
                    QueryClass::RangeScan,
                )
                .describe("Index-only scan (10% of rows)"),
                Query::new(
                    "ios_small",
                    format!(
                        "SELECT id FROM {{table}} WHERE id BETWEEN {} AND {}",
                        rows / 10,
                        rows / 10 + rows / 100
                    ),
                    QueryClass::RangeScan,
                )
                .describe("Index-only scan (1% of rows)"),
            ],
        },
        WorkloadPattern::Partial => Fixture {
            id: format!("partial_{}k", k),
            description: format!("Partial index: {} rows (10% indexed)", rows),
            index_columns: "id",
            include_columns: &[],
            predicate: Some("status = 'active'"),
            select: format!(
                "SELECT
                    i::int4 AS id,
                    CASE WHEN i % 10 = 0 THEN 'active' ELSE 'inactive' END AS status,
                    (i % 100)::int4 AS category
                FROM generate_series(1, {rows}) i",
                rows = rows
            ),
            templates: vec![
                Query::new(
                    "active_category",
                    "SELECT * FROM {table} WHERE status = 'active' AND category = 40",
                    QueryClass::RangeScan,
                )
                .describe("Partial index scan (small result)"),
                Query::new(
                    "active_range",
                    format!(
                        "SELECT * FROM {{table}} WHERE status = 'active' AND id BETWEEN {} AND {}",
                        rows / 10,
                        rows / 5
                    ),
                    QueryClass::RangeScan,
                )
                .describe("Partial index range scan"),
            ],
        },
    }
}

/// `en-US-x-icu` -> `enusxi`
fn collation_tag(collation: &str) -> String {
    collation
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(6)
        .collect::<String>()
        .to_ascii_lowercase()
}
