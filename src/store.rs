//! Persistence boundary (§6): a `Store` trait with a real Postgres-backed
//! implementation and an in-memory double for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Anomaly, AnomalyFilter, Baseline, ExpectedValue, GenerationLog, Network, NetworkItem, Page,
    ScadaReading,
};
use crate::error::Result;

/// Everything the services in this crate need from durable storage. Kept
/// narrow and domain-shaped rather than exposing `sqlx` types, so the
/// in-memory double can implement it with plain `Vec`/`HashMap` state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_network(&self, network_id: Uuid) -> Result<Option<Network>>;

    /// Inserts `network` if its id is unknown, or updates its `name`/`inp_path`
    /// otherwise. Does not touch `baseline_computed_at` — that is exclusively
    /// [`Store::set_baseline_computed_at`]'s job (§3 I3).
    async fn upsert_network(&self, network: &Network) -> Result<()>;
    async fn set_baseline_computed_at(&self, network_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn insert_network_items(&self, items: &[NetworkItem]) -> Result<()>;
    async fn list_network_items(&self, network_id: Uuid) -> Result<Vec<NetworkItem>>;

    async fn insert_baselines(&self, baselines: &[Baseline]) -> Result<()>;
    async fn list_baselines(&self, network_id: Uuid) -> Result<Vec<Baseline>>;

    /// Atomically persists a computed baseline: the network's item catalog,
    /// its baseline rows, and the `baseline_computed_at` marker all land (or
    /// fail) together, so a crash mid-write can never leave the marker set
    /// without baseline rows, or baseline rows without the marker (spec
    /// §4.2's "computed atomically with the baseline rows").
    async fn commit_baseline(
        &self,
        network_id: Uuid,
        items: &[NetworkItem],
        baselines: &[Baseline],
        computed_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn insert_readings(&self, readings: &[ScadaReading]) -> Result<()>;
    async fn insert_generation_log(&self, log: &GenerationLog) -> Result<()>;

    /// Persists one simulation cycle's readings and its [`GenerationLog`] row
    /// together as a single atomic write, so a crash or connection drop
    /// between the two can never leave a `GenerationLog` with no matching
    /// readings or vice versa (spec §4.4 step 4 / §5).
    async fn insert_generation_cycle(&self, readings: &[ScadaReading], log: &GenerationLog) -> Result<()>;

    /// Readings strictly after `since` and up to and including `until`,
    /// ordered by timestamp ascending — the watermark query window used by
    /// [`crate::services::monitor::Monitor`].
    async fn readings_since(
        &self,
        network_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScadaReading>>;

    /// All readings in `[since, until]`, inclusive both ends, for the
    /// [`crate::services::aggregator`] window. Unlike [`Store::readings_since`]
    /// this is not a watermark query — it may be called repeatedly over the
    /// same window.
    async fn readings_in_window(
        &self,
        network_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScadaReading>>;

    async fn expected_values_in_window(
        &self,
        network_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ExpectedValue>>;

    async fn insert_anomalies(&self, anomalies: &[Anomaly]) -> Result<()>;
    async fn list_anomalies(&self, network_id: Uuid) -> Result<Vec<Anomaly>>;

    /// Filtered, paginated anomaly query backing `Store.query_anomalies` (§6).
    async fn query_anomalies(&self, network_id: Uuid, filter: AnomalyFilter) -> Result<Page<Anomaly>>;

    async fn anomalies_in_window(
        &self,
        network_id: Uuid,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>>;

    async fn insert_expected_values(&self, values: &[ExpectedValue]) -> Result<()>;

    /// Retention/cleanup hooks (§6 consumed interfaces). Not called by any
    /// background loop in this crate; exposed for the upload/retention
    /// collaborator to invoke when a network is reset or deleted.
    async fn delete_readings(&self, network_id: Uuid) -> Result<()>;
    async fn delete_generation_logs(&self, network_id: Uuid) -> Result<()>;
}

pub mod postgres {
    use super::*;
    use crate::error::classify_sqlx_error;
    use sqlx::{FromRow, PgPool};

    #[derive(Clone)]
    pub struct PgStore {
        pool: PgPool,
    }

    impl PgStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[derive(FromRow)]
    struct NetworkRow {
        id: Uuid,
        name: String,
        inp_path: String,
        baseline_computed_at: Option<DateTime<Utc>>,
    }

    impl From<NetworkRow> for Network {
        fn from(row: NetworkRow) -> Self {
            Network {
                id: row.id,
                name: row.name,
                inp_path: row.inp_path,
                baseline_computed_at: row.baseline_computed_at,
            }
        }
    }

    #[async_trait]
    impl Store for PgStore {
        async fn get_network(&self, network_id: Uuid) -> Result<Option<Network>> {
            let row: Option<NetworkRow> = sqlx::query_as(
                "SELECT id, name, inp_path, baseline_computed_at FROM networks WHERE id = $1",
            )
            .bind(network_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(row.map(Network::from))
        }

        async fn upsert_network(&self, network: &Network) -> Result<()> {
            sqlx::query(
                r#"
                INSERT INTO networks (id, name, inp_path)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, inp_path = EXCLUDED.inp_path
                "#,
            )
            .bind(network.id)
            .bind(&network.name)
            .bind(&network.inp_path)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn set_baseline_computed_at(&self, network_id: Uuid, at: DateTime<Utc>) -> Result<()> {
            sqlx::query("UPDATE networks SET baseline_computed_at = $2 WHERE id = $1")
                .bind(network_id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn insert_network_items(&self, items: &[NetworkItem]) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for item in items {
                sqlx::query(
                    r#"
                    INSERT INTO network_items (network_id, item_id, kind)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (network_id, item_id) DO UPDATE SET kind = EXCLUDED.kind
                    "#,
                )
                .bind(item.network_id)
                .bind(&item.item_id)
                .bind(item.kind.as_str())
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn list_network_items(&self, network_id: Uuid) -> Result<Vec<NetworkItem>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                item_id: String,
                kind: String,
            }
            let rows: Vec<Row> = sqlx::query_as(
                "SELECT network_id, item_id, kind FROM network_items WHERE network_id = $1",
            )
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    let kind = match r.kind.as_str() {
                        "junction" => crate::domain::ItemKind::Junction,
                        "pipe" => crate::domain::ItemKind::Pipe,
                        "tank" => crate::domain::ItemKind::Tank,
                        _ => return None,
                    };
                    Some(NetworkItem {
                        network_id: r.network_id,
                        item_id: r.item_id,
                        kind,
                    })
                })
                .collect())
        }

        async fn insert_baselines(&self, baselines: &[Baseline]) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for b in baselines {
                sqlx::query(
                    r#"
                    INSERT INTO baseline_data (network_id, location_id, sensor_kind, value)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (network_id, location_id, sensor_kind) DO UPDATE SET value = EXCLUDED.value
                    "#,
                )
                .bind(b.network_id)
                .bind(&b.location_id)
                .bind(b.sensor_kind.as_str())
                .bind(b.value)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn list_baselines(&self, network_id: Uuid) -> Result<Vec<Baseline>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                location_id: String,
                sensor_kind: String,
                value: f64,
            }
            let rows: Vec<Row> = sqlx::query_as(
                "SELECT network_id, location_id, sensor_kind, value FROM baseline_data WHERE network_id = $1",
            )
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(Baseline {
                        network_id: r.network_id,
                        location_id: r.location_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        value: r.value,
                    })
                })
                .collect())
        }

        async fn commit_baseline(
            &self,
            network_id: Uuid,
            items: &[NetworkItem],
            baselines: &[Baseline],
            computed_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for item in items {
                sqlx::query(
                    r#"
                    INSERT INTO network_items (network_id, item_id, kind)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (network_id, item_id) DO UPDATE SET kind = EXCLUDED.kind
                    "#,
                )
                .bind(item.network_id)
                .bind(&item.item_id)
                .bind(item.kind.as_str())
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            for b in baselines {
                sqlx::query(
                    r#"
                    INSERT INTO baseline_data (network_id, location_id, sensor_kind, value)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (network_id, location_id, sensor_kind) DO UPDATE SET value = EXCLUDED.value
                    "#,
                )
                .bind(b.network_id)
                .bind(&b.location_id)
                .bind(b.sensor_kind.as_str())
                .bind(b.value)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            sqlx::query("UPDATE networks SET baseline_computed_at = $2 WHERE id = $1")
                .bind(network_id)
                .bind(computed_at)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn insert_readings(&self, readings: &[ScadaReading]) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for r in readings {
                sqlx::query(
                    r#"
                    INSERT INTO scada_readings (network_id, sensor_id, sensor_kind, location_id, value, timestamp)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(r.network_id)
                .bind(&r.sensor_id)
                .bind(r.sensor_kind.as_str())
                .bind(&r.location_id)
                .bind(r.value)
                .bind(r.timestamp)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn insert_generation_log(&self, log: &GenerationLog) -> Result<()> {
            sqlx::query(
                r#"
                INSERT INTO scada_generation_logs
                    (network_id, generation_start, junctions_selected, pipes_selected, tanks_selected, readings_generated)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(log.network_id)
            .bind(log.generation_start)
            .bind(log.junctions_selected as i32)
            .bind(log.pipes_selected as i32)
            .bind(log.tanks_selected as i32)
            .bind(log.readings_generated as i32)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn insert_generation_cycle(
            &self,
            readings: &[ScadaReading],
            log: &GenerationLog,
        ) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for r in readings {
                sqlx::query(
                    r#"
                    INSERT INTO scada_readings (network_id, sensor_id, sensor_kind, location_id, value, timestamp)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(r.network_id)
                .bind(&r.sensor_id)
                .bind(r.sensor_kind.as_str())
                .bind(&r.location_id)
                .bind(r.value)
                .bind(r.timestamp)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            sqlx::query(
                r#"
                INSERT INTO scada_generation_logs
                    (network_id, generation_start, junctions_selected, pipes_selected, tanks_selected, readings_generated)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(log.network_id)
            .bind(log.generation_start)
            .bind(log.junctions_selected as i32)
            .bind(log.pipes_selected as i32)
            .bind(log.tanks_selected as i32)
            .bind(log.readings_generated as i32)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn readings_since(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ScadaReading>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                sensor_id: String,
                sensor_kind: String,
                location_id: String,
                value: f64,
                timestamp: DateTime<Utc>,
            }
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, sensor_id, sensor_kind, location_id, value, timestamp
                FROM scada_readings
                WHERE network_id = $1 AND timestamp > $2 AND timestamp <= $3
                ORDER BY timestamp ASC
                "#,
            )
            .bind(network_id)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(ScadaReading {
                        network_id: r.network_id,
                        sensor_id: r.sensor_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        location_id: r.location_id,
                        value: r.value,
                        timestamp: r.timestamp,
                    })
                })
                .collect())
        }

        async fn readings_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ScadaReading>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                sensor_id: String,
                sensor_kind: String,
                location_id: String,
                value: f64,
                timestamp: DateTime<Utc>,
            }
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, sensor_id, sensor_kind, location_id, value, timestamp
                FROM scada_readings
                WHERE network_id = $1 AND timestamp >= $2 AND timestamp <= $3
                ORDER BY timestamp ASC
                "#,
            )
            .bind(network_id)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(ScadaReading {
                        network_id: r.network_id,
                        sensor_id: r.sensor_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        location_id: r.location_id,
                        value: r.value,
                        timestamp: r.timestamp,
                    })
                })
                .collect())
        }

        async fn expected_values_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ExpectedValue>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                timestamp: DateTime<Utc>,
                location_id: String,
                sensor_kind: String,
                expected_value: f64,
                eps_hour: f64,
            }
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, timestamp, location_id, sensor_kind, expected_value, eps_hour
                FROM expected_values
                WHERE network_id = $1 AND timestamp >= $2 AND timestamp <= $3
                ORDER BY timestamp ASC
                "#,
            )
            .bind(network_id)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(ExpectedValue {
                        network_id: r.network_id,
                        timestamp: r.timestamp,
                        location_id: r.location_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        expected_value: r.expected_value,
                        eps_hour: r.eps_hour,
                    })
                })
                .collect())
        }

        async fn insert_anomalies(&self, anomalies: &[Anomaly]) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for a in anomalies {
                sqlx::query(
                    r#"
                    INSERT INTO anomalies
                        (network_id, timestamp, sensor_id, sensor_kind, location_id,
                         actual_value, expected_value, deviation_percent, threshold_percent, severity)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(a.network_id)
                .bind(a.timestamp)
                .bind(&a.sensor_id)
                .bind(a.sensor_kind.as_str())
                .bind(&a.location_id)
                .bind(a.actual_value)
                .bind(a.expected_value)
                .bind(a.deviation_percent)
                .bind(a.threshold_percent)
                .bind(severity_str(a.severity))
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn list_anomalies(&self, network_id: Uuid) -> Result<Vec<Anomaly>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                timestamp: DateTime<Utc>,
                sensor_id: String,
                sensor_kind: String,
                location_id: String,
                actual_value: f64,
                expected_value: f64,
                deviation_percent: f64,
                threshold_percent: f64,
                severity: String,
            }
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, timestamp, sensor_id, sensor_kind, location_id,
                       actual_value, expected_value, deviation_percent, threshold_percent, severity
                FROM anomalies WHERE network_id = $1 ORDER BY timestamp DESC
                "#,
            )
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(Anomaly {
                        network_id: r.network_id,
                        timestamp: r.timestamp,
                        sensor_id: r.sensor_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        location_id: r.location_id,
                        actual_value: r.actual_value,
                        expected_value: r.expected_value,
                        deviation_percent: r.deviation_percent,
                        threshold_percent: r.threshold_percent,
                        severity: parse_severity(&r.severity)?,
                    })
                })
                .collect())
        }

        async fn query_anomalies(&self, network_id: Uuid, filter: AnomalyFilter) -> Result<Page<Anomaly>> {
            let filter = filter.normalized();
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                timestamp: DateTime<Utc>,
                sensor_id: String,
                sensor_kind: String,
                location_id: String,
                actual_value: f64,
                expected_value: f64,
                deviation_percent: f64,
                threshold_percent: f64,
                severity: String,
            }
            let severity = filter.severity.map(severity_str);
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, timestamp, sensor_id, sensor_kind, location_id,
                       actual_value, expected_value, deviation_percent, threshold_percent, severity
                FROM anomalies
                WHERE network_id = $1
                  AND ($2::text IS NULL OR severity = $2)
                  AND ($3::timestamptz IS NULL OR timestamp >= $3)
                  AND ($4::timestamptz IS NULL OR timestamp <= $4)
                ORDER BY timestamp DESC
                LIMIT $5 OFFSET $6
                "#,
            )
            .bind(network_id)
            .bind(severity)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            let total: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM anomalies
                WHERE network_id = $1
                  AND ($2::text IS NULL OR severity = $2)
                  AND ($3::timestamptz IS NULL OR timestamp >= $3)
                  AND ($4::timestamptz IS NULL OR timestamp <= $4)
                "#,
            )
            .bind(network_id)
            .bind(filter.severity.map(severity_str))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

            let items = rows
                .into_iter()
                .filter_map(|r| {
                    Some(Anomaly {
                        network_id: r.network_id,
                        timestamp: r.timestamp,
                        sensor_id: r.sensor_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        location_id: r.location_id,
                        actual_value: r.actual_value,
                        expected_value: r.expected_value,
                        deviation_percent: r.deviation_percent,
                        threshold_percent: r.threshold_percent,
                        severity: parse_severity(&r.severity)?,
                    })
                })
                .collect();
            Ok(Page {
                items,
                total: total as usize,
            })
        }

        async fn anomalies_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<Anomaly>> {
            #[derive(FromRow)]
            struct Row {
                network_id: Uuid,
                timestamp: DateTime<Utc>,
                sensor_id: String,
                sensor_kind: String,
                location_id: String,
                actual_value: f64,
                expected_value: f64,
                deviation_percent: f64,
                threshold_percent: f64,
                severity: String,
            }
            let rows: Vec<Row> = sqlx::query_as(
                r#"
                SELECT network_id, timestamp, sensor_id, sensor_kind, location_id,
                       actual_value, expected_value, deviation_percent, threshold_percent, severity
                FROM anomalies
                WHERE network_id = $1 AND timestamp >= $2 AND timestamp <= $3
                ORDER BY timestamp ASC
                "#,
            )
            .bind(network_id)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(Anomaly {
                        network_id: r.network_id,
                        timestamp: r.timestamp,
                        sensor_id: r.sensor_id,
                        sensor_kind: parse_sensor_kind(&r.sensor_kind)?,
                        location_id: r.location_id,
                        actual_value: r.actual_value,
                        expected_value: r.expected_value,
                        deviation_percent: r.deviation_percent,
                        threshold_percent: r.threshold_percent,
                        severity: parse_severity(&r.severity)?,
                    })
                })
                .collect())
        }

        async fn delete_readings(&self, network_id: Uuid) -> Result<()> {
            sqlx::query("DELETE FROM scada_readings WHERE network_id = $1")
                .bind(network_id)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn delete_generation_logs(&self, network_id: Uuid) -> Result<()> {
            sqlx::query("DELETE FROM scada_generation_logs WHERE network_id = $1")
                .bind(network_id)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
            Ok(())
        }

        async fn insert_expected_values(&self, values: &[ExpectedValue]) -> Result<()> {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
            for v in values {
                sqlx::query(
                    r#"
                    INSERT INTO expected_values
                        (network_id, timestamp, location_id, sensor_kind, expected_value, eps_hour)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(v.network_id)
                .bind(v.timestamp)
                .bind(&v.location_id)
                .bind(v.sensor_kind.as_str())
                .bind(v.expected_value)
                .bind(v.eps_hour)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;
            }
            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        }
    }

    fn parse_sensor_kind(s: &str) -> Option<crate::domain::SensorKind> {
        match s {
            "pressure" => Some(crate::domain::SensorKind::Pressure),
            "flow" => Some(crate::domain::SensorKind::Flow),
            "level" => Some(crate::domain::SensorKind::Level),
            _ => None,
        }
    }

    fn parse_severity(s: &str) -> Option<crate::domain::Severity> {
        match s {
            "medium" => Some(crate::domain::Severity::Medium),
            "high" => Some(crate::domain::Severity::High),
            "critical" => Some(crate::domain::Severity::Critical),
            _ => None,
        }
    }

    fn severity_str(s: crate::domain::Severity) -> &'static str {
        match s {
            crate::domain::Severity::Medium => "medium",
            crate::domain::Severity::High => "high",
            crate::domain::Severity::Critical => "critical",
        }
    }
}

pub mod memory {
    use super::*;
    use std::sync::Mutex;

    /// Fully in-process double used by unit and service-lifecycle tests.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        networks: Vec<Network>,
        items: Vec<NetworkItem>,
        baselines: Vec<Baseline>,
        readings: Vec<ScadaReading>,
        generation_logs: Vec<GenerationLog>,
        anomalies: Vec<Anomaly>,
        expected_values: Vec<ExpectedValue>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_network(&self, network: Network) {
            self.inner.lock().unwrap().networks.push(network);
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn get_network(&self, network_id: Uuid) -> Result<Option<Network>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .networks
                .iter()
                .find(|n| n.id == network_id)
                .cloned())
        }

        async fn upsert_network(&self, network: &Network) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(existing) = inner.networks.iter_mut().find(|n| n.id == network.id) {
                existing.name = network.name.clone();
                existing.inp_path = network.inp_path.clone();
            } else {
                inner.networks.push(network.clone());
            }
            Ok(())
        }

        async fn set_baseline_computed_at(&self, network_id: Uuid, at: DateTime<Utc>) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(n) = inner.networks.iter_mut().find(|n| n.id == network_id) {
                n.baseline_computed_at = Some(at);
            }
            Ok(())
        }

        async fn insert_network_items(&self, items: &[NetworkItem]) -> Result<()> {
            self.inner.lock().unwrap().items.extend_from_slice(items);
            Ok(())
        }

        async fn list_network_items(&self, network_id: Uuid) -> Result<Vec<NetworkItem>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .items
                .iter()
                .filter(|i| i.network_id == network_id)
                .cloned()
                .collect())
        }

        async fn insert_baselines(&self, baselines: &[Baseline]) -> Result<()> {
            self.inner.lock().unwrap().baselines.extend_from_slice(baselines);
            Ok(())
        }

        async fn list_baselines(&self, network_id: Uuid) -> Result<Vec<Baseline>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .baselines
                .iter()
                .filter(|b| b.network_id == network_id)
                .cloned()
                .collect())
        }

        async fn commit_baseline(
            &self,
            network_id: Uuid,
            items: &[NetworkItem],
            baselines: &[Baseline],
            computed_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.items.extend_from_slice(items);
            inner.baselines.extend_from_slice(baselines);
            if let Some(n) = inner.networks.iter_mut().find(|n| n.id == network_id) {
                n.baseline_computed_at = Some(computed_at);
            }
            Ok(())
        }

        async fn insert_readings(&self, readings: &[ScadaReading]) -> Result<()> {
            self.inner.lock().unwrap().readings.extend_from_slice(readings);
            Ok(())
        }

        async fn insert_generation_log(&self, log: &GenerationLog) -> Result<()> {
            self.inner.lock().unwrap().generation_logs.push(log.clone());
            Ok(())
        }

        async fn insert_generation_cycle(
            &self,
            readings: &[ScadaReading],
            log: &GenerationLog,
        ) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.readings.extend_from_slice(readings);
            inner.generation_logs.push(log.clone());
            Ok(())
        }

        async fn readings_since(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ScadaReading>> {
            let mut matched: Vec<ScadaReading> = self
                .inner
                .lock()
                .unwrap()
                .readings
                .iter()
                .filter(|r| r.network_id == network_id && r.timestamp > since && r.timestamp <= until)
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.timestamp);
            Ok(matched)
        }

        async fn readings_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ScadaReading>> {
            let mut matched: Vec<ScadaReading> = self
                .inner
                .lock()
                .unwrap()
                .readings
                .iter()
                .filter(|r| r.network_id == network_id && r.timestamp >= since && r.timestamp <= until)
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.timestamp);
            Ok(matched)
        }

        async fn expected_values_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<ExpectedValue>> {
            let mut matched: Vec<ExpectedValue> = self
                .inner
                .lock()
                .unwrap()
                .expected_values
                .iter()
                .filter(|v| v.network_id == network_id && v.timestamp >= since && v.timestamp <= until)
                .cloned()
                .collect();
            matched.sort_by_key(|v| v.timestamp);
            Ok(matched)
        }

        async fn insert_anomalies(&self, anomalies: &[Anomaly]) -> Result<()> {
            self.inner.lock().unwrap().anomalies.extend_from_slice(anomalies);
            Ok(())
        }

        async fn list_anomalies(&self, network_id: Uuid) -> Result<Vec<Anomaly>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .anomalies
                .iter()
                .filter(|a| a.network_id == network_id)
                .cloned()
                .collect())
        }

        async fn query_anomalies(&self, network_id: Uuid, filter: AnomalyFilter) -> Result<Page<Anomaly>> {
            let filter = filter.normalized();
            let mut matched: Vec<Anomaly> = self
                .inner
                .lock()
                .unwrap()
                .anomalies
                .iter()
                .filter(|a| a.network_id == network_id)
                .filter(|a| filter.severity.map_or(true, |s| s == a.severity))
                .filter(|a| filter.from.map_or(true, |from| a.timestamp >= from))
                .filter(|a| filter.to.map_or(true, |to| a.timestamp <= to))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            let total = matched.len();
            let items = matched.into_iter().skip(filter.offset).take(filter.limit).collect();
            Ok(Page { items, total })
        }

        async fn anomalies_in_window(
            &self,
            network_id: Uuid,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<Anomaly>> {
            let mut matched: Vec<Anomaly> = self
                .inner
                .lock()
                .unwrap()
                .anomalies
                .iter()
                .filter(|a| a.network_id == network_id && a.timestamp >= since && a.timestamp <= until)
                .cloned()
                .collect();
            matched.sort_by_key(|a| a.timestamp);
            Ok(matched)
        }

        async fn insert_expected_values(&self, values: &[ExpectedValue]) -> Result<()> {
            self.inner
                .lock()
                .unwrap()
                .expected_values
                .extend_from_slice(values);
            Ok(())
        }

        async fn delete_readings(&self, network_id: Uuid) -> Result<()> {
            self.inner
                .lock()
                .unwrap()
                .readings
                .retain(|r| r.network_id != network_id);
            Ok(())
        }

        async fn delete_generation_logs(&self, network_id: Uuid) -> Result<()> {
            self.inner
                .lock()
                .unwrap()
                .generation_logs
                .retain(|l| l.network_id != network_id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn memory_store_round_trips_network_lifecycle() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.seed_network(Network {
            id,
            name: "test".into(),
            inp_path: "net.inp".into(),
            baseline_computed_at: None,
        });

        assert!(store.get_network(id).await.unwrap().unwrap().baseline_computed_at.is_none());

        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.set_baseline_computed_at(id, at).await.unwrap();
        assert_eq!(store.get_network(id).await.unwrap().unwrap().baseline_computed_at, Some(at));
    }

    #[tokio::test]
    async fn readings_since_respects_watermark_window() {
        let store = MemoryStore::new();
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let reading = |offset_secs: i64| crate::domain::ScadaReading {
            network_id,
            sensor_id: "PRESSURE_J-1".into(),
            sensor_kind: crate::domain::SensorKind::Pressure,
            location_id: "J-1".into(),
            value: 50.0,
            timestamp: t0 + chrono::Duration::seconds(offset_secs),
        };
        store.insert_readings(&[reading(10), reading(20), reading(30)]).await.unwrap();

        let results = store
            .readings_since(network_id, t0 + chrono::Duration::seconds(10), t0 + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].timestamp, t0 + chrono::Duration::seconds(20));
    }

    #[tokio::test]
    async fn query_anomalies_filters_by_severity_and_paginates() {
        let store = MemoryStore::new();
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let anomaly = |offset_secs: i64, severity: crate::domain::Severity| crate::domain::Anomaly {
            network_id,
            timestamp: t0 + chrono::Duration::seconds(offset_secs),
            sensor_id: "PRESSURE_J-1".into(),
            sensor_kind: crate::domain::SensorKind::Pressure,
            location_id: "J-1".into(),
            actual_value: 65.0,
            expected_value: 50.0,
            deviation_percent: 30.0,
            threshold_percent: 10.0,
            severity,
        };
        store
            .insert_anomalies(&[
                anomaly(10, crate::domain::Severity::Medium),
                anomaly(20, crate::domain::Severity::Critical),
                anomaly(30, crate::domain::Severity::Critical),
            ])
            .await
            .unwrap();

        let page = store
            .query_anomalies(
                network_id,
                AnomalyFilter {
                    severity: Some(crate::domain::Severity::Critical),
                    limit: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].timestamp, t0 + chrono::Duration::seconds(30));
    }
}
