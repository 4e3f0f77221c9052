//! MSSQL source reader implementation.
//!
//! Streams one object per [`BatchStream`] over a single pooled Tiberius
//! connection. Rows are pulled from the TDS stream and grouped into batches
//! by a background task, so the server cursor and at most a couple of
//! batches are alive at any time.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use tiberius::{
    AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query, QueryItem, Row,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use super::dialect::{MssqlDialect, PRIMARY_KEY_QUERY};
use crate::config::{SourceConfig, SourceSpec, CONNECTION_ENV_VAR};
use crate::core::{BatchStream, ReadRequest, ResolvedObject, RowBatch, SourceReader, SqlValue};
use crate::error::{ExportError, Result};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

type MssqlConnection = PooledConnection<'static, TiberiusConnectionManager>;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: Config,
}

impl TiberiusConnectionManager {
    /// Manager for an explicit `source` section.
    pub fn from_source(source: &SourceConfig) -> Self {
        let mut config = Config::new();
        config.host(&source.host);
        config.port(source.port);
        config.database(&source.database);
        config.authentication(AuthMethod::sql_server(&source.user, &source.password));

        if source.encrypt {
            if source.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        Self { config }
    }

    /// Manager for an ADO.NET style connection string.
    pub fn from_ado_string(conn_str: &str) -> Result<Self> {
        let mut config = Config::from_ado_string(conn_str)
            .map_err(|e| ExportError::Config(format!("invalid connection string: {}", e)))?;
        config.packet_size(TDS_MAX_PACKET_SIZE);
        Ok(Self { config })
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.config.clone();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        // A read can sit on one connection for a long time between batches.
        let socket = socket2::SockRef::from(&tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source reader.
///
/// Each open stream holds one pooled connection until it is exhausted or
/// dropped; size the pool to at least the number of concurrent exports.
pub struct MssqlReader {
    pool: Pool<TiberiusConnectionManager>,
    dialect: MssqlDialect,
}

impl MssqlReader {
    /// Connect using the configured source.
    pub async fn connect(spec: &SourceSpec, max_size: u32) -> Result<Self> {
        let manager = match spec {
            SourceSpec::Fields(source) => {
                info!("Connecting to MSSQL: {}", source.address());
                TiberiusConnectionManager::from_source(source)
            }
            SourceSpec::ConnectionString(conn) => {
                info!("Connecting to MSSQL using {}", CONNECTION_ENV_VAR);
                TiberiusConnectionManager::from_ado_string(conn)?
            }
        };
        Self::with_pool_size(manager, max_size).await
    }

    /// Create a reader with the specified pool size.
    pub async fn with_pool_size(manager: TiberiusConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| ExportError::pool(e, "creating MSSQL connection pool"))?;

        info!("Connected to MSSQL (pool_size={})", max_size.max(1));

        Ok(Self {
            pool,
            dialect: MssqlDialect::new(),
        })
    }

    async fn get_client(&self) -> Result<MssqlConnection> {
        self.pool
            .get_owned()
            .await
            .map_err(|e| ExportError::pool(e, "getting MSSQL connection from pool"))
    }

    /// Primary key columns for an object; empty for views and heaps.
    async fn primary_key(
        client: &mut Client<Compat<TcpStream>>,
        object: &ResolvedObject,
    ) -> Result<Vec<String>> {
        let mut query = Query::new(PRIMARY_KEY_QUERY);
        query.bind(object.schema.as_str());
        query.bind(object.object.as_str());

        let rows = query
            .query(client)
            .await
            .map_err(|e| ExportError::source_read(object.to_string(), e))?
            .into_first_result()
            .await
            .map_err(|e| ExportError::source_read(object.to_string(), e))?;

        let pk: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect();

        debug!("Primary key for {}: {:?}", object, pk);
        Ok(pk)
    }
}

#[async_trait]
impl SourceReader for MssqlReader {
    async fn open(&self, request: ReadRequest) -> Result<BatchStream> {
        let mut client = self.get_client().await?;

        let pk = Self::primary_key(&mut client, &request.object).await?;
        let ordered = !pk.is_empty();
        if !ordered {
            warn!(
                object = %request.object,
                "no primary key; batch boundaries may differ between runs"
            );
        }

        let sql = self
            .dialect
            .build_select(&request.object, request.filter.as_deref(), &pk)?;
        debug!(object = %request.object, "{}", sql);

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            if let Err(e) = stream_rows(client, &sql, &request, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(BatchStream::new(rx, ordered))
    }

    async fn test_connection(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ExportError::pool(e, "testing MSSQL connection"))?
            .into_row()
            .await
            .map_err(|e| ExportError::pool(e, "testing MSSQL connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mssql"
    }

    async fn close(&self) {
        // bb8 pool handles cleanup automatically
    }
}

/// Pull rows off the TDS stream and send them in `batch_size` groups.
async fn stream_rows(
    mut client: MssqlConnection,
    sql: &str,
    request: &ReadRequest,
    tx: &mpsc::Sender<Result<RowBatch>>,
) -> Result<()> {
    let object = request.object.to_string();
    let batch_size = request.batch_size.max(1);

    let mut stream = Query::new(sql)
        .query(&mut *client)
        .await
        .map_err(|e| ExportError::source_read(&object, e))?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(batch_size);
    let mut sent = 0usize;

    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| ExportError::source_read(&object, e))?
    {
        match item {
            QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
            }
            QueryItem::Metadata(_) => break,
            QueryItem::Row(row) => {
                rows.push(convert_row(row));
                if rows.len() == batch_size {
                    let batch = RowBatch::new(
                        columns.clone(),
                        std::mem::replace(&mut rows, Vec::with_capacity(batch_size)),
                    );
                    if tx.send(Ok(batch)).await.is_err() {
                        return Ok(()); // Receiver dropped
                    }
                    sent += 1;
                }
            }
        }
    }

    // With no rows at all, a row-less batch still carries the column names.
    if !rows.is_empty() || sent == 0 {
        let _ = tx.send(Ok(RowBatch::new(columns, rows))).await;
    }
    Ok(())
}

fn convert_row(row: Row) -> Vec<SqlValue> {
    row.into_iter().map(convert_column).collect()
}

/// Fold a TDS column value into a [`SqlValue`].
fn convert_column(data: ColumnData<'static>) -> SqlValue {
    match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(i64::from(v))).unwrap_or(SqlValue::Null),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(i64::from(v))).unwrap_or(SqlValue::Null),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(i64::from(v))).unwrap_or(SqlValue::Null),
        ColumnData::I64(v) => v.map(SqlValue::Int).unwrap_or(SqlValue::Null),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(f64::from(v))).unwrap_or(SqlValue::Null),
        ColumnData::F64(v) => v.map(SqlValue::Float).unwrap_or(SqlValue::Null),
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null),
        ColumnData::String(v) => v
            .map(|s| SqlValue::Text(s.into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Guid(v) => v
            .map(|g| SqlValue::Text(g.to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Bytes(b.into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Numeric(v) => v
            .map(|n| SqlValue::Float(f64::from(n)))
            .unwrap_or(SqlValue::Null),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::Text(x.into_owned().into_string()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .ok()
            .flatten()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .ok()
            .flatten()
            .map(|t| SqlValue::Text(t.to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<Utc>::from_sql(&data)
            .ok()
            .flatten()
            .map(|dt| SqlValue::Timestamp(dt.naive_utc()))
            .unwrap_or(SqlValue::Null),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)
                .ok()
                .flatten()
                .map(SqlValue::Timestamp)
                .unwrap_or(SqlValue::Null)
        }
    }
}
