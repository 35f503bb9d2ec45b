use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::BorrowdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, RequestFilter};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(BorrowdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct BorrowdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BorrowdQueryParser>,
}

impl BorrowdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BorrowdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn run_query(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

async fn execute_command(engine: &Engine, cmd: Command) -> PgWireResult<Response> {
    match cmd {
        Command::SubmitRequest {
            user_id,
            item_id,
            start,
            end,
        } => {
            let user_id = required(user_id, "user_id")?;
            let item_id = required(item_id, "item_id")?;
            let start = required(start, "start")?;
            let end = required(end, "end")?;
            let request = engine
                .submit(user_id, item_id, start, end)
                .await
                .map_err(engine_err)?;
            request_response(vec![request])
        }
        Command::ApproveRequest { id } => {
            let request = engine.approve(id).await.map_err(engine_err)?;
            request_response(vec![request])
        }
        Command::DenyRequest { id } => {
            let request = engine.deny(id).await.map_err(engine_err)?;
            request_response(vec![request])
        }
        Command::ArchiveRequest { request_id } => {
            let history = engine.archive(request_id).await.map_err(engine_err)?;
            history_response(vec![history])
        }
        Command::SelectRequests { filter } => {
            let requests = match filter {
                RequestFilter::All => engine.list_requests().await,
                RequestFilter::Id(id) => match engine.get_request(id).await {
                    Ok(r) => Ok(vec![r]),
                    Err(EngineError::NotFound(_)) => Ok(vec![]),
                    Err(e) => Err(e),
                },
                RequestFilter::Items(ids) => engine.list_for_items(&ids).await,
                RequestFilter::User(user_id) => engine.list_for_user(user_id).await,
            }
            .map_err(engine_err)?;
            request_response(requests)
        }
        Command::SelectHistory { user_id } => {
            let history = match user_id {
                Some(user_id) => engine.history_for_user(user_id).await,
                None => engine.list_history().await,
            }
            .map_err(engine_err)?;
            history_response(history)
        }
        Command::Listen { channel } => {
            let item_id = channel
                .strip_prefix("item_")
                .ok_or_else(|| user_error("42000", format!("invalid channel: {channel} (expected item_{{id}})")))?;
            Ulid::from_string(item_id)
                .map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))?;
            Ok(Response::Execution(Tag::new("LISTEN")))
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> PgWireResult<T> {
    value.ok_or_else(|| engine_err(EngineError::Validation(format!("missing field: {field}"))))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn request_schema() -> Vec<FieldInfo> {
    ["id", "item_id", "user_id", "start", "end", "status"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn history_schema() -> Vec<FieldInfo> {
    ["request_id", "item_id", "user_id", "start", "end"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn request_response(requests: Vec<BorrowRequest>) -> PgWireResult<Response> {
    let schema = Arc::new(request_schema());
    let rows: Vec<PgWireResult<_>> = requests
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.item_id.to_string())?;
            encoder.encode_field(&r.user_id.to_string())?;
            encoder.encode_field(&r.span.start.to_string())?;
            encoder.encode_field(&r.span.end.to_string())?;
            encoder.encode_field(&r.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn history_response(history: Vec<BorrowHistory>) -> PgWireResult<Response> {
    let schema = Arc::new(history_schema());
    let rows: Vec<PgWireResult<_>> = history
        .into_iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.request_id.to_string())?;
            encoder.encode_field(&h.item_id.to_string())?;
            encoder.encode_field(&h.user_id.to_string())?;
            encoder.encode_field(&h.span.start.to_string())?;
            encoder.encode_field(&h.span.end.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement, decided from its target table without a full parse.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("BORROW_HISTORY") {
        history_schema()
    } else if upper.contains("BORROW_REQUESTS")
        || upper.contains("APPROVALS")
        || upper.contains("DENIALS")
    {
        request_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BorrowdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run_query(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BorrowdQueryParser;

#[async_trait]
impl QueryParser for BorrowdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BorrowdHandler {
    type Statement = String;
    type QueryParser = BorrowdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run_query(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_text_params(&portal.statement.statement, &portal.parameters)
}

/// One pass over the template, so a bound value is never rescanned for
/// placeholders. Indexes with no bound parameter are left as written.
fn bind_text_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BorrowdFactory {
    handler: Arc<BorrowdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BorrowdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BorrowdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BorrowdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BorrowdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BorrowdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidState { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_client_error() {
        tracing::error!("engine failure: {e}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
