use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::auth::{actor_from_user, StaydeskAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::Notification;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ReservationQuery};
use crate::tenant::TenantManager;

/// Channel carrying every lifecycle notification of the tenant.
pub const ALL_RESERVATIONS_CHANNEL: &str = "reservations";

/// One handler per connection; it owns the session's LISTEN subscriptions.
pub struct StaydeskHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StaydeskQueryParser>,
    listeners: Mutex<HashMap<String, broadcast::Receiver<Notification>>>,
}

impl StaydeskHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StaydeskQueryParser),
            listeners: Mutex::new(HashMap::new()),
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

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        actor_from_user(&user)
            .ok_or_else(|| user_error("28000", format!("invalid user {user:?}")))
    }

    /// Parse, run and time one statement, then flush pending notifications
    /// ahead of its result.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let started = Instant::now();
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                observe("unparsed", false, started);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let result = self.execute_command(&engine, &actor, cmd).await;
        observe(label, result.is_ok(), started);
        if let Err(e) = &result {
            debug!(command = label, actor = %actor.id, "query failed: {e}");
        }
        self.deliver_notifications(client).await?;
        result
    }

    async fn execute_command(
        &self,
        engine: &Arc<Engine>,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let currency = engine.currency();
        match cmd {
            Command::InsertRoom(room) => {
                engine.create_room(actor, room).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoom { id, patch } => {
                engine
                    .update_room(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            // Reservation writes answer with the resulting row so clients learn the code.
            Command::InsertReservation(request) => {
                let reservation = engine
                    .create_booking(actor, request)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservations_response(currency, vec![reservation])])
            }
            Command::UpdateReservation {
                id,
                status,
                cancel_reason,
            } => {
                let reservation = match status {
                    ReservationStatus::Confirmed => engine.confirm(actor, id).await,
                    ReservationStatus::Cancelled => engine.cancel(actor, id, cancel_reason).await,
                    ReservationStatus::Completed => engine.complete(actor, id).await,
                    ReservationStatus::Pending => {
                        return Err(user_error(
                            "22023",
                            "a reservation cannot be moved back to pendiente".into(),
                        ));
                    }
                }
                .map_err(engine_err)?;
                Ok(vec![reservations_response(currency, vec![reservation])])
            }
            Command::SelectReservations(query) => {
                let reservations = match query {
                    ReservationQuery::Id(id) => {
                        vec![engine.get_reservation(id).await.map_err(engine_err)?]
                    }
                    ReservationQuery::Code(code) => {
                        vec![engine.get_reservation_by_code(&code).await.map_err(engine_err)?]
                    }
                    ReservationQuery::Filter(filter) => engine.list_reservations(filter).await,
                    ReservationQuery::ActiveForCaller => {
                        engine.active_reservations_for_guest(actor.id).await
                    }
                };
                Ok(vec![reservations_response(currency, reservations)])
            }
            Command::SelectAvailability { room_id, range } => {
                let free = engine
                    .free_nights(room_id, range)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rid_str = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = free
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&r.from.to_string())?;
                        encoder.encode_field(&r.to.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectQuote { room_id, stay } => {
                let pricing = engine.quote(room_id, &stay).await.map_err(engine_err)?;
                let available = engine
                    .is_available(room_id, &stay)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(quote_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&stay.mode().as_str())?;
                encoder.encode_field(&pricing.units.to_string())?;
                encoder.encode_field(&pricing.subtotal.to_string())?;
                encoder.encode_field(&pricing.tax.to_string())?;
                encoder.encode_field(&pricing.total.to_string())?;
                encoder.encode_field(&currency)?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![engine.get_room_info(id).await.map_err(engine_err)?],
                    None => engine.list_rooms().await,
                };
                let schema = Arc::new(room_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.hotel_id.to_string())?;
                        encoder.encode_field(&room.owner_id.to_string())?;
                        encoder.encode_field(&room.base_rate.to_string())?;
                        encoder.encode_field(&i64::from(room.capacity))?;
                        encoder.encode_field(&i64::from(room.beds))?;
                        encoder.encode_field(&room.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectStats { hotel_id } => {
                let stats = engine.stats(hotel_id).await;
                let schema = Arc::new(stats_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                for count in [
                    stats.pending,
                    stats.confirmed,
                    stats.cancelled,
                    stats.completed,
                    stats.total(),
                ] {
                    encoder.encode_field(&(count as i64))?;
                }
                encoder.encode_field(&stats.revenue.to_string())?;
                encoder.encode_field(&currency)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                self.listen(engine, channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                self.lock_listeners().remove(&channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.lock_listeners().clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    fn lock_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<Notification>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe this session to `room_<ULID>` or `reservations`. Listening twice is a no-op.
    fn listen(&self, engine: &Engine, channel: String) -> PgWireResult<()> {
        let mut listeners = self.lock_listeners();
        if listeners.contains_key(&channel) {
            return Ok(());
        }
        let receiver = if channel == ALL_RESERVATIONS_CHANNEL {
            engine.notify.subscribe_all()
        } else {
            let room_id = channel
                .strip_prefix("room_")
                .and_then(|id| Ulid::from_string(id).ok())
                .ok_or_else(|| {
                    user_error(
                        "42602",
                        format!("invalid channel: {channel} (expected room_{{id}} or reservations)"),
                    )
                })?;
            engine.notify.subscribe(room_id)
        };
        listeners.insert(channel, receiver);
        Ok(())
    }

    /// Everything queued on this session's channels since the last statement.
    fn drain_notifications(&self) -> Vec<(String, Notification)> {
        let mut pending = Vec::new();
        for (channel, receiver) in self.lock_listeners().iter_mut() {
            loop {
                match receiver.try_recv() {
                    Ok(n) => pending.push((channel.clone(), n)),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "listener lagged, notifications dropped");
                    }
                    Err(_) => break,
                }
            }
        }
        pending
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for (channel, notification) in self.drain_notifications() {
            let payload = match serde_json::to_string(&notification) {
                Ok(p) => p,
                Err(e) => {
                    warn!(channel = %channel, "cannot encode notification: {e}");
                    continue;
                }
            };
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(std::process::id() as i32, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }
}

fn observe(command: &'static str, ok: bool, started: Instant) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(QUERIES_TOTAL, "command" => command, "status" => status).increment(1);
    metrics::histogram!(QUERY_DURATION_SECONDS, "command" => command)
        .record(started.elapsed().as_secs_f64());
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = [
        "id", "code", "room_id", "hotel_id", "guest_id", "mode", "stay_start", "stay_end",
    ]
    .into_iter()
    .map(text_field)
    .collect();
    fields.push(int_field("guest_count"));
    fields.extend(
        [
            "guest_name",
            "guest_surname",
            "guest_document",
            "guest_phone",
            "units",
            "subtotal",
            "tax",
            "total",
            "currency",
            "status",
            "notes",
            "cancel_reason",
            "cancelled_at",
            "created_at",
            "updated_at",
        ]
        .into_iter()
        .map(text_field),
    );
    fields
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("room_id"), text_field("start"), text_field("end")]
}

fn quote_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = ["room_id", "mode", "units", "subtotal", "tax", "total", "currency"]
        .into_iter()
        .map(text_field)
        .collect();
    fields.push(FieldInfo::new(
        "available".into(),
        None,
        None,
        Type::BOOL,
        FieldFormat::Text,
    ));
    fields
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("hotel_id"),
        text_field("owner_id"),
        text_field("base_rate"),
        int_field("capacity"),
        int_field("beds"),
        text_field("status"),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        int_field("pendiente"),
        int_field("confirmada"),
        int_field("cancelada"),
        int_field("completada"),
        int_field("total"),
        text_field("revenue"),
        text_field("currency"),
    ]
}

fn timestamp(at: chrono::NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Nightly stays render as dates, day-use stays as timestamps.
fn stay_bounds(stay: &Stay) -> (String, String) {
    match stay {
        Stay::Nightly {
            check_in,
            check_out,
        } => (check_in.to_string(), check_out.to_string()),
        Stay::Hourly { .. } => (
            timestamp(stay.check_in_instant()),
            timestamp(stay.check_out_instant()),
        ),
    }
}

fn reservations_response(currency: &str, reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let (start, end) = stay_bounds(&r.stay);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.code)?;
            encoder.encode_field(&r.room_id.to_string())?;
            encoder.encode_field(&r.hotel_id.to_string())?;
            encoder.encode_field(&r.guest_id.to_string())?;
            encoder.encode_field(&r.mode().as_str())?;
            encoder.encode_field(&start)?;
            encoder.encode_field(&end)?;
            encoder.encode_field(&i64::from(r.guest_count))?;
            encoder.encode_field(&r.guest.name)?;
            encoder.encode_field(&r.guest.surname)?;
            encoder.encode_field(&r.guest.document_id)?;
            encoder.encode_field(&r.guest.phone)?;
            encoder.encode_field(&r.pricing.units.to_string())?;
            encoder.encode_field(&r.pricing.subtotal.to_string())?;
            encoder.encode_field(&r.pricing.tax.to_string())?;
            encoder.encode_field(&r.pricing.total.to_string())?;
            encoder.encode_field(&currency)?;
            encoder.encode_field(&r.status.as_str())?;
            encoder.encode_field(&r.notes)?;
            encoder.encode_field(&r.cancel_reason)?;
            encoder.encode_field(&r.cancelled_at.map(timestamp))?;
            encoder.encode_field(&timestamp(r.created_at))?;
            encoder.encode_field(&timestamp(r.updated_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns of a statement, judged from the table it reads or writes.
/// Works on unbound statements, where `$n` placeholders stop the real parser.
fn result_schema(statement: &str) -> Vec<FieldInfo> {
    let lower = statement.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let after = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .copied()
    };
    match words.first().copied() {
        Some("select") => match after("from") {
            Some("reservations") => reservation_schema(),
            Some("availability") => availability_schema(),
            Some("quotes") => quote_schema(),
            Some("rooms") => room_schema(),
            Some("stats") => stats_schema(),
            _ => vec![],
        },
        Some("insert") => match after("into") {
            Some("reservations" | "day_use_reservations") => reservation_schema(),
            _ => vec![],
        },
        Some("update") if after("update") == Some("reservations") => reservation_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for StaydeskHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydeskQueryParser;

#[async_trait]
impl QueryParser for StaydeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
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
impl ExtendedQueryHandler for StaydeskHandler {
    type Statement = String;
    type QueryParser = StaydeskQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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

/// Count the highest $N parameter placeholder in the SQL string.
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaydeskFactory {
    handler: Arc<StaydeskHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<StaydeskAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl StaydeskFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = StaydeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StaydeskHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydeskFactory {
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

/// Serve one client connection until it closes. Each connection gets its own
/// handler so LISTEN state never leaks between sessions.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(StaydeskFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE per engine error kind.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::InvalidDuration(_) => "22008",
        EngineError::CapacityExceeded { .. } => "23514",
        EngineError::RoomUnavailable { .. } => "23P01",
        EngineError::RoomOutOfService { .. } => "55006",
        EngineError::InvalidStateTransition { .. } => "55000",
        EngineError::PastCheckin(_) => "55P04",
        EngineError::NotFound(_) | EngineError::CodeNotFound(_) => "P0002",
        EngineError::Unauthorized { .. } => "42501",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(fields: &[FieldInfo]) -> Vec<String> {
        fields.iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM quotes WHERE room_id = $1 AND check_in = $2 AND check_out = $3"), 3);
        assert_eq!(count_params("UPDATE rooms SET beds = $12 WHERE id = $1"), 12);
    }

    #[test]
    fn schema_follows_target_table() {
        assert_eq!(
            names(&result_schema("SELECT * FROM availability WHERE room_id = $1")),
            vec!["room_id", "start", "end"]
        );
        assert_eq!(
            result_schema("INSERT INTO day_use_reservations VALUES ($1)").len(),
            reservation_schema().len()
        );
        assert_eq!(
            result_schema("update reservations set status = $1 where id = $2").len(),
            reservation_schema().len()
        );
        assert!(result_schema("UPDATE rooms SET beds = $1 WHERE id = $2").is_empty());
        assert!(result_schema("LISTEN reservations").is_empty());
        assert_eq!(names(&result_schema("select * from stats"))[4], "total");
    }

    #[test]
    fn every_error_kind_has_its_own_state() {
        let id = Ulid::new();
        let states = [
            sqlstate(&EngineError::RoomUnavailable {
                room_id: id,
                conflicting: id,
            }),
            sqlstate(&EngineError::PastCheckin(id)),
            sqlstate(&EngineError::Unauthorized {
                actor: id,
                action: "cancel",
            }),
            sqlstate(&EngineError::CapacityExceeded {
                requested: 3,
                capacity: 2,
            }),
            sqlstate(&EngineError::InvalidDuration("x".into())),
            sqlstate(&EngineError::Validation("x".into())),
        ];
        let mut unique = states.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), states.len());
        assert_eq!(sqlstate(&EngineError::CodeNotFound("RES-1".into())), "P0002");
    }

    #[test]
    fn hourly_bounds_render_as_timestamps() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let stay = Stay::hourly(
            date,
            chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
        );
        assert_eq!(
            stay_bounds(&stay),
            ("2024-06-01 09:00:00".to_string(), "2024-06-01 13:30:00".to_string())
        );
        let nightly = Stay::nightly(date, date.succ_opt().unwrap());
        assert_eq!(stay_bounds(&nightly).1, "2024-06-02");
    }
}
