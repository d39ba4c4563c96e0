use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom(Room),
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    /// Nightly rows come from `reservations`, day-use rows from `day_use_reservations`.
    InsertReservation(BookingRequest),
    UpdateReservation {
        id: Ulid,
        status: ReservationStatus,
        cancel_reason: Option<String>,
    },
    SelectReservations(ReservationQuery),
    SelectAvailability {
        room_id: Ulid,
        range: DateRange,
    },
    SelectQuote {
        room_id: Ulid,
        stay: Stay,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    SelectStats {
        hotel_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationQuery {
    Id(Ulid),
    Code(String),
    Filter(ReservationFilter),
    /// No WHERE clause: the caller's own pending and confirmed reservations.
    ActiveForCaller,
}

const ROOM_COLUMNS: &[&str] = &["id", "hotel_id", "owner_id", "base_rate", "capacity", "beds", "status"];
const NIGHTLY_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "check_in",
    "check_out",
    "guest_count",
    "guest_name",
    "guest_surname",
    "guest_document",
    "guest_phone",
    "notes",
];
const DAY_USE_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "date",
    "time_from",
    "time_to",
    "guest_count",
    "guest_name",
    "guest_surname",
    "guest_document",
    "guest_phone",
    "notes",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        return Ok(Command::Listen {
            channel: channel_name(&trimmed[7..])?,
        });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten {
            channel: channel_name(channel)?,
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Channel names are identifiers; double quotes are stripped and case is kept.
fn channel_name(raw: &str) -> Result<String, SqlError> {
    let name = raw.trim().trim_matches('"');
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqlError::Parse(format!("bad channel name: {raw}")));
    }
    Ok(name.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: &[&str] = match table.as_str() {
        "rooms" => ROOM_COLUMNS,
        "reservations" => NIGHTLY_COLUMNS,
        "day_use_reservations" => DAY_USE_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = Row::from_insert(insert, columns)?;

    match table.as_str() {
        "rooms" => Ok(Command::InsertRoom(Room {
            id: parse_ulid(row.required("id")?)?,
            hotel_id: parse_ulid(row.required("hotel_id")?)?,
            owner_id: parse_ulid(row.required("owner_id")?)?,
            base_rate: parse_decimal(row.required("base_rate")?)?,
            capacity: parse_u32(row.required("capacity")?)?,
            beds: match row.optional("beds") {
                Some(e) => parse_u32(e)?,
                None => 1,
            },
            status: match row.optional("status") {
                Some(e) => parse_room_status(e)?,
                None => RoomStatus::Available,
            },
        })),
        "reservations" => {
            let stay = Stay::nightly(
                parse_date(row.required("check_in")?)?,
                parse_date(row.required("check_out")?)?,
            );
            Ok(Command::InsertReservation(booking_request(&row, stay)?))
        }
        _ => {
            let stay = Stay::hourly(
                parse_date(row.required("date")?)?,
                parse_time(row.required("time_from")?)?,
                parse_time(row.required("time_to")?)?,
            );
            Ok(Command::InsertReservation(booking_request(&row, stay)?))
        }
    }
}

fn booking_request(row: &Row, stay: Stay) -> Result<BookingRequest, SqlError> {
    Ok(BookingRequest {
        id: parse_ulid(row.required("id")?)?,
        room_id: parse_ulid(row.required("room_id")?)?,
        stay,
        guest: GuestInfo {
            name: parse_string(row.required("guest_name")?)?,
            surname: parse_string(row.required("guest_surname")?)?,
            document_id: parse_string(row.required("guest_document")?)?,
            phone: parse_string(row.required("guest_phone")?)?,
        },
        guest_count: parse_u32(row.required("guest_count")?)?,
        notes: row.optional("notes").map(parse_string_or_null).transpose()?.flatten(),
    })
}

/// One VALUES row keyed by column name. Without a column list the table's
/// declared order applies.
struct Row<'a> {
    table: String,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn from_insert(insert: &'a ast::Insert, declared: &[&str]) -> Result<Self, SqlError> {
        let table = insert_table_name(insert)?;
        let rows = extract_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!(
                "{table}: one row per INSERT, got {}",
                rows.len()
            )));
        }
        let exprs = &rows[0];

        let names: Vec<String> = if insert.columns.is_empty() {
            declared.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if exprs.len() > names.len() || (!insert.columns.is_empty() && exprs.len() != names.len()) {
            return Err(SqlError::WrongArity(table, names.len(), exprs.len()));
        }

        let mut values = HashMap::new();
        for (name, expr) in names.into_iter().zip(exprs.iter()) {
            if !declared.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(name));
            }
            values.insert(name, expr);
        }
        Ok(Self { table, values })
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.values
            .get(column)
            .copied()
            .ok_or_else(|| SqlError::MissingColumn(self.table.clone(), column))
    }

    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.values.get(column).copied()
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = HashMap::new();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.insert(column, &assignment.value);
    }

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "base_rate" => patch.base_rate = Some(parse_decimal(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "beds" => patch.beds = Some(parse_u32(value)?),
                    "status" => patch.status = Some(parse_room_status(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "reservations" => {
            let mut status = None;
            let mut cancel_reason = None;
            for (column, value) in set {
                match column.as_str() {
                    "status" => status = Some(parse_reservation_status(value)?),
                    "cancel_reason" => cancel_reason = parse_string_or_null(value)?,
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            let status = status.ok_or(SqlError::MissingColumn(table.clone(), "status"))?;
            if status == ReservationStatus::Pending {
                return Err(SqlError::InvalidValue {
                    column: "status",
                    reason: "a reservation cannot be moved back to pendiente".into(),
                });
            }
            if cancel_reason.is_some() && status != ReservationStatus::Cancelled {
                return Err(SqlError::InvalidValue {
                    column: "cancel_reason",
                    reason: "only allowed together with status = 'cancelada'".into(),
                });
            }
            Ok(Command::UpdateReservation {
                id,
                status,
                cancel_reason,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column op value` conjuncts of a WHERE clause.
struct Predicate<'a> {
    column: String,
    op: ast::BinaryOperator,
    value: &'a Expr,
}

fn collect_predicates<'a>(expr: &'a Expr, out: &mut Vec<Predicate<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("predicate {expr}")))?;
            out.push(Predicate {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("predicate {other}"))),
    }
}

struct Filters<'a>(Vec<Predicate<'a>>);

impl<'a> Filters<'a> {
    fn from_selection(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut predicates = Vec::new();
        if let Some(expr) = selection {
            collect_predicates(expr, &mut predicates)?;
        }
        Ok(Self(predicates))
    }

    fn find(&self, column: &str, op: ast::BinaryOperator) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|p| p.column == column && p.op == op)
            .map(|p| p.value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, ast::BinaryOperator::Eq)
    }

    fn require_eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "reservations" => parse_select_reservations(&filters),
        "availability" => {
            let from = filters
                .find("start", ast::BinaryOperator::GtEq)
                .ok_or(SqlError::MissingFilter("start"))?;
            let to = filters
                .find("end", ast::BinaryOperator::LtEq)
                .ok_or(SqlError::MissingFilter("end"))?;
            Ok(Command::SelectAvailability {
                room_id: parse_ulid(filters.require_eq("room_id")?)?,
                range: DateRange {
                    from: parse_date(from)?,
                    to: parse_date(to)?,
                },
            })
        }
        "quotes" => {
            let room_id = parse_ulid(filters.require_eq("room_id")?)?;
            let stay = match filters.eq("check_in") {
                Some(check_in) => Stay::nightly(
                    parse_date(check_in)?,
                    parse_date(filters.require_eq("check_out")?)?,
                ),
                None => Stay::hourly(
                    parse_date(filters.require_eq("date")?)?,
                    parse_time(filters.require_eq("time_from")?)?,
                    parse_time(filters.require_eq("time_to")?)?,
                ),
            };
            Ok(Command::SelectQuote { room_id, stay })
        }
        "rooms" => Ok(Command::SelectRooms {
            id: filters.eq("id").map(parse_ulid).transpose()?,
        }),
        "stats" => Ok(Command::SelectStats {
            hotel_id: filters.eq("hotel_id").map(parse_ulid).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select_reservations(filters: &Filters) -> Result<Command, SqlError> {
    if filters.is_empty() {
        return Ok(Command::SelectReservations(ReservationQuery::ActiveForCaller));
    }
    if filters.len() > 1 {
        return Err(SqlError::Unsupported(
            "reservations accept a single filter".into(),
        ));
    }
    let query = if let Some(v) = filters.eq("id") {
        ReservationQuery::Id(parse_ulid(v)?)
    } else if let Some(v) = filters.eq("code") {
        ReservationQuery::Code(parse_string(v)?)
    } else if let Some(v) = filters.eq("room_id") {
        ReservationQuery::Filter(ReservationFilter::Room(parse_ulid(v)?))
    } else if let Some(v) = filters.eq("guest_id") {
        ReservationQuery::Filter(ReservationFilter::Guest(parse_ulid(v)?))
    } else if let Some(v) = filters.eq("hotel_id") {
        ReservationQuery::Filter(ReservationFilter::Hotel(parse_ulid(v)?))
    } else if let Some(v) = filters.eq("status") {
        ReservationQuery::Filter(ReservationFilter::Status(parse_reservation_status(v)?))
    } else {
        return Err(SqlError::MissingFilter(
            "id, code, room_id, guest_id, hotel_id or status",
        ));
    };
    Ok(Command::SelectReservations(query))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let filters = Filters::from_selection(selection)?;
    if filters.len() != 1 {
        return Err(SqlError::MissingFilter("id"));
    }
    parse_ulid(filters.require_eq("id")?)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// The literal behind an expression; `'x'::date` style casts are looked through.
fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => extract_value(expr),
        _ => None,
    }
}

/// String or number literal as text.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.as_str()),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(expr)?.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_string(expr)?;
    RoomStatus::parse(&s).ok_or(SqlError::InvalidValue {
        column: "status",
        reason: format!("unknown room status {s}"),
    })
}

fn parse_reservation_status(expr: &Expr) -> Result<ReservationStatus, SqlError> {
    let s = parse_string(expr)?;
    ReservationStatus::parse(&s).ok_or(SqlError::InvalidValue {
        column: "status",
        reason: format!("unknown reservation status {s}"),
    })
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(String, usize, usize),
    MissingColumn(String, &'static str),
    MissingFilter(&'static str),
    InvalidValue {
        column: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue { column, reason } => write!(f, "invalid {column}: {reason}"),
        }
    }
}

impl std::error::Error for SqlError {}
