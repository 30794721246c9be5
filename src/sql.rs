use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{BillingKind, ResourceKind};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Ulid,
        name: Option<String>,
        kind: ResourceKind,
    },
    RetireResource {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    CancelBooking {
        id: Ulid,
    },
    InsertRental {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        start_date: NaiveDate,
        duration_days: u32,
        billing: BillingKind,
        deposit: Decimal,
    },
    ReturnRental {
        id: Ulid,
    },
    SelectAvailability {
        resource_id: Ulid,
        date: NaiveDate,
    },
    SelectResources,
    SelectBookings {
        requester_id: Ulid,
    },
    SelectRentals {
        requester_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "resources" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("resources", 3, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let name = parse_string_or_null(&values[1])?;
            let kind_str = parse_string(&values[2])?;
            let kind = match kind_str.as_str() {
                "venue" => {
                    if values.len() < 4 {
                        return Err(SqlError::WrongArity("venue resources", 4, values.len()));
                    }
                    ResourceKind::Venue {
                        hourly_rate: parse_decimal(&values[3])?,
                    }
                }
                "rental" => {
                    if values.len() < 6 {
                        return Err(SqlError::WrongArity("rental resources", 6, values.len()));
                    }
                    ResourceKind::RentalPool {
                        daily_rate: parse_decimal(&values[3])?,
                        weekly_rate: parse_decimal(&values[4])?,
                        capacity: parse_u32(&values[5])?,
                    }
                }
                other => return Err(SqlError::Parse(format!("unknown resource kind: {other}"))),
            };
            Ok(Command::InsertResource { id, name, kind })
        }
        "bookings" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                requester_id: parse_ulid(&values[2])?,
                date: parse_date(&values[3])?,
                start: parse_string(&values[4])?,
                end: parse_string(&values[5])?,
            })
        }
        "rentals" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("rentals", 6, values.len()));
            }
            let deposit = if values.len() >= 7 {
                parse_decimal(&values[6])?
            } else {
                Decimal::ZERO
            };
            Ok(Command::InsertRental {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                requester_id: parse_ulid(&values[2])?,
                start_date: parse_date(&values[3])?,
                duration_days: parse_u32(&values[4])?,
                billing: parse_billing(&values[5])?,
                deposit,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    // DELETE FROM resources retires the resource; bookings and rentals are
    // never deleted, their statuses change via UPDATE.
    match table.as_str() {
        "resources" => Ok(Command::RetireResource { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let Some(assignment) = assignments.first() else {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    };
    let column = assignment.target.to_string().to_lowercase();
    if column != "status" {
        return Err(SqlError::Unsupported(format!("UPDATE of column {column}")));
    }
    let status = parse_string(&assignment.value)?;

    match (table.as_str(), status.as_str()) {
        ("bookings", "cancelled") => Ok(Command::CancelBooking { id }),
        ("rentals", "completed") => Ok(Command::ReturnRental { id }),
        ("bookings", other) | ("rentals", other) => {
            Err(SqlError::Unsupported(format!("status transition to {other}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
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

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "availability" => {
            let (mut resource_id, mut date) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut resource_id, &mut date)?;
            }
            Ok(Command::SelectAvailability {
                resource_id: resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        "bookings" => Ok(Command::SelectBookings {
            requester_id: extract_where_requester(&select.selection)?,
        }),
        "rentals" => Ok(Command::SelectRentals {
            requester_id: extract_where_requester(&select.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    resource_id: &mut Option<Ulid>,
    date: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, resource_id, date)?;
                extract_availability_filters(right, resource_id, date)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("resource_id") {
                    *resource_id = Some(parse_ulid(right)?);
                } else if col.as_deref() == Some("date") {
                    *date = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        ast::FromTable::WithFromKeyword(t) | ast::FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    extract_where_eq(selection, "id")
}

fn extract_where_requester(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    extract_where_eq(selection, "requester_id")
}

fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_billing(expr: &Expr) -> Result<BillingKind, SqlError> {
    let s = parse_string(expr)?;
    match s.as_str() {
        "daily" => Ok(BillingKind::Daily),
        "weekly" => Ok(BillingKind::Weekly),
        other => Err(SqlError::Parse(format!("bad billing kind: {other}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
