use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::model::*;
use crate::time::{TimeError, parse_timestamp};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom { name: String },
    DeleteRoom { id: RoomId },
    SelectRooms,
    InsertBooking { room_id: RoomId, start: Ms, end: Ms },
    SelectBookings { room_id: RoomId },
    DeleteBooking { id: BookingId },
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing value for column {0}")]
    MissingColumn(&'static str),
    #[error("missing WHERE filter: {0}")]
    MissingFilter(&'static str),
    #[error(transparent)]
    Timestamp(#[from] TimeError),
}

const ROOM_COLUMNS: &[&str] = &["name"];
const BOOKING_COLUMNS: &[&str] = &["room_id", "start_time", "end_time"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "rooms" => {
            let row = InsertRow::new(insert, ROOM_COLUMNS)?;
            Ok(Command::InsertRoom {
                name: parse_string(row.get("name")?)?,
            })
        }
        "bookings" => {
            let row = InsertRow::new(insert, BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                room_id: RoomId(parse_i64(row.get("room_id")?)?),
                start: parse_timestamp_expr(row.get("start_time")?)?,
                end: parse_timestamp_expr(row.get("end_time")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: RoomId(extract_where_eq(&delete.selection, "id")?),
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: BookingId(extract_where_eq(&delete.selection, "id")?),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "bookings" => Ok(Command::SelectBookings {
            room_id: RoomId(extract_where_eq(&select.selection, "room_id")?),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// The single VALUES row of an INSERT, addressable by column name. Without
/// an explicit column list, values bind positionally to `default_columns`.
struct InsertRow<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> InsertRow<'a> {
    fn new(insert: &'a ast::Insert, default_columns: &[&str]) -> Result<Self, SqlError> {
        let source = insert
            .source
            .as_ref()
            .ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match source.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let values = match rows.as_slice() {
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            [row] => row.as_slice(),
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        };
        let columns: Vec<String> = if insert.columns.is_empty() {
            default_columns.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        Ok(Self { columns, values })
    }

    fn get(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .ok_or(SqlError::MissingColumn(column))
    }
}

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
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// `WHERE <column> = <integer>`, possibly inside an AND chain.
fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<i64, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    find_eq(sel, column)?.ok_or(SqlError::MissingFilter(column))
}

fn find_eq(expr: &Expr, column: &str) -> Result<Option<i64>, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => match find_eq(left, column)? {
            Some(v) => Ok(Some(v)),
            None => find_eq(right, column),
        },
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => Ok(Some(parse_i64(right)?)),
        Expr::Nested(inner) => find_eq(inner, column),
        _ => Ok(None),
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// ISO-8601 string, or integer epoch milliseconds (bare or quoted, as bound
/// parameters arrive).
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => match s.parse::<Ms>() {
            Ok(ms) => Ok(ms),
            Err(_) => Ok(parse_timestamp(s)?),
        },
        _ => parse_i64(expr),
    }
}
