use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

/// Column order assumed by `INSERT INTO borrow_requests VALUES (...)` without a column list.
const REQUEST_COLUMNS: [&str; 4] = ["user_id", "item_id", "start", "end"];

/// Which requests a SELECT asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFilter {
    All,
    Id(Ulid),
    Items(Vec<Ulid>),
    User(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Fields stay optional here; a missing one is a validation failure of the
    /// submission, reported by the executor.
    SubmitRequest {
        user_id: Option<Ulid>,
        item_id: Option<Ulid>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    ApproveRequest {
        id: Ulid,
    },
    DenyRequest {
        id: Ulid,
    },
    ArchiveRequest {
        request_id: Ulid,
    },
    SelectRequests {
        filter: RequestFilter,
    },
    SelectHistory {
        user_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(prefix) = trimmed.get(..7)
        && prefix.eq_ignore_ascii_case("LISTEN ")
    {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "borrow_requests" => {
            let values = named_insert_values(insert, &REQUEST_COLUMNS)?;
            Ok(Command::SubmitRequest {
                user_id: values.get("user_id").map(parse_ulid_or_null).transpose()?.flatten(),
                item_id: values.get("item_id").map(parse_ulid_or_null).transpose()?.flatten(),
                start: values.get("start").map(parse_date_or_null).transpose()?.flatten(),
                end: values.get("end").map(parse_date_or_null).transpose()?.flatten(),
            })
        }
        "approvals" => Ok(Command::ApproveRequest {
            id: single_request_id(insert, "approvals")?,
        }),
        "denials" => Ok(Command::DenyRequest {
            id: single_request_id(insert, "denials")?,
        }),
        "borrow_history" => Ok(Command::ArchiveRequest {
            request_id: single_request_id(insert, "borrow_history")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_request_id(insert: &ast::Insert, table: &'static str) -> Result<Ulid, SqlError> {
    let values = named_insert_values(insert, &["request_id"])?;
    let expr = values
        .get("request_id")
        .ok_or(SqlError::WrongArity(table, 1, 0))?;
    parse_ulid_expr(expr)
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "borrow_requests" => {
            let filter = match filters {
                Filters { id: Some(id), .. } => RequestFilter::Id(id),
                Filters { item_ids: Some(ids), .. } => RequestFilter::Items(ids),
                Filters { user_id: Some(user), .. } => RequestFilter::User(user),
                _ => RequestFilter::All,
            };
            Ok(Command::SelectRequests { filter })
        }
        "borrow_history" => Ok(Command::SelectHistory {
            user_id: filters.user_id,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    item_ids: Option<Vec<Ulid>>,
    user_id: Option<Ulid>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => filters.id = Some(parse_ulid_expr(right)?),
            Some("item_id") => filters.item_ids = Some(vec![parse_ulid_expr(right)?]),
            Some("user_id") => filters.user_id = Some(parse_ulid_expr(right)?),
            _ => {}
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } if expr_column_name(expr).as_deref() == Some("item_id") => {
            filters.item_ids = Some(list.iter().map(parse_ulid_expr).collect::<Result<_, _>>()?);
        }
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => {}
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// First VALUES row keyed by column name. Without a column list, values are
/// matched to `default_order` by position.
fn named_insert_values(
    insert: &ast::Insert,
    default_order: &[&str],
) -> Result<HashMap<String, Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let row = match body.body.as_ref() {
        SetExpr::Values(values) => values
            .rows
            .first()
            .ok_or(SqlError::Parse("empty VALUES".into()))?,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };

    let names: Vec<String> = if insert.columns.is_empty() {
        default_order.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > names.len() {
        return Err(SqlError::Parse(format!(
            "{} values for {} columns",
            row.len(),
            names.len()
        )));
    }
    Ok(names.into_iter().zip(row.iter().cloned()).collect())
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

/// `'YYYY-MM-DD'` or NULL.
fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => s
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected date, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

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
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn parse_submit_with_columns() {
        let sql = format!(
            r#"INSERT INTO borrow_requests (item_id, user_id, start, "end") VALUES ('{ID}', '{OTHER}', '2024-01-01', '2024-01-05')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SubmitRequest { user_id, item_id, start, end } => {
                assert_eq!(item_id.unwrap().to_string(), ID);
                assert_eq!(user_id.unwrap().to_string(), OTHER);
                assert_eq!(start, Some(d("2024-01-01")));
                assert_eq!(end, Some(d("2024-01-05")));
            }
            cmd => panic!("expected SubmitRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_submit_positional() {
        let sql = format!(
            "INSERT INTO borrow_requests VALUES ('{OTHER}', '{ID}', '2024-01-01', '2024-01-05')"
        );
        match parse_sql(&sql).unwrap() {
            Command::SubmitRequest { user_id, item_id, .. } => {
                assert_eq!(user_id.unwrap().to_string(), OTHER);
                assert_eq!(item_id.unwrap().to_string(), ID);
            }
            cmd => panic!("expected SubmitRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_submit_missing_end_left_for_validation() {
        let sql = format!(
            "INSERT INTO borrow_requests (user_id, item_id, start) VALUES ('{OTHER}', '{ID}', '2024-01-01')"
        );
        match parse_sql(&sql).unwrap() {
            Command::SubmitRequest { end, start, .. } => {
                assert_eq!(start, Some(d("2024-01-01")));
                assert_eq!(end, None);
            }
            cmd => panic!("expected SubmitRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_submit_null_start() {
        let sql = format!(
            r#"INSERT INTO borrow_requests (user_id, item_id, start, "end") VALUES ('{OTHER}', '{ID}', NULL, '2024-01-01')"#
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SubmitRequest { start: None, .. }
        ));
    }

    #[test]
    fn parse_submit_bad_date_errors() {
        let sql = format!(
            r#"INSERT INTO borrow_requests (user_id, item_id, start, "end") VALUES ('{OTHER}', '{ID}', '2024-13-01', '2024-01-01')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_approve_and_deny() {
        let approve = parse_sql(&format!("INSERT INTO approvals (request_id) VALUES ('{ID}')")).unwrap();
        assert!(matches!(approve, Command::ApproveRequest { id } if id.to_string() == ID));

        let deny = parse_sql(&format!("INSERT INTO denials VALUES ('{ID}')")).unwrap();
        assert!(matches!(deny, Command::DenyRequest { id } if id.to_string() == ID));
    }

    #[test]
    fn parse_archive() {
        let cmd = parse_sql(&format!("INSERT INTO borrow_history (request_id) VALUES ('{ID}')")).unwrap();
        assert!(matches!(cmd, Command::ArchiveRequest { request_id } if request_id.to_string() == ID));
    }

    #[test]
    fn parse_select_requests_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM borrow_requests").unwrap(),
            Command::SelectRequests { filter: RequestFilter::All }
        );
        match parse_sql(&format!("SELECT * FROM borrow_requests WHERE item_id = '{ID}'")).unwrap() {
            Command::SelectRequests { filter: RequestFilter::Items(ids) } => {
                assert_eq!(ids.len(), 1);
                assert_eq!(ids[0].to_string(), ID);
            }
            cmd => panic!("expected item filter, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM borrow_requests WHERE user_id = '{OTHER}'")).unwrap(),
            Command::SelectRequests { filter: RequestFilter::User(_) }
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM borrow_requests WHERE id = '{ID}'")).unwrap(),
            Command::SelectRequests { filter: RequestFilter::Id(_) }
        ));
    }

    #[test]
    fn parse_select_requests_in_list() {
        let sql = format!("SELECT * FROM borrow_requests WHERE item_id IN ('{ID}', '{OTHER}')");
        match parse_sql(&sql).unwrap() {
            Command::SelectRequests { filter: RequestFilter::Items(ids) } => assert_eq!(ids.len(), 2),
            cmd => panic!("expected item filter, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_history() {
        assert_eq!(
            parse_sql("SELECT * FROM borrow_history").unwrap(),
            Command::SelectHistory { user_id: None }
        );
        match parse_sql(&format!("SELECT * FROM borrow_history WHERE user_id = '{OTHER}'")).unwrap() {
            Command::SelectHistory { user_id } => assert_eq!(user_id.unwrap().to_string(), OTHER),
            cmd => panic!("expected SelectHistory, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen() {
        let cmd = parse_sql(&format!("LISTEN item_{ID}")).unwrap();
        assert_eq!(cmd, Command::Listen { channel: format!("item_{ID}") });
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_bad_ulid_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO approvals (request_id) VALUES ('nope')"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
