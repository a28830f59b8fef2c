//! Binding JSON values to statements and decoding SQLite values to JSON

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row as _, TypeInfo, ValueRef};

use crate::{Error, Result};

/// A decoded row, column order preserved
pub type Row = IndexMap<String, JsonValue>;

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Build a query and bind each JSON value in order
pub(crate) fn build_query(query: &str, values: Vec<JsonValue>) -> SqliteQuery<'_> {
   values
      .into_iter()
      .fold(sqlx::query(query), |q, value| bind_value(q, value))
}

/// Bind one JSON value, keeping integers as INTEGER where they fit
pub(crate) fn bind_value(query: SqliteQuery<'_>, value: JsonValue) -> SqliteQuery<'_> {
   match value {
      JsonValue::Null => query.bind(None::<String>),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Number(number) => {
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for SQLite's INTEGER, fall back to REAL
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as their JSON text
      other => query.bind(other),
   }
}

pub(crate) fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>> {
   rows.iter().map(decode_row).collect()
}

pub(crate) fn decode_row(row: &SqliteRow) -> Result<Row> {
   let mut value = Row::default();
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(value)
}

/// Convert one SQLite value to JSON.
///
/// BLOBs become base64 strings; date and time values stay text.
pub(crate) fn to_json(v: SqliteValueRef<'_>) -> Result<JsonValue> {
   if v.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = v.type_info().name().to_string();
   let value = match type_name.as_str() {
      "TEXT" | "DATE" | "TIME" | "DATETIME" => {
         JsonValue::String(<String as Decode<Sqlite>>::decode(v).map_err(sqlx::Error::Decode)?)
      }
      "REAL" => {
         let n = <f64 as Decode<Sqlite>>::decode(v).map_err(sqlx::Error::Decode)?;
         serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
      }
      "INTEGER" | "BOOLEAN" => {
         JsonValue::from(<i64 as Decode<Sqlite>>::decode(v).map_err(sqlx::Error::Decode)?)
      }
      "NUMERIC" => {
         let n = <f64 as Decode<Sqlite>>::decode(v).map_err(sqlx::Error::Decode)?;
         if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            JsonValue::from(n as i64)
         } else {
            serde_json::Number::from_f64(n)
               .map(JsonValue::Number)
               .unwrap_or(JsonValue::Null)
         }
      }
      "BLOB" => {
         let bytes = <Vec<u8> as Decode<Sqlite>>::decode(v).map_err(sqlx::Error::Decode)?;
         JsonValue::String(STANDARD.encode(bytes))
      }
      _ => return Err(Error::UnsupportedDatatype(type_name)),
   };

   Ok(value)
}
