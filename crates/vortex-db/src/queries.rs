use crate::Database;
use crate::models::{AccountRow, SchemaError, TableSchema, from_sql, now};
use anyhow::Result;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use vortex_types::{Direction, Filter, Query, Row, Table};

impl Database {
    // -- Table rows --

    pub fn select(&self, query: &Query) -> Result<Vec<Row>> {
        self.with_conn(|conn| select_rows(conn, query))
    }

    pub fn count(&self, query: &Query) -> Result<u64> {
        self.with_conn(|conn| {
            let schema = TableSchema::for_table(query.table);
            let (where_sql, params) = where_clause(schema, &query.filters)?;
            let sql = format!("SELECT COUNT(*) FROM {}{}", schema.table.name(), where_sql);
            let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Insert rows, filling defaulted columns. Returns the rows as stored.
    /// All rows are written or none are.
    pub fn insert(&self, table: Table, rows: &[Row]) -> Result<Vec<Row>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let stored = rows
                .iter()
                .map(|row| insert_row(&tx, TableSchema::for_table(table), row))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(stored)
        })
    }

    /// Apply `patch` to every row matching the query. Returns the updated rows.
    pub fn update(&self, query: &Query, patch: &Row) -> Result<Vec<Row>> {
        self.with_conn_mut(|conn| {
            let schema = TableSchema::for_table(query.table);
            if patch.is_empty() {
                return Err(SchemaError::EmptyPatch { table: schema.table }.into());
            }

            let tx = conn.transaction()?;
            let ids = matching_ids(&tx, schema, &query.filters)?;
            if ids.is_empty() {
                return Ok(vec![]);
            }

            let mut assignments = Vec::with_capacity(patch.len() + 1);
            let mut params = Vec::with_capacity(patch.len() + ids.len() + 1);
            for (name, value) in patch {
                let column = schema.column(name)?;
                if column.name == "id" {
                    return Err(SchemaError::InvalidValue {
                        table: schema.table,
                        column: name.clone(),
                        reason: "primary key is immutable".into(),
                    }
                    .into());
                }
                assignments.push(format!("{} = ?", column.name));
                params.push(schema.to_sql(column, value)?);
            }
            if let Some(touch) = schema.touch {
                if !patch.contains_key(touch) {
                    assignments.push(format!("{} = ?", touch));
                    params.push(SqlValue::Text(now()));
                }
            }

            let sql = format!(
                "UPDATE {} SET {} WHERE id IN ({})",
                schema.table.name(),
                assignments.join(", "),
                placeholders(ids.len())
            );
            params.extend(ids.iter().cloned().map(SqlValue::Text));
            tx.execute(&sql, params_from_iter(params.iter()))?;

            let updated = rows_by_id(&tx, schema, &ids)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Delete every row matching the query. Returns the removed rows.
    pub fn delete(&self, query: &Query) -> Result<Vec<Row>> {
        self.with_conn_mut(|conn| {
            let schema = TableSchema::for_table(query.table);
            let tx = conn.transaction()?;
            let ids = matching_ids(&tx, schema, &query.filters)?;
            if ids.is_empty() {
                return Ok(vec![]);
            }

            let removed = rows_by_id(&tx, schema, &ids)?;
            let sql = format!(
                "DELETE FROM {} WHERE id IN ({})",
                schema.table.name(),
                placeholders(ids.len())
            );
            tx.execute(&sql, params_from_iter(ids.iter()))?;
            tx.commit()?;
            Ok(removed)
        })
    }

    // -- Accounts --

    /// Create an auth account together with its profile row. Returns the profile as stored.
    pub fn create_account(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        profile: &Row,
    ) -> Result<Row> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO accounts (id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, email, password_hash, now()),
            )?;
            let stored = insert_row(&tx, TableSchema::for_table(Table::Profiles), profile)?;
            tx.commit()?;
            Ok(stored)
        })
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account_by_email(conn, email))
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET password = ?1 WHERE id = ?2",
                (password_hash, id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn insert_password_reset(&self, id: &str, account_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (id, account_id, requested_at) VALUES (?1, ?2, ?3)",
                (id, account_id, now()),
            )?;
            Ok(())
        })
    }

    pub fn count_password_resets(&self, account_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM password_resets WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn select_rows(conn: &Connection, query: &Query) -> Result<Vec<Row>> {
    let schema = TableSchema::for_table(query.table);
    let (where_sql, mut params) = where_clause(schema, &query.filters)?;

    let mut sql = format!(
        "SELECT {} FROM {}{}",
        schema.column_list(),
        schema.table.name(),
        where_sql
    );

    // rowid breaks ties so equal timestamps keep insertion order
    match &query.order {
        Some(order) => {
            let column = schema.column(&order.column)?;
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY {} {}, rowid {}",
                column.name, direction, direction
            ));
        }
        None => sql.push_str(" ORDER BY rowid ASC"),
    }

    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::from(limit)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| read_row(schema, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn read_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (idx, column) in schema.columns.iter().enumerate() {
        let value: SqlValue = row.get(idx)?;
        out.insert(column.name.to_string(), from_sql(column, value));
    }
    Ok(out)
}

fn insert_row(conn: &Connection, schema: &TableSchema, row: &Row) -> Result<Row> {
    for name in row.keys() {
        schema.column(name)?;
    }

    let mut values = Vec::with_capacity(schema.columns.len());
    for column in schema.columns {
        let value = match row.get(column.name) {
            Some(value) => schema.to_sql(column, value)?,
            None => schema.default_value(column)?,
        };
        values.push(value);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.table.name(),
        schema.column_list(),
        placeholders(schema.columns.len())
    );
    conn.execute(&sql, params_from_iter(values.iter()))?;

    Ok(schema
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| (column.name.to_string(), from_sql(column, value)))
        .collect())
}

fn matching_ids(conn: &Connection, schema: &TableSchema, filters: &[Filter]) -> Result<Vec<String>> {
    let (where_sql, params) = where_clause(schema, filters)?;
    let sql = format!("SELECT id FROM {}{} ORDER BY rowid", schema.table.name(), where_sql);
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(params.iter()), |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn rows_by_id(conn: &Connection, schema: &TableSchema, ids: &[String]) -> Result<Vec<Row>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id IN ({}) ORDER BY rowid",
        schema.column_list(),
        schema.table.name(),
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| read_row(schema, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Build ` WHERE ...` (or an empty string) with positional parameters.
fn where_clause(schema: &TableSchema, filters: &[Filter]) -> Result<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok((String::new(), vec![]));
    }

    let mut params = Vec::new();
    let parts = filters
        .iter()
        .map(|f| filter_sql(schema, f, &mut params))
        .collect::<Result<Vec<_>>>()?;

    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

fn filter_sql(schema: &TableSchema, filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    let sql = match filter {
        Filter::Eq { column, value } => {
            let column = schema.column(column)?;
            if value.is_null() {
                format!("{} IS NULL", column.name)
            } else {
                params.push(schema.to_sql(column, value)?);
                format!("{} = ?", column.name)
            }
        }
        Filter::Neq { column, value } => {
            let column = schema.column(column)?;
            if value.is_null() {
                format!("{} IS NOT NULL", column.name)
            } else {
                params.push(schema.to_sql(column, value)?);
                format!("{} <> ?", column.name)
            }
        }
        Filter::In { column, values } => {
            let column = schema.column(column)?;
            if values.is_empty() {
                "0".to_string()
            } else {
                for value in values {
                    params.push(schema.to_sql(column, value)?);
                }
                format!("{} IN ({})", column.name, placeholders(values.len()))
            }
        }
        Filter::IsNull { column } => format!("{} IS NULL", schema.column(column)?.name),
        Filter::ILike { column, pattern } => {
            let column = schema.column(column)?;
            params.push(SqlValue::Text(pattern.clone()));
            // SQLite LIKE is case-insensitive for ASCII only
            format!("{} LIKE ? ESCAPE '\\'", column.name)
        }
        Filter::AnyOf { filters } => {
            if filters.is_empty() {
                "0".to_string()
            } else {
                let parts = filters
                    .iter()
                    .map(|f| filter_sql(schema, f, params))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
        }
    };
    Ok(sql)
}

fn query_account_by_email(conn: &Connection, email: &str) -> Result<Option<AccountRow>> {
    let mut stmt =
        conn.prepare("SELECT id, email, password, created_at FROM accounts WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(AccountRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn seed_chat(db: &Database) -> String {
        let creator = Uuid::new_v4();
        let stored = db
            .insert(Table::Chats, &[row(json!({ "created_by": creator }))])
            .unwrap();
        stored[0]["id"].as_str().unwrap().to_string()
    }

    fn seed_message(db: &Database, chat_id: &str, sender: Uuid, content: &str) -> Row {
        db.insert(
            Table::Messages,
            &[row(json!({ "chat_id": chat_id, "sender_id": sender, "content": content }))],
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn test_insert_fills_defaults() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let stored = seed_message(&db, &chat_id, Uuid::new_v4(), "hi");

        assert!(stored["id"].as_str().unwrap().parse::<Uuid>().is_ok());
        assert_eq!(stored["is_read"], json!(false));
        assert_eq!(stored["reaction"], Value::Null);
        assert_eq!(stored["created_at"], stored["updated_at"]);
    }

    #[test]
    fn test_insert_rejects_unknown_column() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .insert(Table::Chats, &[row(json!({ "created_by": Uuid::new_v4(), "title": "x" }))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SchemaError>(),
            Some(SchemaError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_select_orders_with_insertion_tiebreak() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let sender = Uuid::new_v4();
        let at = "2024-05-01T10:00:00Z";
        for content in ["a", "b", "c"] {
            db.insert(
                Table::Messages,
                &[row(json!({
                    "chat_id": chat_id, "sender_id": sender, "content": content, "created_at": at
                }))],
            )
            .unwrap();
        }

        let query = Query::from(Table::Messages)
            .eq("chat_id", &chat_id)
            .order_by("created_at", Direction::Asc);
        let contents: Vec<_> = db
            .select(&query)
            .unwrap()
            .into_iter()
            .map(|r| r["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);

        let latest = db
            .select(&query.clone().order_by("created_at", Direction::Desc).limit(1))
            .unwrap();
        assert_eq!(latest[0]["content"], json!("c"));
    }

    #[test]
    fn test_count_with_neq_and_bool_filters() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        seed_message(&db, &chat_id, other, "1");
        seed_message(&db, &chat_id, other, "2");
        seed_message(&db, &chat_id, me, "3");

        let unread = Query::from(Table::Messages)
            .eq("chat_id", &chat_id)
            .eq("is_read", false)
            .neq("sender_id", me);
        assert_eq!(db.count(&unread).unwrap(), 2);
    }

    #[test]
    fn test_update_touches_updated_at_and_returns_rows() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let stored = seed_message(&db, &chat_id, Uuid::new_v4(), "hi");
        let id = stored["id"].as_str().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        let updated = db
            .update(
                &Query::from(Table::Messages).eq("id", id),
                &row(json!({ "content": "edited" })),
            )
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["content"], json!("edited"));
        assert!(updated[0]["updated_at"].as_str() > stored["updated_at"].as_str());
    }

    #[test]
    fn test_update_without_matches_is_empty() {
        let db = Database::open_in_memory().unwrap();
        let updated = db
            .update(
                &Query::from(Table::Messages).eq("id", Uuid::new_v4()),
                &row(json!({ "is_read": true })),
            )
            .unwrap();
        assert!(updated.is_empty());
    }

    #[test]
    fn test_delete_returns_old_rows() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let stored = seed_message(&db, &chat_id, Uuid::new_v4(), "bye");

        let query = Query::from(Table::Messages).eq("id", stored["id"].clone());
        let removed = db.delete(&query).unwrap();
        assert_eq!(removed, vec![stored]);
        assert_eq!(db.count(&query).unwrap(), 0);
    }

    #[test]
    fn test_ilike_and_any_of() {
        let db = Database::open_in_memory().unwrap();
        for (username, display) in [("alice", "Alice A"), ("bob", "Bobby"), ("carol", "Al Carol")] {
            db.insert(
                Table::Profiles,
                &[row(json!({
                    "user_id": Uuid::new_v4(), "username": username, "display_name": display
                }))],
            )
            .unwrap();
        }

        let query = Query::from(Table::Profiles).filter(Filter::any_of([
            Filter::contains("username", "AL"),
            Filter::contains("display_name", "al"),
        ]));
        assert_eq!(db.select(&query).unwrap().len(), 2);

        let literal = Query::from(Table::Profiles).filter(Filter::contains("username", "%"));
        assert!(db.select(&literal).unwrap().is_empty());
    }

    #[test]
    fn test_unique_membership_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let chat_id = seed_chat(&db);
        let user = Uuid::new_v4();
        let membership = row(json!({ "chat_id": chat_id, "user_id": user }));
        db.insert(Table::ChatMemberships, &[membership.clone()]).unwrap();
        assert!(db.insert(Table::ChatMemberships, &[membership]).is_err());
    }

    #[test]
    fn test_accounts() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        let profile = row(json!({ "user_id": id, "username": "neo" }));
        let stored = db.create_account(&id, "neo@matrix.io", "hash", &profile).unwrap();
        assert_eq!(stored["username"], json!("neo"));

        let account = db.get_account_by_email("neo@matrix.io").unwrap().unwrap();
        assert_eq!(account.id, id);
        assert!(db.update_password(&id, "hash2").unwrap());
        assert!(db.get_account_by_email("trinity@matrix.io").unwrap().is_none());

        db.insert_password_reset(&Uuid::new_v4().to_string(), &id).unwrap();
        assert_eq!(db.count_password_resets(&id).unwrap(), 1);
    }
}
