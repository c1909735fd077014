//! Batch lookups keyed by id lists.
//!
//! Every lookup answers with an id-keyed map and returns an empty map without
//! touching the database when handed no ids. They take a plain connection so
//! callers decide how to schedule them; [`spawn`] runs one on its own pooled
//! connection so several can be awaited together, and skips the checkout
//! entirely for an empty id list.

use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tokio::task::JoinHandle;

use crate::error::AppResult;
use crate::models::{Attachment, Comment, UserSummary};
use crate::schema::{attachments, comments, users};
use crate::state::AppState;

/// Runs `lookup` for `ids` on a blocking thread with a dedicated connection.
///
/// No ids means no checkout: the handle resolves to an empty map straight away.
pub fn spawn<K, V, F>(
    state: &AppState,
    ids: Vec<i64>,
    lookup: F,
) -> JoinHandle<AppResult<HashMap<K, V>>>
where
    F: FnOnce(&mut PgConnection, &[i64]) -> QueryResult<HashMap<K, V>> + Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    if ids.is_empty() {
        return tokio::spawn(async { Ok(HashMap::new()) });
    }
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        Ok(lookup(&mut conn, &ids)?)
    })
}

/// Resolves a spawned lookup, folding a panicked task into the error.
pub async fn join<T>(handle: JoinHandle<AppResult<T>>) -> AppResult<T> {
    handle.await?
}

pub fn users_by_ids(
    conn: &mut PgConnection,
    ids: &[i64],
) -> QueryResult<HashMap<i64, UserSummary>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<UserSummary> = users::table
        .filter(users::id.eq_any(ids))
        .select(UserSummary::as_select())
        .load(conn)?;
    Ok(rows.into_iter().map(|user| (user.id, user)).collect())
}

pub fn comments_by_ids(
    conn: &mut PgConnection,
    ids: &[i64],
) -> QueryResult<HashMap<i64, Comment>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<Comment> = comments::table
        .filter(comments::id.eq_any(ids))
        .select(Comment::as_select())
        .load(conn)?;
    Ok(rows.into_iter().map(|comment| (comment.id, comment)).collect())
}

/// Pin id to the id of its earliest comment, the pin's body.
pub fn root_comment_ids_by_pin_ids(
    conn: &mut PgConnection,
    pin_ids: &[i64],
) -> QueryResult<HashMap<i64, i64>> {
    if pin_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i64, i64)> = comments::table
        .filter(comments::pin_id.eq_any(pin_ids))
        .distinct_on(comments::pin_id)
        .order_by((comments::pin_id, comments::created_at, comments::id))
        .select((comments::pin_id, comments::id))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

/// Comments per pin, not counting the body.
pub fn reply_counts_by_pin_ids(
    conn: &mut PgConnection,
    pin_ids: &[i64],
) -> QueryResult<HashMap<i64, i64>> {
    if pin_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i64, i64)> = comments::table
        .filter(comments::pin_id.eq_any(pin_ids))
        .group_by(comments::pin_id)
        .select((comments::pin_id, count_star()))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(pin_id, total)| (pin_id, (total - 1).max(0)))
        .collect())
}

pub fn attachments_by_comment_ids(
    conn: &mut PgConnection,
    comment_ids: &[i64],
) -> QueryResult<HashMap<i64, Vec<Attachment>>> {
    if comment_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<Attachment> = attachments::table
        .filter(attachments::comment_id.eq_any(comment_ids))
        .order_by(attachments::id)
        .select(Attachment::as_select())
        .load(conn)?;

    let mut grouped: HashMap<i64, Vec<Attachment>> = HashMap::new();
    for attachment in rows {
        grouped
            .entry(attachment.comment_id)
            .or_default()
            .push(attachment);
    }
    Ok(grouped)
}

pub fn attachment_urls_for_comment(
    conn: &mut PgConnection,
    comment_id: i64,
) -> QueryResult<Vec<String>> {
    attachments::table
        .filter(attachments::comment_id.eq(comment_id))
        .select(attachments::url)
        .load(conn)
}

pub fn attachment_urls_for_pin(conn: &mut PgConnection, pin_id: i64) -> QueryResult<Vec<String>> {
    attachments::table
        .inner_join(comments::table)
        .filter(comments::pin_id.eq(pin_id))
        .select(attachments::url)
        .load(conn)
}
