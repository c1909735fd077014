use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    context::CurrentUser,
    error::{AppError, AppResult, Envelope},
    extract::Payload,
    models::{Comment, NewComment, UserSummary},
    queries,
    schema::comments,
    state::AppState,
    validation::{Field, Rule, Validate},
};

use super::{pins::insert_attachment_rows, remove_stored_attachments, AttachmentView};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommentRequest {
    pub text: String,
}

impl Validate for CommentRequest {
    fn fields(&mut self) -> Vec<Field<'_>> {
        vec![Field::text(
            "text",
            &mut self.text,
            &[Rule::Trim, Rule::Required],
        )]
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub user: Option<UserSummary>,
    pub text: String,
    pub attachments: Vec<AttachmentView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CreatedComment {
    pub id: i64,
}

/// Replies of a pin in posting order. The body comment is left out.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(pin_id): Path<i64>,
) -> Envelope<Vec<CommentView>> {
    Envelope::nodes(load_replies(state, pin_id).await)
}

async fn load_replies(state: AppState, pin_id: i64) -> AppResult<Vec<CommentView>> {
    let rows: Vec<Comment> = state
        .with_conn(move |conn| {
            Ok(comments::table
                .filter(comments::pin_id.eq(pin_id))
                .order_by(comments::id.asc())
                .offset(1)
                .select(Comment::as_select())
                .load(conn)?)
        })
        .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let user_ids: Vec<i64> = rows.iter().map(|comment| comment.user_id).collect();
    let comment_ids: Vec<i64> = rows.iter().map(|comment| comment.id).collect();
    let users = queries::spawn(&state, user_ids, queries::users_by_ids);
    let attachments = queries::spawn(&state, comment_ids, queries::attachments_by_comment_ids);
    let (users, mut attachments) =
        tokio::try_join!(queries::join(users), queries::join(attachments))?;

    Ok(rows
        .into_iter()
        .map(|comment| CommentView {
            id: comment.id,
            user: users.get(&comment.user_id).cloned(),
            text: comment.text,
            attachments: attachments
                .remove(&comment.id)
                .unwrap_or_default()
                .into_iter()
                .map(AttachmentView::from)
                .collect(),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        })
        .collect())
}

/// Adds a reply to a pin, with optional attachments.
pub async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(pin_id): Path<i64>,
    payload: Result<Payload<CommentRequest>, AppError>,
) -> Envelope<CreatedComment> {
    Envelope::new("comment", insert_comment(state, user, pin_id, payload).await)
}

async fn insert_comment(
    state: AppState,
    user: CurrentUser,
    pin_id: i64,
    payload: Result<Payload<CommentRequest>, AppError>,
) -> AppResult<CreatedComment> {
    let Payload {
        data: request,
        files,
    } = payload?;
    let uploaded = state.attachments.process(&files).await?;

    let rows = uploaded.clone();
    let inserted = state
        .with_conn(move |conn| {
            conn.transaction::<i64, AppError, _>(|conn| {
                let comment_id: i64 = diesel::insert_into(comments::table)
                    .values(&NewComment {
                        pin_id,
                        user_id: user.id,
                        text: &request.text,
                    })
                    .returning(comments::id)
                    .get_result(conn)?;
                insert_attachment_rows(conn, comment_id, &rows)?;
                Ok(comment_id)
            })
        })
        .await;

    match inserted {
        Ok(id) => Ok(CreatedComment { id }),
        Err(err) => {
            state.attachments.discard(&uploaded).await;
            Err(err)
        }
    }
}

/// Rewrites the text of the requester's own comment.
pub async fn update_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(comment_id): Path<i64>,
    payload: Result<Payload<CommentRequest>, AppError>,
) -> Envelope<bool> {
    Envelope::success(rewrite_comment(state, user, comment_id, payload).await)
}

async fn rewrite_comment(
    state: AppState,
    user: CurrentUser,
    comment_id: i64,
    payload: Result<Payload<CommentRequest>, AppError>,
) -> AppResult<()> {
    let request = payload?.data;
    let updated = state
        .with_conn(move |conn| {
            Ok(diesel::update(
                comments::table
                    .filter(comments::id.eq(comment_id))
                    .filter(comments::user_id.eq(user.id)),
            )
            .set((
                comments::text.eq(&request.text),
                comments::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)?)
        })
        .await?;
    if updated == 0 {
        debug!(comment_id, user_id = user.id, "no owned comment to update");
    }
    Ok(())
}

/// Deletes the requester's reply and the stored files of its attachments.
///
/// A pin's body comment is never removed here; the pin goes with `DELETE /v1/pins/:id`.
pub async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(comment_id): Path<i64>,
) -> Envelope<bool> {
    let result = state
        .with_conn(move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let pin_id: Option<i64> = comments::table
                    .filter(comments::id.eq(comment_id))
                    .filter(comments::user_id.eq(user.id))
                    .select(comments::pin_id)
                    .first(conn)
                    .optional()?;
                let Some(pin_id) = pin_id else {
                    debug!(comment_id, user_id = user.id, "no owned comment to delete");
                    return Ok(None);
                };

                let roots = queries::root_comment_ids_by_pin_ids(conn, &[pin_id])?;
                if roots.get(&pin_id) == Some(&comment_id) {
                    debug!(comment_id, pin_id, "refusing to delete a pin body");
                    return Ok(None);
                }

                let urls = queries::attachment_urls_for_comment(conn, comment_id)?;
                diesel::delete(comments::table.filter(comments::id.eq(comment_id)))
                    .execute(conn)?;
                Ok(Some(urls))
            })
        })
        .await;

    let result = match result {
        Ok(Some(urls)) => {
            remove_stored_attachments(&state, &urls).await;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => Err(err),
    };

    Envelope::success(result)
}
