use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    attachments::ProcessedAttachment,
    context::{AppId, CurrentUser},
    error::{AppError, AppResult, Envelope},
    extract::Payload,
    models::{Attachment, Comment, NewAttachment, NewComment, NewPin, Pin, UserSummary},
    queries,
    schema::{attachments, comments, pins},
    state::AppState,
    validation::{Field, NumberInput, Rule, Validate},
};

use super::{remove_stored_attachments, AttachmentView};

#[derive(Debug, Default, Deserialize)]
pub struct ListPinsQuery {
    /// `1` limits the list to the requester's pins.
    pub me: Option<String>,
    #[serde(rename = "_path")]
    pub legacy_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PinBodyView {
    pub id: i64,
    pub text: String,
    pub attachments: Vec<AttachmentView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PinView {
    pub id: i64,
    pub user: Option<UserSummary>,
    pub comment: Option<PinBodyView>,
    pub path: String,
    pub w: f64,
    #[serde(rename = "_x")]
    pub legacy_x: f64,
    pub x: f64,
    #[serde(rename = "_y")]
    pub legacy_y: f64,
    pub y: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_replies: i64,
}

impl PinView {
    fn new(
        pin: Pin,
        user: Option<UserSummary>,
        comment: Option<PinBodyView>,
        total_replies: i64,
    ) -> Self {
        Self {
            id: pin.id,
            user,
            comment,
            path: pin.path,
            w: pin.w,
            legacy_x: pin.legacy_x,
            x: pin.x,
            legacy_y: pin.legacy_y,
            y: pin.y,
            completed_at: pin.completed_at,
            total_replies,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreatePinRequest {
    #[serde(rename = "_path")]
    pub legacy_path: String,
    pub path: String,
    pub w: Option<NumberInput>,
    #[serde(rename = "_x")]
    pub legacy_x: Option<NumberInput>,
    pub x: Option<NumberInput>,
    #[serde(rename = "_y")]
    pub legacy_y: Option<NumberInput>,
    pub y: Option<NumberInput>,
    pub text: String,
}

impl Validate for CreatePinRequest {
    fn fields(&mut self) -> Vec<Field<'_>> {
        const TEXT: &[Rule] = &[Rule::Trim, Rule::Required];
        const NUMBER: &[Rule] = &[Rule::Required, Rule::Number];
        vec![
            Field::text("_path", &mut self.legacy_path, TEXT),
            Field::text("path", &mut self.path, TEXT),
            Field::number("w", &self.w, NUMBER),
            Field::number("_x", &self.legacy_x, NUMBER),
            Field::number("x", &self.x, NUMBER),
            Field::number("_y", &self.legacy_y, NUMBER),
            Field::number("y", &self.y, NUMBER),
            Field::text("text", &mut self.text, TEXT),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedPin {
    pub id: i64,
}

/// Pins of the app, newest first, each with its author, body and reply count.
pub async fn list_pins(
    State(state): State<AppState>,
    AppId(app_id): AppId,
    user: CurrentUser,
    Query(query): Query<ListPinsQuery>,
) -> Envelope<Vec<PinView>> {
    Envelope::nodes(load_pins(state, app_id, user, query).await)
}

async fn load_pins(
    state: AppState,
    app_id: String,
    user: CurrentUser,
    query: ListPinsQuery,
) -> AppResult<Vec<PinView>> {
    let only_mine = query.me.as_deref() == Some("1");
    let legacy_path = query.legacy_path.filter(|path| !path.is_empty());

    let rows: Vec<Pin> = state
        .with_conn(move |conn| {
            let mut select = pins::table
                .filter(pins::app_id.eq(&app_id))
                .select(Pin::as_select())
                .order_by(pins::id.desc())
                .into_boxed();
            if only_mine {
                select = select.filter(pins::user_id.eq(user.id));
            }
            if let Some(path) = &legacy_path {
                select = select.filter(pins::legacy_path.eq(path));
            }
            Ok(select.load(conn)?)
        })
        .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let pin_ids: Vec<i64> = rows.iter().map(|pin| pin.id).collect();
    let user_ids: Vec<i64> = rows.iter().map(|pin| pin.user_id).collect();

    let counts = queries::spawn(&state, pin_ids.clone(), queries::reply_counts_by_pin_ids);
    let users = queries::spawn(&state, user_ids, queries::users_by_ids);
    let bodies = enrich_bodies(&state, pin_ids);

    let (counts, users, bodies) = tokio::join!(queries::join(counts), queries::join(users), bodies);
    let counts = counts?;
    let users = users.unwrap_or_else(|err| {
        warn!(error = %err, "failed to load pin authors");
        HashMap::new()
    });
    let mut bodies = bodies.unwrap_or_else(|err| {
        warn!(error = %err, "failed to load pin bodies");
        HashMap::new()
    });

    Ok(rows
        .into_iter()
        .map(|pin| {
            let user = users.get(&pin.user_id).cloned();
            let comment = bodies.remove(&pin.id);
            let total_replies = counts.get(&pin.id).copied().unwrap_or_default();
            PinView::new(pin, user, comment, total_replies)
        })
        .collect())
}

/// Body comments with their attachments, keyed by pin id.
async fn enrich_bodies(
    state: &AppState,
    pin_ids: Vec<i64>,
) -> AppResult<HashMap<i64, PinBodyView>> {
    let roots = queries::join(queries::spawn(
        state,
        pin_ids,
        queries::root_comment_ids_by_pin_ids,
    ))
    .await?;
    if roots.is_empty() {
        return Ok(HashMap::new());
    }

    let comment_ids: Vec<i64> = roots.values().copied().collect();
    let comments = queries::spawn(state, comment_ids.clone(), queries::comments_by_ids);
    let attachments = queries::spawn(state, comment_ids, queries::attachments_by_comment_ids);
    let (comments, attachments) =
        tokio::try_join!(queries::join(comments), queries::join(attachments))?;

    Ok(body_views(roots, comments, attachments))
}

fn body_views(
    roots: HashMap<i64, i64>,
    mut comments: HashMap<i64, Comment>,
    mut attachments: HashMap<i64, Vec<Attachment>>,
) -> HashMap<i64, PinBodyView> {
    roots
        .into_iter()
        .filter_map(|(pin_id, comment_id)| {
            let comment = comments.remove(&comment_id)?;
            let attachments = attachments
                .remove(&comment_id)
                .unwrap_or_default()
                .into_iter()
                .map(AttachmentView::from)
                .collect();
            Some((
                pin_id,
                PinBodyView {
                    id: comment.id,
                    text: comment.text,
                    attachments,
                    created_at: comment.created_at,
                    updated_at: comment.updated_at,
                },
            ))
        })
        .collect()
}

/// Creates a pin together with its body comment and any uploaded attachments.
pub async fn create_pin(
    State(state): State<AppState>,
    AppId(app_id): AppId,
    user: CurrentUser,
    payload: Result<Payload<CreatePinRequest>, AppError>,
) -> Envelope<CreatedPin> {
    Envelope::new("pin", insert_pin(state, app_id, user, payload).await)
}

async fn insert_pin(
    state: AppState,
    app_id: String,
    user: CurrentUser,
    payload: Result<Payload<CreatePinRequest>, AppError>,
) -> AppResult<CreatedPin> {
    let Payload {
        data: request,
        files,
    } = payload?;
    let uploaded = state.attachments.process(&files).await?;

    let rows = uploaded.clone();
    let inserted = state
        .with_conn(move |conn| {
            conn.transaction::<i64, AppError, _>(|conn| {
                let new_pin = NewPin {
                    app_id: &app_id,
                    user_id: user.id,
                    legacy_path: &request.legacy_path,
                    path: &request.path,
                    w: number(&request.w)?,
                    legacy_x: number(&request.legacy_x)?,
                    x: number(&request.x)?,
                    legacy_y: number(&request.legacy_y)?,
                    y: number(&request.y)?,
                };
                let pin_id: i64 = diesel::insert_into(pins::table)
                    .values(&new_pin)
                    .returning(pins::id)
                    .get_result(conn)?;

                let comment_id: i64 = diesel::insert_into(comments::table)
                    .values(&NewComment {
                        pin_id,
                        user_id: user.id,
                        text: &request.text,
                    })
                    .returning(comments::id)
                    .get_result(conn)?;

                insert_attachment_rows(conn, comment_id, &rows)?;
                Ok(pin_id)
            })
        })
        .await;

    match inserted {
        Ok(id) => Ok(CreatedPin { id }),
        Err(err) => {
            state.attachments.discard(&uploaded).await;
            Err(err)
        }
    }
}

pub(super) fn insert_attachment_rows(
    conn: &mut PgConnection,
    comment_id: i64,
    uploaded: &[ProcessedAttachment],
) -> AppResult<()> {
    if uploaded.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewAttachment<'_>> = uploaded
        .iter()
        .map(|attachment| NewAttachment {
            comment_id,
            url: &attachment.url,
            data: attachment.data.clone(),
        })
        .collect();
    diesel::insert_into(attachments::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}

fn number(input: &Option<NumberInput>) -> AppResult<f64> {
    input
        .as_ref()
        .and_then(NumberInput::value)
        .ok_or_else(|| AppError::internal("validated number missing"))
}

/// Marks a pin complete when the raw body is `1`, otherwise reopens it.
pub async fn complete_pin(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(pin_id): Path<i64>,
    body: Bytes,
) -> Envelope<bool> {
    let complete = String::from_utf8_lossy(&body).trim() == "1";
    let result = state
        .with_conn(move |conn| {
            let target = pins::table.filter(pins::id.eq(pin_id));
            let affected = if complete {
                diesel::update(target.filter(pins::completed_at.is_null()))
                    .set((
                        pins::completed_at.eq(Some(Utc::now())),
                        pins::completed_by_id.eq(Some(user.id)),
                    ))
                    .execute(conn)?
            } else {
                diesel::update(target.filter(pins::completed_at.is_not_null()))
                    .set((
                        pins::completed_at.eq(None::<DateTime<Utc>>),
                        pins::completed_by_id.eq(None::<i64>),
                    ))
                    .execute(conn)?
            };
            Ok(affected)
        })
        .await
        .map(|affected| {
            if affected == 0 {
                debug!(pin_id, complete, "pin already in requested state");
            }
        });

    Envelope::success(result)
}

/// Deletes the requester's pin and the stored files of its attachments.
pub async fn delete_pin(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(pin_id): Path<i64>,
) -> Envelope<bool> {
    let result = state
        .with_conn(move |conn| {
            let urls = queries::attachment_urls_for_pin(conn, pin_id)?;
            let deleted = diesel::delete(
                pins::table
                    .filter(pins::id.eq(pin_id))
                    .filter(pins::user_id.eq(user.id)),
            )
            .execute(conn)?;
            Ok((deleted, urls))
        })
        .await;

    let result = match result {
        Ok((0, _)) => {
            debug!(pin_id, user_id = user.id, "no owned pin to delete");
            Ok(())
        }
        Ok((_, urls)) => {
            remove_stored_attachments(&state, &urls).await;
            Ok(())
        }
        Err(err) => Err(err),
    };

    Envelope::success(result)
}
