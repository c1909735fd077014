use axum::extract::State;
use diesel::{pg::upsert::excluded, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    context::AppId,
    error::{AppError, AppResult, Envelope},
    extract::Payload,
    models::NewUser,
    schema::users,
    state::AppState,
    validation::{Field, Rule, Validate},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    /// The caller's own identifier for the user.
    pub id: String,
    pub name: String,
}

impl Validate for CreateUserRequest {
    fn fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::text("id", &mut self.id, &[Rule::Trim, Rule::Required]),
            Field::text("name", &mut self.name, &[Rule::Trim, Rule::Required]),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedUser {
    pub id: i64,
}

/// Registers a user for the app, or renames it when the external id is known.
pub async fn create_user(
    State(state): State<AppState>,
    AppId(app_id): AppId,
    payload: Result<Payload<CreateUserRequest>, AppError>,
) -> Envelope<CreatedUser> {
    Envelope::new("user", upsert_user(state, app_id, payload).await)
}

async fn upsert_user(
    state: AppState,
    app_id: String,
    payload: Result<Payload<CreateUserRequest>, AppError>,
) -> AppResult<CreatedUser> {
    let request = payload?.data;
    let id = state
        .with_conn(move |conn| {
            let new_user = NewUser {
                external_id: &request.id,
                app_id: &app_id,
                name: &request.name,
            };
            Ok(diesel::insert_into(users::table)
                .values(&new_user)
                .on_conflict((users::external_id, users::app_id))
                .do_update()
                .set((
                    users::name.eq(excluded(users::name)),
                    users::updated_at.eq(diesel::dsl::now),
                ))
                .returning(users::id)
                .get_result::<i64>(conn)?)
        })
        .await?;
    Ok(CreatedUser { id })
}
