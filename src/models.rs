use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::*;

/// The public projection of a user embedded in pins and comments.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub external_id: &'a str,
    pub app_id: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = pins)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Pin {
    pub id: i64,
    pub app_id: String,
    pub user_id: i64,
    pub legacy_path: String,
    pub path: String,
    pub w: f64,
    pub legacy_x: f64,
    pub x: f64,
    pub legacy_y: f64,
    pub y: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pins)]
pub struct NewPin<'a> {
    pub app_id: &'a str,
    pub user_id: i64,
    pub legacy_path: &'a str,
    pub path: &'a str,
    pub w: f64,
    pub legacy_x: f64,
    pub x: f64,
    pub legacy_y: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = comments)]
#[diesel(belongs_to(Pin))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Comment {
    pub id: i64,
    pub pin_id: i64,
    pub user_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment<'a> {
    pub pin_id: i64,
    pub user_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = attachments)]
#[diesel(belongs_to(Comment))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Attachment {
    pub id: i64,
    pub comment_id: i64,
    pub url: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment<'a> {
    pub comment_id: i64,
    pub url: &'a str,
    pub data: serde_json::Value,
}
