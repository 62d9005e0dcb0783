use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashSet;

use crate::models::submission::{self, STATUS_PASSED};
use crate::models::user;

pub const DEFAULT_ACTIVITY_WINDOW_SECS: i64 = 1_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Solving,
    Solved,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub user_id: i32,
    pub name: String,
    pub status: ParticipantStatus,
    pub last_activity: NaiveDateTime,
}

// Read-time projection of recent ledger activity; nothing is persisted.
pub fn active_for(
    connection: &mut SqliteConnection,
    challenge_id: i32,
    window_secs: i64,
) -> QueryResult<Vec<ParticipantView>> {
    let since = Utc::now().naive_utc() - chrono::Duration::seconds(window_secs);
    let rows = submission::submissions_for_challenge_since(connection, challenge_id, since)?;

    let mut seen: HashSet<i32> = HashSet::new();
    let mut views: Vec<ParticipantView> = Vec::new();
    for row in rows {
        // Rows arrive most recent first, so the first row per user wins.
        if !seen.insert(row.user_id) {
            continue;
        }
        views.push(ParticipantView {
            user_id: row.user_id,
            name: String::new(),
            status: if row.status == STATUS_PASSED {
                ParticipantStatus::Solved
            } else {
                ParticipantStatus::Solving
            },
            last_activity: row.submission_instant,
        });
    }

    let ids: Vec<i32> = views.iter().map(|v| v.user_id).collect();
    let names = user::get_user_names(connection, &ids)?;
    for view in &mut views {
        if let Some(name) = names.get(&view.user_id) {
            view.name = name.clone();
        }
    }
    Ok(views)
}
