use chrono::prelude::*;
use diesel::insert_into;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

use crate::schema::battle;

// A battle wraps one challenge in a submission window; rank follows passing order.
#[derive(Queryable, Serialize, Clone)]
pub struct Battle {
    pub id: i32,
    pub name: String,
    pub challenge_id: i32,
    pub start_instant: NaiveDateTime,
    pub end_instant: NaiveDateTime,
    pub creation_user_id: i32,
    pub creation_instant: NaiveDateTime,
}

impl Battle {
    pub fn is_open_at(&self, instant: NaiveDateTime) -> bool {
        self.start_instant <= instant && instant < self.end_instant
    }
}

#[derive(Insertable)]
#[diesel(table_name = battle)]
pub struct NewBattle {
    pub name: String,
    pub challenge_id: i32,
    pub start_instant: NaiveDateTime,
    pub end_instant: NaiveDateTime,
    pub creation_user_id: i32,
    pub creation_instant: NaiveDateTime,
}

pub fn insert_battle(
    connection: &mut SqliteConnection,
    new_battle: NewBattle,
) -> QueryResult<Battle> {
    insert_into(battle::table)
        .values(new_battle)
        .execute(connection)?;
    battle::table.order(battle::id.desc()).first(connection)
}

pub fn get_battle(connection: &mut SqliteConnection, id: i32) -> QueryResult<Option<Battle>> {
    battle::table
        .filter(battle::id.eq(id))
        .first::<Battle>(connection)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::run_migrations;

    #[test]
    fn window_is_half_open() {
        let mut conn = SqliteConnection::establish(":memory:").expect("in-memory database");
        run_migrations(&mut conn).expect("schema");

        let start = Utc::now().naive_utc();
        let end = start + chrono::Duration::minutes(30);
        let battle = insert_battle(
            &mut conn,
            NewBattle {
                name: "friday night".into(),
                challenge_id: 1,
                start_instant: start,
                end_instant: end,
                creation_user_id: 1,
                creation_instant: start,
            },
        )
        .unwrap();

        assert!(battle.is_open_at(start));
        assert!(battle.is_open_at(end - chrono::Duration::seconds(1)));
        assert!(!battle.is_open_at(end));
        assert!(!battle.is_open_at(start - chrono::Duration::seconds(1)));

        assert!(get_battle(&mut conn, battle.id).unwrap().is_some());
        assert!(get_battle(&mut conn, battle.id + 1).unwrap().is_none());
    }
}
