use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

use crate::schema::user as user_column;
use crate::schema::user;
use crate::schema::user::dsl::user as user_table;
use chrono::prelude::*;

#[derive(Queryable)]
struct UserWithHashedPassword {
    pub id: i32,
    #[allow(dead_code)]
    pub name: String,
    pub hashed_password: String,
    pub is_host: bool,
}

#[derive(Queryable, Serialize, Clone)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub is_host: bool,
}

const USER_COLUMNS: (user_column::id, user_column::name, user_column::is_host) =
    (user_column::id, user_column::name, user_column::is_host);

const HASHED_COLUMNS: (
    user_column::id,
    user_column::name,
    user_column::hashed_password,
    user_column::is_host,
) = (
    user_column::id,
    user_column::name,
    user_column::hashed_password,
    user_column::is_host,
);

#[derive(Insertable)]
#[diesel(table_name = user)]
struct DatabaseNewUser<'a> {
    pub name: &'a str,
    pub hashed_password: &'a str,
    pub is_host: bool,
    pub creation_instant: NaiveDateTime,
}

pub struct NewUser<'a> {
    pub name: &'a str,
    pub password: &'a str,
    pub is_host: bool,
}

#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error(transparent)]
    Hash(#[from] argon2::Error),
}

fn hash_salt() -> String {
    env::var("SECRET_HASH_KEY").unwrap_or_else(|_| "kodbatalo-dev-salt".into())
}

pub fn get_user_by_id(connection: &mut SqliteConnection, id: i32) -> QueryResult<Option<User>> {
    user_table
        .select(USER_COLUMNS)
        .filter(user_column::id.eq(id))
        .first::<User>(connection)
        .optional()
}

pub fn get_user_by_name(connection: &mut SqliteConnection, name: &str) -> QueryResult<Option<User>> {
    user_table
        .select(USER_COLUMNS)
        .filter(user_column::name.eq(name))
        .first::<User>(connection)
        .optional()
}

pub fn get_user_names(
    connection: &mut SqliteConnection,
    ids: &[i32],
) -> QueryResult<HashMap<i32, String>> {
    let rows = user_table
        .select((user_column::id, user_column::name))
        .filter(user_column::id.eq_any(ids))
        .load::<(i32, String)>(connection)?;
    Ok(rows.into_iter().collect())
}

// Unknown name and wrong password are indistinguishable to the caller.
pub fn check_matching_password(
    connection: &mut SqliteConnection,
    name: &str,
    password: &str,
) -> Result<Option<User>, UserStoreError> {
    let user = user_table
        .select(HASHED_COLUMNS)
        .filter(user_column::name.eq(name))
        .first::<UserWithHashedPassword>(connection)
        .optional()?;
    match user {
        Some(user) if argon2::verify_encoded(&user.hashed_password, password.as_bytes())? => {
            Ok(Some(User {
                id: user.id,
                name: name.into(),
                is_host: user.is_host,
            }))
        }
        _ => Ok(None),
    }
}

pub fn insert_new_user(
    connection: &mut SqliteConnection,
    new_user: NewUser,
) -> Result<User, UserStoreError> {
    let NewUser {
        name,
        password,
        is_host,
    } = new_user;

    let config = argon2::Config::default();
    let hashed_password = argon2::hash_encoded(password.as_bytes(), hash_salt().as_bytes(), &config)?;

    diesel::insert_into(user_table)
        .values(DatabaseNewUser {
            name,
            hashed_password: &hashed_password,
            is_host,
            creation_instant: Utc::now().naive_utc(),
        })
        .execute(connection)?;

    get_user_by_name(connection, name)?.ok_or(UserStoreError::Database(
        diesel::result::Error::NotFound,
    ))
}
