use actix_identity::Identity;
use actix_web::web;

use crate::models::user::{self, User};
use crate::routes::ApiError;
use crate::setup::DbPool;

// Session cookie -> ledger identity. Anything malformed is treated as not
// logged in rather than an error.
pub async fn current_user(pool: &DbPool, identity: Option<Identity>) -> Result<User, ApiError> {
    let identity = identity.ok_or(ApiError::Unauthorized)?;
    let id_string = identity.id().map_err(|_| ApiError::Unauthorized)?;
    let user_id: i32 = id_string.parse().map_err(|_| ApiError::Unauthorized)?;

    let pool = pool.clone();
    let user = web::block(move || -> Result<Option<User>, ApiError> {
        let mut connection = pool.get()?;
        Ok(user::get_user_by_id(&mut connection, user_id)?)
    })
    .await??;
    user.ok_or(ApiError::Unauthorized)
}

pub fn require_host(user: &User) -> Result<(), ApiError> {
    if user.is_host {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
