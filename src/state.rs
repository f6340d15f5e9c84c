use axum::extract::FromRef;

use crate::{
    config::JwtConfig,
    db::{DbPool, OrmConn, create_orm_conn},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub jwt: JwtConfig,
}

impl AppState {
    pub fn new(pool: DbPool, jwt: JwtConfig) -> Self {
        let orm = create_orm_conn(&pool);
        Self { pool, orm, jwt }
    }
}

impl FromRef<AppState> for JwtConfig {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}
