use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    pricing::{Clock, SystemClock, TotalsOptions},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub pricing: TotalsOptions,
    pub clock: Arc<dyn Clock>,
    pub cart_cookie_secure: bool,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: DbPool, orm: OrmConn, config: &AppConfig) -> Self {
        Self {
            pool,
            orm,
            pricing: TotalsOptions {
                flat_shipping_fee: config.shipping_flat_fee,
            },
            clock: Arc::new(SystemClock),
            cart_cookie_secure: config.cart_cookie_secure,
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
