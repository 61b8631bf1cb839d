pub mod config;
pub mod models;
pub mod users;
pub mod password_reset;
pub mod roles;
pub mod students;
pub mod attendance;
pub mod marks;
pub mod notes;
pub mod parents;
pub mod dashboard;
pub mod seed;

use actix_web::{error, middleware, web, App, HttpResponse};
use actix_cors::Cors;
use sqlx::postgres::PgPool;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_secret: String,
    pub login_email_domain: String,
    pub token_ttl_hours: i64,
}

impl AppState {
    pub fn new(db: PgPool, config: &AppConfig) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
            login_email_domain: config.login_email_domain.clone(),
            token_ttl_hours: config.token_ttl_hours,
        }
    }
}

pub fn create_app(app_state: web::Data<AppState>) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(app_state)
        .app_data(
            web::JsonConfig::default()
                .limit(1024 * 1024)
                .error_handler(|err, _req| {
                    let response = HttpResponse::BadRequest()
                        .json(users::ErrorResponse::new(err.to_string()));
                    error::InternalError::from_response(err, response).into()
                }),
        )
        .wrap(
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600)
        )
        .wrap(middleware::Logger::default())
        .configure(users::configure)
        .configure(students::configure)
        .configure(attendance::configure)
        .configure(marks::configure)
        .configure(notes::configure)
        .configure(parents::configure)
        .configure(dashboard::configure)
}

pub async fn init_db(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await?;

    Ok(pool)
}
