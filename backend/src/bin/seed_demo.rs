use log::{error, info};
use studenthub_backend::config::{load_dotenv, AppConfig};
use studenthub_backend::init_db;
use studenthub_backend::password_reset::DEFAULT_PASSWORDS;
use studenthub_backend::seed::{demo_accounts, seed_demo_data};

#[actix_web::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    load_dotenv();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let pool = match init_db(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = seed_demo_data(&pool, &config.login_email_domain).await {
        error!("Seeding failed: {}", e);
        std::process::exit(1);
    }

    for account in demo_accounts(&config.login_email_domain) {
        info!("{:<8} {:<14} {}", account.role.as_str(), account.login_id, account.email);
    }
    info!("All demo accounts use the password {}", DEFAULT_PASSWORDS[0]);
}
