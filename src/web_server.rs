use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::{LanguageConfig, ServerConfig};
use crate::routes::{
    get_submission_handler, json_error_handler, post_submission_handler, post_testcases_handler,
};

pub fn build_server(
    server_config: ServerConfig,
    language_config: LanguageConfig,
    db_pool: SqlitePool,
) -> std::io::Result<Server> {
    let db_pool = web::Data::new(db_pool);
    let language_config = web::Data::new(language_config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(language_config.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_submission_handler)
            .service(get_submission_handler)
            .service(post_testcases_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
